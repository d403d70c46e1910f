//! Per-mode binding of resolved parameters onto a workflow graph.
//!
//! Each [`GenerationMode`] owns a fixed table of `(node id, input field)`
//! targets, each fed from one [`BoundValue`]. Node IDs are the ones used
//! by the shipped templates; targets missing from a template are skipped
//! and reported, never treated as errors.

use serde_json::{json, Value};

use crate::params::{GenerationMode, ResolvedParameters};
use crate::workflow::WorkflowGraph;

/// The resolved value a binding writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundValue {
    InputImage,
    InputAudio,
    Prompt,
    NegativePrompt,
    Width,
    Height,
    FrameCount,
    Steps,
    Cfg,
    FrameRate,
    ImgCompression,
    StrengthFirst,
    StrengthSecond,
    SeedStageOne,
    SeedStageTwo,
}

/// One `(node, field) <- value` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub node_id: &'static str,
    pub field: &'static str,
    pub value: BoundValue,
}

const fn bind(node_id: &'static str, field: &'static str, value: BoundValue) -> Binding {
    Binding {
        node_id,
        field,
        value,
    }
}

/// File names (relative to the engine's input directory) of the media
/// written for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFiles {
    pub image: String,
    pub audio: Option<String>,
}

// ---------------------------------------------------------------------------
// Binding tables
// ---------------------------------------------------------------------------

/// Single-template layout: LoadImage -> resize -> LTX two-pass sampler.
const LEGACY_BINDINGS: &[Binding] = &[
    bind("98", "image", BoundValue::InputImage),
    bind("102", "resize_type.width", BoundValue::Width),
    bind("102", "resize_type.height", BoundValue::Height),
    bind("92:3", "text", BoundValue::Prompt),
    bind("92:4", "text", BoundValue::NegativePrompt),
    bind("92:11", "noise_seed", BoundValue::SeedStageOne),
    bind("92:67", "noise_seed", BoundValue::SeedStageTwo),
    bind("92:62", "value", BoundValue::FrameCount),
    bind("92:9", "steps", BoundValue::Steps),
    bind("92:47", "cfg", BoundValue::Cfg),
    bind("92:22", "frame_rate", BoundValue::FrameRate),
    bind("92:51", "frame_rate", BoundValue::FrameRate),
    bind("92:97", "fps", BoundValue::FrameRate),
];

/// Two-stage layout where the model also generates the soundtrack
/// (`LTXVEmptyLatentAudio` at 92:51).
const GENERATED_AUDIO_BINDINGS: &[Binding] = &[
    bind("98", "image", BoundValue::InputImage),
    bind("102", "resize_type.width", BoundValue::Width),
    bind("102", "resize_type.height", BoundValue::Height),
    bind("92:3", "text", BoundValue::Prompt),
    bind("92:4", "text", BoundValue::NegativePrompt),
    bind("92:11", "noise_seed", BoundValue::SeedStageOne),
    bind("92:67", "noise_seed", BoundValue::SeedStageTwo),
    bind("92:62", "value", BoundValue::FrameCount),
    bind("92:9", "steps", BoundValue::Steps),
    bind("92:47", "cfg", BoundValue::Cfg),
    bind("92:22", "frame_rate", BoundValue::FrameRate),
    bind("92:51", "frame_rate", BoundValue::FrameRate),
    bind("92:97", "fps", BoundValue::FrameRate),
    bind("92:99", "img_compression", BoundValue::ImgCompression),
    bind("92:107", "strength", BoundValue::StrengthFirst),
    bind("92:108", "strength", BoundValue::StrengthSecond),
];

/// Two-stage layout conditioned on an uploaded track: `LoadAudio` at 120
/// feeds the audio VAE encoder at 92:121 instead of an empty latent.
const CUSTOM_AUDIO_BINDINGS: &[Binding] = &[
    bind("98", "image", BoundValue::InputImage),
    bind("120", "audio", BoundValue::InputAudio),
    bind("102", "resize_type.width", BoundValue::Width),
    bind("102", "resize_type.height", BoundValue::Height),
    bind("92:3", "text", BoundValue::Prompt),
    bind("92:4", "text", BoundValue::NegativePrompt),
    bind("92:11", "noise_seed", BoundValue::SeedStageOne),
    bind("92:67", "noise_seed", BoundValue::SeedStageTwo),
    bind("92:62", "value", BoundValue::FrameCount),
    bind("92:9", "steps", BoundValue::Steps),
    bind("92:47", "cfg", BoundValue::Cfg),
    bind("92:22", "frame_rate", BoundValue::FrameRate),
    bind("92:121", "frame_rate", BoundValue::FrameRate),
    bind("92:97", "fps", BoundValue::FrameRate),
    bind("92:99", "img_compression", BoundValue::ImgCompression),
    bind("92:107", "strength", BoundValue::StrengthFirst),
    bind("92:108", "strength", BoundValue::StrengthSecond),
];

// ---------------------------------------------------------------------------
// Binder
// ---------------------------------------------------------------------------

/// Outcome of applying a binder to a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingReport {
    /// Bindings written to the graph.
    pub applied: Vec<Binding>,
    /// Bindings whose node is absent from the template.
    pub skipped: Vec<Binding>,
}

/// Applies one mode's binding table to a workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowBinder {
    mode: GenerationMode,
    bindings: &'static [Binding],
}

impl WorkflowBinder {
    pub fn for_mode(mode: GenerationMode) -> Self {
        let bindings = match mode {
            GenerationMode::GeneratedAudio => GENERATED_AUDIO_BINDINGS,
            GenerationMode::CustomAudio => CUSTOM_AUDIO_BINDINGS,
            GenerationMode::Legacy => LEGACY_BINDINGS,
        };
        Self { mode, bindings }
    }

    pub fn mode(&self) -> GenerationMode {
        self.mode
    }

    pub fn bindings(&self) -> &'static [Binding] {
        self.bindings
    }

    /// Write every binding of this mode into `graph`.
    pub fn apply(
        &self,
        graph: &mut WorkflowGraph,
        params: &ResolvedParameters,
        files: &InputFiles,
    ) -> BindingReport {
        let mut report = BindingReport::default();

        for binding in self.bindings {
            let Some(value) = resolve_value(binding.value, params, files) else {
                report.skipped.push(*binding);
                continue;
            };
            if graph.set_input(binding.node_id, binding.field, value) {
                tracing::debug!(
                    node_id = binding.node_id,
                    field = binding.field,
                    "Bound workflow input",
                );
                report.applied.push(*binding);
            } else {
                report.skipped.push(*binding);
            }
        }

        if !report.skipped.is_empty() {
            tracing::warn!(
                mode = %self.mode,
                skipped = report.skipped.len(),
                "Workflow template lacks some bound nodes; they were left unchanged",
            );
        }
        tracing::info!(
            mode = %self.mode,
            applied = report.applied.len(),
            "Workflow parameters applied",
        );

        report
    }
}

fn resolve_value(value: BoundValue, params: &ResolvedParameters, files: &InputFiles) -> Option<Value> {
    let v = match value {
        BoundValue::InputImage => json!(files.image),
        BoundValue::InputAudio => Value::String(files.audio.clone()?),
        BoundValue::Prompt => json!(params.prompt),
        BoundValue::NegativePrompt => json!(params.negative_prompt),
        BoundValue::Width => json!(params.width),
        BoundValue::Height => json!(params.height),
        BoundValue::FrameCount => json!(params.frame_count),
        BoundValue::Steps => json!(params.steps),
        BoundValue::Cfg => json!(params.cfg),
        BoundValue::FrameRate => json!(params.fps),
        BoundValue::ImgCompression => json!(params.img_compression),
        BoundValue::StrengthFirst => json!(params.i2v_strength_first),
        BoundValue::StrengthSecond => json!(params.i2v_strength_second),
        BoundValue::SeedStageOne => json!(params.seed),
        BoundValue::SeedStageTwo => json!(params.stage_two_seed()),
    };
    Some(v)
}
