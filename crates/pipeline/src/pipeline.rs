//! One job, end to end.
//!
//! Local work (request parsing, media decoding, parameter resolution,
//! template binding) runs before the engine is contacted, so a bad
//! request fails fast without touching ComfyUI. Every failure is turned
//! into a [`JobResult::Failure`]; nothing escapes [`Pipeline::run`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use ltxv_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use ltxv_comfyui::engine::ComfyUIEngine;
use ltxv_comfyui::events::JobEvent;
use ltxv_comfyui::readiness::wait_until_ready;
use ltxv_core::artifact::{ArtifactResolver, ResolvedArtifact};
use ltxv_core::binder::{InputFiles, WorkflowBinder};
use ltxv_core::clock::{Clock, TokioClock};
use ltxv_core::error::CoreError;
use ltxv_core::ffmpeg::{AudioToolkit, FfmpegToolkit};
use ltxv_core::media::{
    self, INPUT_AUDIO_STEM, INPUT_AUDIO_WAV_FILENAME, INPUT_IMAGE_FILENAME,
};
use ltxv_core::params::{self, GenerationMode, ResolvedParameters};
use ltxv_core::request::JobRequest;
use ltxv_core::workflow::WorkflowGraph;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::poller::{CompletionPoller, ExecutionOutcome};
use crate::result::{JobResult, JobSuccess};

/// Capacity of the job event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Prompt characters shown in the start-of-job log line.
const PROMPT_LOG_CHARS: usize = 80;
const NEGATIVE_PROMPT_LOG_CHARS: usize = 50;

/// Allowance for coarse filesystem timestamps when matching output files
/// against the job's start time.
const OUTPUT_MTIME_SLACK: Duration = Duration::from_secs(2);

/// Runs generation jobs against one ComfyUI instance.
pub struct Pipeline {
    config: PipelineConfig,
    engine: Arc<dyn ComfyUIEngine>,
    clock: Arc<dyn Clock>,
    audio: Arc<dyn AudioToolkit>,
    events: broadcast::Sender<JobEvent>,
}

/// Everything a successful run produced before it is encoded.
struct Completed {
    params: ResolvedParameters,
    artifact: ResolvedArtifact,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        engine: Arc<dyn ComfyUIEngine>,
        clock: Arc<dyn Clock>,
        audio: Arc<dyn AudioToolkit>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            engine,
            clock,
            audio,
            events,
        }
    }

    /// Pipeline talking HTTP to `config.comfyui_url`, on wall-clock time,
    /// with the system `ffmpeg`/`ffprobe`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ComfyUIApiError> {
        let api = ComfyUIApi::new(config.comfyui_url.clone(), config.http_timeout)?;
        Ok(Self::new(
            config,
            Arc::new(api),
            Arc::new(TokioClock::new()),
            Arc::new(FfmpegToolkit),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Receive [`JobEvent`]s for subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Run one job with no external cancellation.
    pub async fn run(&self, input: &Value) -> JobResult {
        self.run_with_cancel(input, &CancellationToken::new()).await
    }

    /// Run one job; triggering `cancel` abandons it at the next
    /// suspension point.
    pub async fn run_with_cancel(&self, input: &Value, cancel: &CancellationToken) -> JobResult {
        let start = self.clock.now();
        tracing::info!("Starting LTX video generation job");

        let outcome = self.execute(input, cancel).await;
        let elapsed = self.clock.now().saturating_sub(start).as_secs_f64();

        match outcome {
            Ok(Completed { params, artifact }) => {
                tracing::info!(
                    elapsed_secs = elapsed,
                    seed = params.seed,
                    mode = %params.mode,
                    video_bytes = artifact.bytes.len(),
                    video_path = %artifact.path.display(),
                    video_modified_at = ?artifact.modified_at,
                    "Job completed successfully",
                );
                JobResult::Success(JobSuccess {
                    video: media::encode_base64(&artifact.bytes),
                    seed: params.seed,
                    mode: params.mode,
                    parameters: params.echo(),
                    elapsed_time: elapsed,
                })
            }
            Err(err) => {
                tracing::error!(
                    elapsed_secs = elapsed,
                    error_kind = err.kind(),
                    error = %err,
                    "Job failed",
                );
                let _ = self.events.send(JobEvent::Failed {
                    prompt_id: err.prompt_id().map(str::to_string),
                    error: err.to_string(),
                });
                JobResult::failure(&err, elapsed)
            }
        }
    }

    async fn execute(
        &self,
        input: &Value,
        cancel: &CancellationToken,
    ) -> Result<Completed, PipelineError> {
        let started_at = SystemTime::now();
        let mut request = JobRequest::from_value(input)?;
        if request.timeout.is_none() {
            request.timeout = Some(self.config.default_timeout.as_secs_f64());
        }

        let mode = params::select_mode(&request);
        params::validate_required(&request, mode)?;
        log_request(&request, mode);

        let image = request
            .image_payload()
            .ok_or(PipelineError::MissingField("image"))?;
        let image = media::decode_payload("image", image)?;
        media::write_input_file(&self.config.input_dir, INPUT_IMAGE_FILENAME, &image.bytes).await?;

        let (audio_file, audio_duration) = match mode {
            GenerationMode::CustomAudio => {
                let (file, duration) = self.prepare_audio(&request).await?;
                (Some(file), Some(duration))
            }
            _ => (None, None),
        };

        let params = params::resolve_parameters(&request, mode, audio_duration)?;
        tracing::info!(
            seed = params.seed,
            seed_generated = params.seed_generated,
            frame_count = params.frame_count,
            "Parameters resolved",
        );

        let mut graph = WorkflowGraph::load_for_mode(&self.config.workflow_dir, mode).await?;
        let files = InputFiles {
            image: INPUT_IMAGE_FILENAME.to_string(),
            audio: audio_file,
        };
        WorkflowBinder::for_mode(mode).apply(&mut graph, &params, &files);

        if !wait_until_ready(
            self.engine.as_ref(),
            &self.config.readiness,
            self.clock.as_ref(),
            cancel,
        )
        .await
        {
            return Err(if cancel.is_cancelled() {
                PipelineError::Cancelled
            } else {
                PipelineError::EngineUnavailable
            });
        }
        let _ = self.events.send(JobEvent::EngineReady);

        let submitted = self.engine.submit_workflow(&graph.to_value()).await?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(prompt_id = %prompt_id, queue_number = ?submitted.number, "Prompt queued");
        let _ = self.events.send(JobEvent::Submitted {
            prompt_id: prompt_id.clone(),
        });

        let poller = CompletionPoller::new(
            self.engine.as_ref(),
            self.clock.as_ref(),
            self.config.poller,
            &self.events,
        );
        let outcome = poller.wait(&prompt_id, params.timeout, cancel).await;
        let outputs = match outcome {
            ExecutionOutcome::Outputs(outputs) => {
                let _ = self.events.send(JobEvent::Completed {
                    prompt_id: prompt_id.clone(),
                });
                outputs
            }
            ExecutionOutcome::ExecutionError(message) => {
                return Err(PipelineError::Execution { prompt_id, message });
            }
            ExecutionOutcome::TimedOut => {
                let _ = self.events.send(JobEvent::TimedOut {
                    prompt_id: prompt_id.clone(),
                });
                self.abandon_remote(&prompt_id).await;
                return Err(PipelineError::TimedOut {
                    prompt_id,
                    timeout_secs: params.timeout.as_secs_f64(),
                });
            }
            ExecutionOutcome::Cancelled => {
                self.abandon_remote(&prompt_id).await;
                return Err(PipelineError::Cancelled);
            }
        };

        let scan_cutoff = started_at.checked_sub(OUTPUT_MTIME_SLACK).unwrap_or(started_at);
        let artifact = ArtifactResolver::new(self.config.output_dir.clone())
            .modified_since(scan_cutoff)
            .resolve(&outputs)
            .await?;

        Ok(Completed { params, artifact })
    }

    /// Decode, save and normalise the custom audio track.
    ///
    /// Returns the file name the LoadAudio node should reference and the
    /// track's duration in seconds.
    async fn prepare_audio(&self, request: &JobRequest) -> Result<(String, f64), PipelineError> {
        let payload = request
            .audio_payload()
            .ok_or(PipelineError::MissingField("audio"))?;
        let audio = media::decode_payload("audio", payload)?;
        let ext = media::audio_extension(audio.mime.as_deref(), &audio.bytes);

        let raw_name = format!("{INPUT_AUDIO_STEM}.{ext}");
        let raw_path =
            media::write_input_file(&self.config.input_dir, &raw_name, &audio.bytes).await?;

        let wav_path: PathBuf = self.config.input_dir.join(INPUT_AUDIO_WAV_FILENAME);
        if raw_path != wav_path {
            self.audio
                .normalise_to_wav(&raw_path, &wav_path)
                .await
                .map_err(CoreError::from)?;
        }

        let duration = self
            .audio
            .duration_secs(&wav_path)
            .await
            .map_err(CoreError::from)?;
        tracing::info!(duration_secs = duration, source_format = ext, "Audio track ready");

        Ok((INPUT_AUDIO_WAV_FILENAME.to_string(), duration))
    }

    /// Best-effort removal of an abandoned prompt from the engine.
    async fn abandon_remote(&self, prompt_id: &str) {
        if !self.config.cancel_on_timeout {
            tracing::debug!(prompt_id, "Leaving abandoned prompt on the engine");
            return;
        }
        if let Err(e) = self.engine.cancel_execution(prompt_id).await {
            tracing::warn!(prompt_id, error = %e, "Failed to remove prompt from queue");
        }
        if let Err(e) = self.engine.interrupt().await {
            tracing::warn!(prompt_id, error = %e, "Failed to interrupt execution");
        }
        tracing::info!(prompt_id, "Requested engine-side cancellation");
    }
}

fn log_request(request: &JobRequest, mode: GenerationMode) {
    tracing::info!(
        mode = %mode,
        prompt = %truncate_chars(request.prompt_text().unwrap_or(params::DEFAULT_PROMPT), PROMPT_LOG_CHARS),
        negative_prompt = %truncate_chars(
            request.negative_prompt.as_deref().unwrap_or(params::DEFAULT_NEGATIVE_PROMPT),
            NEGATIVE_PROMPT_LOG_CHARS,
        ),
        width = ?request.width,
        height = ?request.height,
        steps = ?request.steps,
        fps = ?request.fps,
        has_audio = request.audio_payload().is_some(),
        "Job parameters",
    );
}

/// First `max` characters of `text`, with `...` when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
