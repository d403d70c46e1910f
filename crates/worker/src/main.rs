//! `ltxv-worker` -- runs one LTX video generation job.
//!
//! Reads a job document, drives it through the pipeline against the
//! local ComfyUI instance, and prints the result JSON on stdout. Logs go
//! to stderr.
//!
//! # Environment variables
//!
//! | Variable         | Required | Default | Description                              |
//! |------------------|----------|---------|------------------------------------------|
//! | `JOB_INPUT_PATH` | no       | stdin   | File containing the job document         |
//! | `LOG_FORMAT`     | no       | `text`  | `json` for structured log lines          |
//! | `RUST_LOG`       | no       | info    | Standard `EnvFilter` directives          |
//!
//! Pipeline settings (`COMFYUI_URL`, `WORKFLOW_DIR`, ...) are documented
//! on `PipelineConfig::from_env`.

use std::path::PathBuf;
use std::process::ExitCode;

use ltxv_pipeline::config::PipelineConfig;
use ltxv_pipeline::pipeline::Pipeline;
use ltxv_pipeline::result::{JobFailure, JobResult};
use ltxv_worker::job;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "ltxv_worker=info,ltxv_pipeline=info,ltxv_comfyui=info,ltxv_core=info";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let result = run().await;
    println!("{}", result.to_value());

    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run() -> JobResult {
    let job_path = std::env::var("JOB_INPUT_PATH").ok().map(PathBuf::from);
    let document = match job::read_job_source(job_path.as_deref())
        .await
        .and_then(|raw| job::parse_job_document(&raw))
    {
        Ok(doc) => doc,
        Err(e) => return setup_failure(e),
    };

    let config = PipelineConfig::from_env();
    tracing::info!(
        job_id = document.id.as_deref().unwrap_or("-"),
        comfyui_url = %config.comfyui_url,
        workflow_dir = %config.workflow_dir.display(),
        "Worker starting",
    );

    let pipeline = match Pipeline::from_config(config) {
        Ok(p) => p,
        Err(e) => return setup_failure(anyhow::Error::new(e).context("failed to build ComfyUI client")),
    };

    let cancel = CancellationToken::new();
    let shutdown = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let result = pipeline.run_with_cancel(&document.input, &cancel).await;
    shutdown.abort();
    result
}

/// Failure result for problems before the pipeline could start.
fn setup_failure(err: anyhow::Error) -> JobResult {
    tracing::error!(error = %err, "Worker setup failed");
    JobResult::Failure(JobFailure {
        error: err.to_string(),
        traceback: format!("{err:?}"),
        elapsed_time: 0.0,
    })
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), cancelling job");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, cancelling job");
        }
    }
}
