//! Pylon relay - a passthrough pipeline component.
//!
//! Forwards every input envelope unchanged through the engine, so a
//! deployment can be smoke-tested end to end (resolution, lineage, check-in,
//! commit) without any user compute. Configuration comes from `PYLON_CONFIG`
//! and the environment.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use pylon_core::config::{ConfigSource, EnvConfigSource};
use pylon_core::engine::{cancel_on_shutdown_signal, ExecutionResult, InvocationBatch};
use pylon_core::io::MemoryRegistry;
use pylon_core::observability;
use pylon_core::{ComponentKind, ConfigMap, Envelope, ExecutionEngine, UnitOutcome};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pylon passthrough pipeline component")]
struct Args {
    /// Component shape.
    #[arg(long, value_enum, default_value_t = Kind::Pipeline)]
    kind: Kind,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Pipeline,
    Sink,
}

impl From<Kind> for ComponentKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Pipeline => ComponentKind::Pipeline,
            Kind::Sink => ComponentKind::Sink,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Process a single unit of work and exit.
    Once {
        /// Fetch up to PYLON_MAX_MESSAGES deliveries and commit them together.
        #[arg(long)]
        batch: bool,
    },
    /// Loop until SIGINT or SIGTERM.
    Forever,
    /// Process an invocation batch document (`{"records": [...]}`).
    Batch {
        /// Path to the invocation JSON file.
        file: PathBuf,
    },
}

fn passthrough(message: Option<&Envelope>, _config: &ConfigMap) -> anyhow::Result<ExecutionResult> {
    Ok(message
        .map(|m| ExecutionResult::single(forwarded(m)))
        .unwrap_or_default())
}

/// Copy of the input without engine-owned fields.
fn forwarded(message: &Envelope) -> Envelope {
    let mut out = Envelope::new(message.object_kind, message.mime_type.clone(), message.body.clone());
    out.extra = message.extra.clone();
    out
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            // Tracing may not be up yet when configuration fails.
            eprintln!("pylon-relay: {:#}", e);
            ExitCode::from(2)
        }
    }
}

/// `Ok(false)` when the processed work did not fully succeed.
async fn run(args: Args) -> anyhow::Result<bool> {
    let config = {
        // Config resolution warns about deprecated and unknown keys before
        // the configured subscriber exists.
        let bootstrap = observability::bootstrap_dispatch(std::io::stderr);
        let _guard = tracing::dispatcher::set_default(&bootstrap);
        EnvConfigSource::new()
            .load()
            .await
            .context("loading configuration")?
    };
    observability::init_tracing(config.log_level(), config.log_format()?);

    let registry = MemoryRegistry::new();
    let engine = ExecutionEngine::builder(args.kind.into())
        .config(config)
        .compute_fn(passthrough)
        .open_transports(&registry)
        .await?
        .build()?;
    tracing::info!(
        component = %engine.component_name(),
        version = %engine.component_version(),
        kind = ?engine.kind(),
        "pylon-relay starting"
    );

    match args.mode {
        Mode::Once { batch } => {
            let outcome = if batch {
                engine.run_batch_once().await
            } else {
                engine.run_once().await
            };
            Ok(!matches!(outcome, UnitOutcome::Failed { .. }))
        }
        Mode::Forever => {
            let cancel = CancellationToken::new();
            cancel_on_shutdown_signal(cancel.clone());
            let stats = engine.run_forever(cancel).await;
            Ok(stats.failed == 0)
        }
        Mode::Batch { file } => {
            let raw = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let batch = InvocationBatch::parse(&raw)?;
            let report = engine.handle_invocation_batch(batch.records).await;
            for member in &report.members {
                if let Err(e) = &member.result {
                    tracing::warn!(id = %member.id, error_kind = %e.kind(), "record failed");
                }
            }
            println!("{}", serde_json::json!({ "batchItemFailures": report.failed_ids() }));
            Ok(report.succeeded())
        }
    }
}
