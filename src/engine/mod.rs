//! Execution engine for pipeline components.
//!
//! ```text
//!   InputSource ──fetch──▶ decode + resolve ──▶ compute ──▶ stamp + check-in
//!        ▲                                                       │
//!        └──────── delete (commit) ◀── publish ◀── lineage ◀─────┘
//! ```
//!
//! Three drive modes share one per-message pipeline:
//! - [`ExecutionEngine::run_once`]: one unit, then return.
//! - [`ExecutionEngine::run_forever`]: loop until cancelled.
//! - [`ExecutionEngine::handle_invocation_batch`]: host-delivered records.
//!
//! [`ExecutionEngine::run_batch_once`] fetches up to `PYLON_MAX_MESSAGES`
//! deliveries and commits them together.

pub mod batch;
pub mod compute;
pub mod recovery;
pub mod runner;
pub mod state;

pub use batch::{BatchReport, InvocationBatch, InvocationRecord, MemberOutcome, UnitOfWork};
pub use compute::{Compute, ExecutionResult, FnCompute};
pub use recovery::with_recovery;
pub use runner::{EngineBuilder, ExecutionEngine, LoopStats, UnitOutcome, DURATION_SECONDS};
pub use state::{EngineState, StateMachine};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on Ctrl-C or SIGTERM.
///
/// The running unit always completes; [`ExecutionEngine::run_forever`] checks
/// the token between units.
pub fn cancel_on_shutdown_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping after the current unit");
        token.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
