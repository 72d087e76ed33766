//! Liveness and timing emission.
//!
//! The engine reports a heartbeat at startup (tagged with the invocation
//! mode), one per successfully processed message, and two durations per
//! invocation: compute-only and total wall time. Sinks must not fail; a sink
//! that cannot deliver drops the event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the process was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    SingleShot,
    ContinuousLoop,
    BatchInvoked,
}

impl InvocationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            InvocationMode::SingleShot => "single_shot",
            InvocationMode::ContinuousLoop => "continuous_loop",
            InvocationMode::BatchInvoked => "batch_invoked",
        }
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Liveness event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Heartbeat {
    /// Process started in the given mode.
    Started { mode: InvocationMode },
    /// One input unit was processed and committed.
    Processed { lineage_id: Option<String> },
}

/// Names of the two per-invocation timers.
pub const COMPUTE_TIMER: &str = "compute";
pub const TOTAL_TIMER: &str = "total";

/// Destination for heartbeats and timings.
pub trait MetricsSink: Send + Sync {
    fn heartbeat(&self, event: Heartbeat);

    fn duration(&self, name: &str, elapsed: Duration);
}

/// Emits metrics as log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn heartbeat(&self, event: Heartbeat) {
        match event {
            Heartbeat::Started { mode } => {
                tracing::info!(mode = %mode, "heartbeat: {}", mode);
            }
            Heartbeat::Processed { lineage_id } => {
                tracing::info!(lineage_id = ?lineage_id, "heartbeat: processed");
            }
        }
    }

    fn duration(&self, name: &str, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        tracing::info!(timer = name, elapsed_ms = ms, "timed_execution {} {:.3} ms", name, ms);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    inner: Arc<Mutex<Recorded>>,
}

#[derive(Debug, Default)]
struct Recorded {
    heartbeats: Vec<Heartbeat>,
    durations: Vec<(String, Duration)>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeats(&self) -> Vec<Heartbeat> {
        self.with(|r| r.heartbeats.clone())
    }

    /// Recorded durations for one timer name.
    pub fn durations(&self, name: &str) -> Vec<Duration> {
        self.with(|r| {
            r.durations
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, d)| *d)
                .collect()
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl MetricsSink for RecordingMetrics {
    fn heartbeat(&self, event: Heartbeat) {
        self.with(|r| r.heartbeats.push(event));
    }

    fn duration(&self, name: &str, elapsed: Duration) {
        self.with(|r| r.durations.push((name.to_string(), elapsed)));
    }
}
