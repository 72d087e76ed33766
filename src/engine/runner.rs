//! The execution engine.
//!
//! One unit of work is fully fetched, resolved, invoked, published and
//! committed before the next fetch. Every per-unit failure is contained here:
//! it is logged with its kind and context, the input is left unacknowledged,
//! and the caller gets a [`UnitOutcome::Failed`].

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::compute::{Compute, ExecutionResult, FnCompute};
use super::recovery::with_recovery;
use super::state::{EngineState, StateMachine};
use crate::envelope::{Envelope, ObjectKind, EMPTY_BODY_PLACEHOLDER};
use crate::io::{self, BlobStore, InputSource, LineageStore, LogLineageStore, MemoryRegistry, OutputSink};
use crate::lineage::LineageTracker;
use crate::metrics::{Heartbeat, InvocationMode, MetricsSink, TracingMetrics, COMPUTE_TIMER, TOTAL_TIMER};
use crate::payload::{CheckIn, PayloadResolver};
use crate::types::{ComponentKind, Config, ConfigMap, Error, LineageId, Result};

const UNKNOWN_COMPONENT: &str = "unknown";

/// Lineage metadata key holding compute time.
pub const DURATION_SECONDS: &str = "duration_seconds";

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one unit of work.
#[derive(Debug)]
pub enum UnitOutcome {
    /// Every output and lineage record landed; the input was acknowledged.
    Committed {
        /// One per invocation; empty for sink components.
        lineage_ids: Vec<LineageId>,
        outputs: usize,
    },
    /// The input source had nothing to offer.
    Empty,
    /// The unit was abandoned and its input left for redelivery.
    Failed { error: Error },
}

impl UnitOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, UnitOutcome::Committed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            UnitOutcome::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Counters reported when the continuous loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub committed: usize,
    pub failed: usize,
    pub empty: usize,
}

/// One successfully processed message.
#[derive(Debug, Clone)]
pub(super) struct Processed {
    pub(super) lineage_id: Option<LineageId>,
    pub(super) outputs: usize,
}

/// Identifiers of the inputs of the unit in flight, for failure logs.
#[derive(Debug, Default)]
pub(super) struct UnitContext {
    pub(super) input_lineage_ids: Vec<LineageId>,
    pub(super) inputs: Vec<String>,
}

// =============================================================================
// Engine
// =============================================================================

/// Drives a compute function through the message lifecycle.
pub struct ExecutionEngine {
    kind: ComponentKind,
    config: Config,
    compute: Arc<dyn Compute>,
    pub(super) input: Option<Arc<dyn InputSource>>,
    output: Option<Arc<dyn OutputSink>>,
    lineage_store: Arc<dyn LineageStore>,
    resolver: PayloadResolver,
    check_in: Option<CheckIn>,
    pub(super) metrics: Arc<dyn MetricsSink>,
    tracker: LineageTracker,
    component_name: String,
    component_version: String,
    lineage_attrs: HashMap<String, Value>,
    loop_sleep: Duration,
    pub(super) max_messages: usize,
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("kind", &self.kind)
            .field("component_name", &self.component_name)
            .field("component_version", &self.component_version)
            .field("check_in", &self.check_in)
            .field("loop_sleep", &self.loop_sleep)
            .field("max_messages", &self.max_messages)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    pub fn builder(kind: ComponentKind) -> EngineBuilder {
        EngineBuilder::new(kind)
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn component_version(&self) -> &str {
        &self.component_version
    }

    /// Single fetch-process-commit cycle.
    pub async fn run_once(&self) -> UnitOutcome {
        self.metrics.heartbeat(Heartbeat::Started {
            mode: InvocationMode::SingleShot,
        });
        self.cycle().await
    }

    /// Repeat [`run_once`](Self::run_once) cycles until `cancel` fires.
    ///
    /// Sleeps for `PYLON_LOOP_SLEEP_SECONDS` when the input is empty, after a
    /// failed unit, and between cycles of a source component. Cancellation is honoured between
    /// units and during the sleep, never in the middle of a unit.
    pub async fn run_forever(&self, cancel: CancellationToken) -> LoopStats {
        self.metrics.heartbeat(Heartbeat::Started {
            mode: InvocationMode::ContinuousLoop,
        });
        let mut stats = LoopStats::default();

        while !cancel.is_cancelled() {
            let idle = match self.cycle().await {
                UnitOutcome::Empty => {
                    stats.empty += 1;
                    true
                }
                UnitOutcome::Committed { .. } => {
                    stats.committed += 1;
                    !self.kind.has_input()
                }
                // A failed unit is redelivered; back off before refetching it.
                UnitOutcome::Failed { .. } => {
                    stats.failed += 1;
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.loop_sleep) => {}
                }
            }
        }

        tracing::info!(
            committed = stats.committed,
            failed = stats.failed,
            empty = stats.empty,
            "continuous loop stopped"
        );
        stats
    }

    /// One unit of work via `fetch_one`.
    pub(super) async fn cycle(&self) -> UnitOutcome {
        async {
            let started = Instant::now();
            let mut sm = StateMachine::new();
            let mut ctx = UnitContext::default();

            let result: Result<Option<Processed>> = async {
                sm.transition(EngineState::Fetching)?;
                let delivery = match &self.input {
                    Some(input) => match input.fetch_one().await? {
                        Some(delivery) => Some(delivery),
                        None => {
                            sm.transition(EngineState::Idle)?;
                            return Ok(None);
                        }
                    },
                    None => None,
                };
                if let Some(delivery) = &delivery {
                    ctx.inputs.push(delivery.handle.to_string());
                }

                let payload = delivery.as_ref().map(|d| d.payload.as_slice());
                let processed = self.process_message(&mut sm, &mut ctx, payload).await?;

                sm.transition(EngineState::Committing)?;
                if let (Some(input), Some(delivery)) = (&self.input, &delivery) {
                    input.delete(std::slice::from_ref(&delivery.handle)).await?;
                }
                sm.transition(EngineState::Idle)?;
                Ok(Some(processed))
            }
            .await;

            let processed = match result {
                Ok(None) => return UnitOutcome::Empty,
                Ok(Some(processed)) => Ok(vec![processed]),
                Err(error) => Err(error),
            };
            UnitOutcome::from_processed(self.settle(&mut sm, &ctx, started, processed))
        }
        .instrument(self.unit_span())
        .await
    }

    /// Resolve, invoke and publish one message. `payload` is `None` for
    /// source components.
    pub(super) async fn process_message(
        &self,
        sm: &mut StateMachine,
        ctx: &mut UnitContext,
        payload: Option<&[u8]>,
    ) -> Result<Processed> {
        sm.transition(EngineState::Resolving)?;
        let message = match payload {
            Some(bytes) => {
                let envelope = self.resolver.decode_and_resolve(bytes).await?;
                if let Some(id) = &envelope.lineage_id {
                    tracing::Span::current().record("input_lineage_id", id.as_str());
                    ctx.input_lineage_ids.push(id.clone());
                }
                Some(envelope)
            }
            None => None,
        };

        sm.transition(EngineState::Invoking)?;
        let parent = message.as_ref().and_then(|m| m.lineage_id.clone());
        let lineage_id = if self.kind.has_output() {
            let id = self.tracker.next_id(parent.as_ref());
            tracing::Span::current().record("lineage_id", id.as_str());
            Some(id)
        } else {
            None
        };

        let compute_started = Instant::now();
        let result = self.invoke(message.as_ref());
        let compute_elapsed = compute_started.elapsed();
        self.metrics.duration(COMPUTE_TIMER, compute_elapsed);
        let result = result?;

        let Some(lineage_id) = lineage_id else {
            if !result.outputs.is_empty() {
                tracing::warn!(
                    outputs = result.outputs.len(),
                    "component produced an output, but no output has been specified"
                );
            }
            return Ok(Processed {
                lineage_id: None,
                outputs: 0,
            });
        };

        sm.transition(EngineState::Publishing)?;
        let parents: Vec<LineageId> = parent.into_iter().collect();
        let outputs = self
            .publish(result, &lineage_id, &parents, compute_elapsed)
            .await?;
        Ok(Processed {
            lineage_id: Some(lineage_id),
            outputs,
        })
    }

    fn invoke(&self, message: Option<&Envelope>) -> Result<ExecutionResult> {
        let config: &ConfigMap = self.config.as_map();
        with_recovery(
            || {
                self.compute
                    .invoke(message, config)
                    .map_err(|e| Error::compute(format!("{:#}", e)))
            },
            "compute",
        )
    }

    /// Stamp outputs, record lineage, then publish outputs in order.
    async fn publish(
        &self,
        result: ExecutionResult,
        lineage_id: &LineageId,
        parents: &[LineageId],
        compute_elapsed: Duration,
    ) -> Result<usize> {
        let output = self
            .output
            .as_ref()
            .ok_or_else(|| Error::internal("publishing without an output sink"))?;

        let ExecutionResult { outputs, metadata } = result;
        let mut stamped = Vec::with_capacity(outputs.len());
        for envelope in outputs {
            stamped.push(self.stamp(envelope, lineage_id).await?);
        }

        let record = self.tracker.build_record(
            lineage_id.clone(),
            parents,
            &self.component_name,
            &self.component_version,
            self.lineage_metadata(metadata, compute_elapsed),
        );
        self.lineage_store
            .record(&record)
            .await
            .map_err(|e| as_publish(e, "lineage record"))?;

        for envelope in &stamped {
            output
                .publish(envelope)
                .await
                .map_err(|e| as_publish(e, "output envelope"))?;
        }

        if stamped.is_empty() {
            tracing::warn!("component produced no output messages");
        }
        tracing::info!(n_out_messages = stamped.len(), "outputs_published");
        Ok(stamped.len())
    }

    /// Apply engine-owned fields to a compute output.
    async fn stamp(&self, mut envelope: Envelope, lineage_id: &LineageId) -> Result<Envelope> {
        envelope.lineage_id = Some(lineage_id.clone());

        if envelope.object_kind == ObjectKind::DataAsset && !envelope.is_external() {
            let mut asset = envelope
                .to_data_asset()
                .map_err(|e| Error::compute(format!("invalid data asset output: {}", e)))?;
            asset.stamp_lineage(lineage_id);
            envelope.data_asset_name = Some(asset.name.clone());
            envelope.data_asset_country = Some(asset.country.clone());
            envelope.body = asset.to_json()?;
        }

        if !envelope.is_external() && envelope.body.is_empty() {
            envelope.body = EMPTY_BODY_PLACEHOLDER.to_string();
        }
        envelope
            .validate()
            .map_err(|e| Error::compute(format!("invalid output envelope: {}", e)))?;

        if let Some(check_in) = &self.check_in {
            check_in.apply(&mut envelope).await?;
        }
        Ok(envelope)
    }

    /// `LINEAGE_ATTRS`, then compute time, then compute metadata (which wins
    /// on collision).
    fn lineage_metadata(
        &self,
        metadata: Option<HashMap<String, Value>>,
        compute_elapsed: Duration,
    ) -> HashMap<String, Value> {
        let mut merged = self.lineage_attrs.clone();
        merged.insert(
            DURATION_SECONDS.to_string(),
            Value::from(compute_elapsed.as_secs_f64()),
        );
        merged.extend(metadata.unwrap_or_default());
        merged
    }

    /// Close out a unit: timings, heartbeats, failure logging.
    pub(super) fn settle(
        &self,
        sm: &mut StateMachine,
        ctx: &UnitContext,
        started: Instant,
        result: Result<Vec<Processed>>,
    ) -> Result<Vec<Processed>> {
        self.metrics.duration(TOTAL_TIMER, started.elapsed());
        match &result {
            Ok(processed) => {
                for p in processed {
                    self.metrics.heartbeat(Heartbeat::Processed {
                        lineage_id: p.lineage_id.as_ref().map(LineageId::to_string),
                    });
                }
            }
            Err(error) => {
                let failed_in = sm.state();
                sm.fail();
                self.log_failure(error, ctx, failed_in);
            }
        }
        result
    }

    fn log_failure(&self, error: &Error, ctx: &UnitContext, failed_in: EngineState) {
        let input_lineage_id = ctx
            .input_lineage_ids
            .iter()
            .map(LineageId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        tracing::error!(
            error_kind = %error.kind(),
            component = %self.component_name,
            version = %self.component_version,
            input_lineage_id = %input_lineage_id,
            inputs = ?ctx.inputs,
            failed_in = %failed_in,
            "unit failed, input left for redelivery: {}: {}",
            error.kind(),
            error
        );
    }

    pub(super) fn unit_span(&self) -> tracing::Span {
        tracing::info_span!(
            "unit",
            component = %self.component_name,
            version = %self.component_version,
            input_lineage_id = tracing::field::Empty,
            lineage_id = tracing::field::Empty,
        )
    }
}

impl UnitOutcome {
    pub(super) fn from_processed(result: Result<Vec<Processed>>) -> Self {
        match result {
            Ok(processed) => UnitOutcome::Committed {
                outputs: processed.iter().map(|p| p.outputs).sum(),
                lineage_ids: processed.into_iter().filter_map(|p| p.lineage_id).collect(),
            },
            Err(error) => UnitOutcome::Failed { error },
        }
    }
}

fn as_publish(error: Error, what: &str) -> Error {
    match error {
        Error::Publish(_) => error,
        other => Error::publish(format!("{} not delivered: {}", what, other)),
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Assembles an [`ExecutionEngine`] and validates it against its
/// configuration.
pub struct EngineBuilder {
    kind: ComponentKind,
    config: Config,
    compute: Option<Arc<dyn Compute>>,
    input: Option<Arc<dyn InputSource>>,
    output: Option<Arc<dyn OutputSink>>,
    blob_store: Option<Arc<dyn BlobStore>>,
    lineage_store: Option<Arc<dyn LineageStore>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("compute", &self.compute.is_some())
            .field("input", &self.input.is_some())
            .field("output", &self.output.is_some())
            .field("blob_store", &self.blob_store.is_some())
            .finish_non_exhaustive()
    }
}

impl EngineBuilder {
    pub fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            config: Config::default(),
            compute: None,
            input: None,
            output: None,
            blob_store: None,
            lineage_store: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn compute(mut self, compute: impl Compute + 'static) -> Self {
        self.compute = Some(Arc::new(compute));
        self
    }

    /// Use a plain function or closure as the compute.
    pub fn compute_fn<F>(self, f: F) -> Self
    where
        F: Fn(Option<&Envelope>, &ConfigMap) -> anyhow::Result<ExecutionResult> + Send + Sync + 'static,
    {
        self.compute(FnCompute(f))
    }

    pub fn input(mut self, input: Arc<dyn InputSource>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn output(mut self, output: Arc<dyn OutputSink>) -> Self {
        self.output = Some(output);
        self
    }

    /// Blob store used to resolve `EXTERNAL` inputs and, when
    /// `PYLON_STORE_DESTINATION` is set, to check in large outputs.
    pub fn blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn lineage_store(mut self, store: Arc<dyn LineageStore>) -> Self {
        self.lineage_store = Some(store);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Open the transports named by the configuration.
    pub async fn open_transports(mut self, registry: &MemoryRegistry) -> Result<Self> {
        if self.kind.has_input() {
            if let Some(reference) = self.config.input_source_name() {
                self.input = Some(io::open_input(reference, registry).await?);
            }
        }
        if self.kind.has_output() {
            if let Some(reference) = self.config.output_sink_ref() {
                self.output = Some(io::open_output(reference, registry).await?);
            }
        }
        if let Some(reference) = self.config.store_destination() {
            self.blob_store = Some(io::open_blob_store(reference, registry).await?);
        }
        Ok(self)
    }

    /// Validate and build. Every failure here is a `ConfigError`.
    pub fn build(self) -> Result<ExecutionEngine> {
        let config = self.config;
        config.validate_for(self.kind)?;

        let compute = self
            .compute
            .ok_or_else(|| Error::config("no compute function supplied"))?;

        let input = match (self.kind.has_input(), self.input) {
            (true, None) => {
                return Err(Error::config(format!("{:?} component has no input source", self.kind)))
            }
            (false, Some(_)) => {
                tracing::warn!(kind = ?self.kind, "input source ignored for component without input");
                None
            }
            (_, input) => input,
        };
        let output = match (self.kind.has_output(), self.output) {
            (true, None) => {
                return Err(Error::config(format!("{:?} component has no output sink", self.kind)))
            }
            (false, Some(_)) => {
                tracing::warn!(kind = ?self.kind, "output sink ignored for component without output");
                None
            }
            (_, output) => output,
        };

        let component_name = identity(config.component_name(), "COMPONENT_NAME");
        let component_version = identity(config.component_version(), "COMPONENT_VERSION");

        let check_in = match (&self.blob_store, config.store_destination()) {
            (Some(store), Some(_)) => Some(CheckIn::new(store.clone(), config.store_min_message_bytes()?)),
            _ => None,
        };
        let resolver = self
            .blob_store
            .map(PayloadResolver::new)
            .unwrap_or_else(PayloadResolver::without_store);

        Ok(ExecutionEngine {
            kind: self.kind,
            compute,
            input,
            output,
            lineage_store: self
                .lineage_store
                .unwrap_or_else(|| Arc::new(LogLineageStore)),
            resolver,
            check_in,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(TracingMetrics)),
            tracker: LineageTracker::new(),
            component_name,
            component_version,
            lineage_attrs: config.lineage_attrs()?,
            loop_sleep: config.loop_sleep()?,
            max_messages: config.max_messages()?,
            config,
        })
    }
}

fn identity(value: Option<&str>, key: &str) -> String {
    match value {
        Some(v) => v.to_string(),
        None => {
            tracing::warn!(key, "component identity not configured, using \"unknown\"");
            UNKNOWN_COMPONENT.to_string()
        }
    }
}
