//! Batched execution.
//!
//! Two shapes: a fetched batch of up to `PYLON_MAX_MESSAGES` deliveries that
//! is committed all-or-nothing, and a request-driven batch handed to the
//! engine by an invoking host, where the host owns acknowledgement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

use super::runner::{ExecutionEngine, Processed, UnitContext, UnitOutcome};
use super::state::{EngineState, StateMachine};
use crate::io::{Delivery, InputSource};
use crate::metrics::{Heartbeat, InvocationMode};
use crate::types::{DeliveryHandle, Error, LineageId, Result};

// =============================================================================
// Fetched batches
// =============================================================================

/// Deliveries fetched together. They are deleted together on
/// [`commit`](Self::commit); dropping an uncommitted unit deletes nothing and
/// leaves every member for redelivery.
pub struct UnitOfWork {
    input: Arc<dyn InputSource>,
    deliveries: Vec<Delivery>,
    committed: bool,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("deliveries", &self.deliveries.len())
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    pub fn new(input: Arc<dyn InputSource>, deliveries: Vec<Delivery>) -> Self {
        Self {
            input,
            deliveries,
            committed: false,
        }
    }

    pub fn deliveries(&self) -> &[Delivery] {
        &self.deliveries
    }

    pub fn handles(&self) -> Vec<DeliveryHandle> {
        self.deliveries.iter().map(|d| d.handle.clone()).collect()
    }

    /// Delete every member from the input source.
    pub async fn commit(mut self) -> Result<()> {
        self.input.delete(&self.handles()).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if !self.committed && !self.deliveries.is_empty() {
            tracing::warn!(
                members = self.deliveries.len(),
                "unit of work abandoned, members left for redelivery"
            );
        }
    }
}

// =============================================================================
// Request-driven batches
// =============================================================================

/// One record of a request-driven batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    /// Host-assigned identifier, echoed back in the report.
    pub id: String,
    /// The encoded envelope, either as a JSON string or inline as an object.
    pub body: serde_json::Value,
}

impl InvocationRecord {
    pub fn new(id: impl Into<String>, body: impl Into<serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }

    /// Wire bytes of the carried envelope.
    pub fn payload(&self) -> Vec<u8> {
        match &self.body {
            serde_json::Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Invocation event: `{"records": [{"id": ..., "body": ...}, ...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationBatch {
    pub records: Vec<InvocationRecord>,
}

impl InvocationBatch {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(|e| Error::schema(format!("invalid invocation batch: {}", e)))
    }
}

/// Per-record result of a request-driven batch.
#[derive(Debug)]
pub struct MemberOutcome {
    pub id: String,
    /// Lineage id assigned on success (`None` for sinks).
    pub result: Result<Option<LineageId>>,
}

impl MemberOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// What the host gets back. It acknowledges the batch only when
/// [`succeeded`](Self::succeeded) is true.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub members: Vec<MemberOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.members.iter().all(MemberOutcome::is_success)
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| !m.is_success())
            .map(|m| m.id.as_str())
            .collect()
    }
}

// =============================================================================
// Engine entry points
// =============================================================================

impl ExecutionEngine {
    /// Fetch up to `PYLON_MAX_MESSAGES` deliveries and process them as one
    /// unit. Stops at the first failing member; nothing is deleted unless
    /// every member succeeded.
    pub async fn run_batch_once(&self) -> UnitOutcome {
        let Some(input) = self.input.clone() else {
            return self.run_once().await;
        };
        self.metrics.heartbeat(Heartbeat::Started {
            mode: InvocationMode::SingleShot,
        });

        async {
            let started = Instant::now();
            let mut sm = StateMachine::new();
            let mut ctx = UnitContext::default();

            let result: Result<Option<Vec<Processed>>> = async {
                sm.transition(EngineState::Fetching)?;
                let deliveries = input.fetch_many(self.max_messages).await?;
                if deliveries.is_empty() {
                    sm.transition(EngineState::Idle)?;
                    return Ok(None);
                }

                let unit = UnitOfWork::new(input.clone(), deliveries);
                ctx.inputs = unit.handles().iter().map(ToString::to_string).collect();
                tracing::debug!(members = unit.deliveries().len(), "batch fetched");

                let mut processed = Vec::with_capacity(unit.deliveries().len());
                for delivery in unit.deliveries() {
                    processed.push(
                        self.process_message(&mut sm, &mut ctx, Some(&delivery.payload))
                            .await?,
                    );
                }

                sm.transition(EngineState::Committing)?;
                unit.commit().await?;
                sm.transition(EngineState::Idle)?;
                Ok(Some(processed))
            }
            .await;

            let processed = match result {
                Ok(None) => return UnitOutcome::Empty,
                Ok(Some(processed)) => Ok(processed),
                Err(error) => Err(error),
            };
            UnitOutcome::from_processed(self.settle(&mut sm, &ctx, started, processed))
        }
        .instrument(self.unit_span())
        .await
    }

    /// Process every record of a host-delivered batch. Failures do not stop
    /// the batch; nothing is deleted by the engine.
    pub async fn handle_invocation_batch(&self, records: Vec<InvocationRecord>) -> BatchReport {
        self.metrics.heartbeat(Heartbeat::Started {
            mode: InvocationMode::BatchInvoked,
        });

        let mut report = BatchReport::default();
        for record in records {
            let result = self.handle_record(&record).instrument(self.unit_span()).await;
            report.members.push(MemberOutcome {
                id: record.id,
                result,
            });
        }

        if !report.succeeded() {
            tracing::warn!(
                failed = ?report.failed_ids(),
                total = report.members.len(),
                "invocation batch had failures"
            );
        }
        report
    }

    async fn handle_record(&self, record: &InvocationRecord) -> Result<Option<LineageId>> {
        let started = Instant::now();
        let mut sm = StateMachine::new();
        let mut ctx = UnitContext {
            inputs: vec![record.id.clone()],
            ..UnitContext::default()
        };
        let payload = record.payload();
        let message = self.kind().has_input().then_some(payload.as_slice());

        let result: Result<Processed> = async {
            sm.transition(EngineState::Fetching)?;
            let processed = self.process_message(&mut sm, &mut ctx, message).await?;
            sm.transition(EngineState::Committing)?;
            sm.transition(EngineState::Idle)?;
            Ok(processed)
        }
        .await;

        let mut processed = self.settle(&mut sm, &ctx, started, result.map(|p| vec![p]))?;
        Ok(processed.pop().and_then(|p| p.lineage_id))
    }
}
