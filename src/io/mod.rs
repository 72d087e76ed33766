//! Collaborator interfaces and concrete transports.
//!
//! The engine talks to the outside world only through the traits below. All
//! of them are async but the engine awaits one call at a time, so a single
//! unit of work is fully processed before the next fetch.
//!
//! Transport references use a `scheme://location` form:
//! - `folder://<dir>`: [`folder::FolderTransport`] / [`folder::FolderBlobStore`]
//! - `memory://<name>`: process-local [`memory`] collaborators

use async_trait::async_trait;
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::lineage::LineageRecord;
use crate::types::{DeliveryHandle, Error, Result};

pub mod folder;
pub mod memory;

pub use folder::{FolderBlobStore, FolderTransport};
pub use memory::{MemoryBlobStore, MemoryLineageStore, MemoryQueue, MemoryRegistry};

// =============================================================================
// Collaborator traits
// =============================================================================

/// One message pulled from an input source, not yet decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Opaque token used to acknowledge the message.
    pub handle: DeliveryHandle,
    /// Encoded envelope.
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(handle: DeliveryHandle, payload: Vec<u8>) -> Self {
        Self { handle, payload }
    }
}

/// Where input envelopes come from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Next delivery, or `None` when the source is currently empty.
    async fn fetch_one(&self) -> Result<Option<Delivery>>;

    /// Up to `max` deliveries, possibly none.
    async fn fetch_many(&self, max: usize) -> Result<Vec<Delivery>>;

    /// Acknowledge deliveries. Deleting an already-deleted handle is not an
    /// error.
    async fn delete(&self, handles: &[DeliveryHandle]) -> Result<()>;

    /// Best-effort backlog size.
    async fn approximate_size(&self) -> Result<usize>;
}

/// Where output envelopes go.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Deliver one envelope. Transport failures are `Error::Publish`.
    async fn publish(&self, envelope: &Envelope) -> Result<()>;
}

/// Off-band storage for large payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;

    /// Store bytes and return the reference that fetches them back.
    async fn store(&self, bytes: &[u8]) -> Result<String>;
}

/// Persistence for lineage records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LineageStore: Send + Sync {
    async fn record(&self, record: &LineageRecord) -> Result<()>;
}

// =============================================================================
// Log-backed lineage store
// =============================================================================

/// Lineage store that writes each record as a structured log line.
///
/// Used when no dedicated store is configured; the log pipeline ships the
/// `LINEAGE_RECORD` lines to wherever lineage is analysed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineageStore;

#[async_trait]
impl LineageStore for LogLineageStore {
    async fn record(&self, record: &LineageRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        tracing::info!(
            lineage_id = %record.lineage_id(),
            parent_lineage_id = ?record.parent_lineage_id().map(|p| p.as_str()),
            record = %json,
            "LINEAGE_RECORD"
        );
        Ok(())
    }
}

// =============================================================================
// Reference resolution
// =============================================================================

/// Split `scheme://location`.
pub fn parse_ref(reference: &str) -> Result<(&str, &str)> {
    reference
        .split_once("://")
        .filter(|(scheme, location)| !scheme.is_empty() && !location.is_empty())
        .ok_or_else(|| Error::config(format!("transport reference {:?} must look like scheme://location", reference)))
}

/// Open the input source named by `INPUT_SOURCE_NAME`.
pub async fn open_input(reference: &str, registry: &MemoryRegistry) -> Result<Arc<dyn InputSource>> {
    match parse_ref(reference)? {
        ("folder", dir) => Ok(Arc::new(FolderTransport::open(dir).await?)),
        ("memory", name) => Ok(registry.queue(name).await),
        (scheme, _) => Err(Error::config(format!("unsupported input scheme {:?}", scheme))),
    }
}

/// Open the output sink named by `OUTPUT_SINK_REF`.
pub async fn open_output(reference: &str, registry: &MemoryRegistry) -> Result<Arc<dyn OutputSink>> {
    match parse_ref(reference)? {
        ("folder", dir) => Ok(Arc::new(FolderTransport::create(dir).await?)),
        ("memory", name) => Ok(registry.queue(name).await),
        (scheme, _) => Err(Error::config(format!("unsupported output scheme {:?}", scheme))),
    }
}

/// Open the blob store named by `PYLON_STORE_DESTINATION`.
pub async fn open_blob_store(reference: &str, registry: &MemoryRegistry) -> Result<Arc<dyn BlobStore>> {
    match parse_ref(reference)? {
        ("folder", dir) => Ok(Arc::new(FolderBlobStore::create(dir).await?)),
        ("memory", _) => Ok(registry.blobs()),
        (scheme, _) => Err(Error::config(format!("unsupported blob store scheme {:?}", scheme))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::LineageTracker;
    use crate::types::{ErrorKind, LineageId};
    use std::collections::HashMap;

    #[test]
    fn test_parse_ref() {
        assert_eq!(parse_ref("folder:///tmp/in").unwrap(), ("folder", "/tmp/in"));
        assert_eq!(parse_ref("memory://q").unwrap(), ("memory", "q"));
        assert!(parse_ref("/tmp/in").is_err());
        assert!(parse_ref("folder://").is_err());
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_config_error() {
        let registry = MemoryRegistry::default();
        let err = open_input("sqs://queue", &registry).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        let err = open_output("sns://topic", &registry).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
        let err = open_blob_store("s3://bucket", &registry).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn test_memory_refs_share_registry_queue() {
        let registry = MemoryRegistry::default();
        let output = open_output("memory://hand-off", &registry).await.unwrap();
        let input = open_input("memory://hand-off", &registry).await.unwrap();

        let env = Envelope::raw_content("text/plain", "x");
        output.publish(&env).await.unwrap();
        assert_eq!(input.approximate_size().await.unwrap(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_log_lineage_store_emits_record() {
        let record = LineageTracker::new().build_record(
            LineageId::from_string("child".to_string()).unwrap(),
            &[LineageId::from_string("parent".to_string()).unwrap()],
            "cleaner",
            "1",
            HashMap::new(),
        );
        LogLineageStore.record(&record).await.unwrap();
        assert!(logs_contain("LINEAGE_RECORD"));
        assert!(logs_contain("child"));
    }
}
