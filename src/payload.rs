//! Large-payload indirection.
//!
//! Inbound: `EXTERNAL` envelopes carry a reference instead of content. The
//! resolver fetches the content from the blob store and swaps it into `body`,
//! keeping `externalRef` for traceability.
//!
//! Outbound: bodies at or above the configured threshold are checked in to
//! the blob store and replaced by a reference before publishing.

use std::sync::Arc;

use crate::envelope::{codec, Envelope, PayloadLocation};
use crate::io::BlobStore;
use crate::types::{Error, Result};

/// Materializes off-band payloads.
#[derive(Clone, Default)]
pub struct PayloadResolver {
    store: Option<Arc<dyn BlobStore>>,
}

impl std::fmt::Debug for PayloadResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadResolver")
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl PayloadResolver {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Resolver with no blob store: every `EXTERNAL` envelope fails to
    /// resolve.
    pub fn without_store() -> Self {
        Self { store: None }
    }

    /// Resolve in place. No-op for inline or already-resolved envelopes.
    pub async fn resolve(&self, envelope: &mut Envelope) -> Result<()> {
        if !envelope.is_external() || envelope.is_resolved() {
            return Ok(());
        }
        let reference = envelope
            .external_ref
            .clone()
            .ok_or_else(|| Error::schema("EXTERNAL envelope without externalRef"))?;
        let store = self.store.as_ref().ok_or_else(|| {
            Error::payload_unavailable(format!("no blob store configured to resolve {}", reference))
        })?;

        let bytes = store.fetch(&reference).await.map_err(|e| match e {
            Error::PayloadUnavailable(_) => e,
            other => Error::payload_unavailable(format!("fetch {}: {}", reference, other)),
        })?;
        let content = String::from_utf8(bytes).map_err(|e| {
            Error::payload_unavailable(format!("payload at {} is not UTF-8: {}", reference, e))
        })?;

        tracing::debug!(external_ref = %reference, bytes = content.len(), "payload_resolved");
        envelope.mark_resolved(content);
        Ok(())
    }

    /// Decode wire bytes and resolve the payload in one step.
    pub async fn decode_and_resolve(&self, bytes: &[u8]) -> Result<Envelope> {
        let mut envelope = codec::decode(bytes)?;
        self.resolve(&mut envelope).await?;
        Ok(envelope)
    }
}

/// Decode with resolution against an optional blob store.
pub async fn decode_and_resolve(bytes: &[u8], store: Option<Arc<dyn BlobStore>>) -> Result<Envelope> {
    PayloadResolver { store }.decode_and_resolve(bytes).await
}

/// Moves oversized outbound bodies into the blob store.
#[derive(Clone)]
pub struct CheckIn {
    store: Arc<dyn BlobStore>,
    min_bytes: usize,
}

impl std::fmt::Debug for CheckIn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckIn")
            .field("min_bytes", &self.min_bytes)
            .finish_non_exhaustive()
    }
}

impl CheckIn {
    pub fn new(store: Arc<dyn BlobStore>, min_bytes: usize) -> Self {
        Self { store, min_bytes }
    }

    /// Store the body off-band if the envelope is at or above the threshold.
    /// Returns whether the envelope was rewritten.
    pub async fn apply(&self, envelope: &mut Envelope) -> Result<bool> {
        if envelope.is_external() || envelope.approx_size() < self.min_bytes {
            return Ok(false);
        }
        let reference = self
            .store
            .store(envelope.body.as_bytes())
            .await
            .map_err(|e| match e {
                Error::Publish(_) => e,
                other => Error::publish(format!("check-in failed: {}", other)),
            })?;
        tracing::info!(
            external_ref = %reference,
            bytes = envelope.body.len(),
            "payload_checked_in"
        );
        envelope.payload_location = PayloadLocation::External;
        envelope.body = reference.clone();
        envelope.external_ref = Some(reference);
        Ok(true)
    }
}
