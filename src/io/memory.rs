//! In-process collaborators.
//!
//! Useful for tests and for embedding several components in one process:
//! a [`MemoryQueue`] is both an input source and an output sink, so one
//! component's output can feed the next component's input directly.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{BlobStore, Delivery, InputSource, LineageStore, OutputSink};
use crate::envelope::{codec, Envelope};
use crate::lineage::LineageRecord;
use crate::types::{DeliveryHandle, Error, Result};

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    in_flight: Vec<Delivery>,
    acknowledged: Vec<DeliveryHandle>,
}

/// FIFO queue with explicit acknowledgement.
///
/// Fetched deliveries stay in flight until deleted; [`redeliver_unacked`]
/// puts them back at the head of the queue, the way a visibility timeout
/// expiring would.
///
/// [`redeliver_unacked`]: MemoryQueue::redeliver_unacked
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    next_handle: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue raw wire bytes.
    pub async fn push_raw(&self, payload: Vec<u8>) -> DeliveryHandle {
        let n = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let handle = DeliveryHandle::from_string(format!("mem-{}", n))
            .unwrap_or_else(|_| unreachable!("formatted handle is never empty"));
        self.state
            .lock()
            .await
            .ready
            .push_back(Delivery::new(handle.clone(), payload));
        handle
    }

    /// Encode and enqueue an envelope.
    pub async fn push(&self, envelope: &Envelope) -> Result<DeliveryHandle> {
        Ok(self.push_raw(codec::encode(envelope)?).await)
    }

    /// Decode every envelope still waiting in the queue, oldest first.
    pub async fn envelopes(&self) -> Result<Vec<Envelope>> {
        self.state
            .lock()
            .await
            .ready
            .iter()
            .map(|d| codec::decode(&d.payload))
            .collect()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Handles deleted so far, in deletion order.
    pub async fn acknowledged(&self) -> Vec<DeliveryHandle> {
        self.state.lock().await.acknowledged.clone()
    }

    /// Return every unacknowledged delivery to the head of the queue.
    pub async fn redeliver_unacked(&self) -> usize {
        let mut state = self.state.lock().await;
        let pending: Vec<Delivery> = state.in_flight.drain(..).collect();
        let count = pending.len();
        for delivery in pending.into_iter().rev() {
            state.ready.push_front(delivery);
        }
        count
    }
}

#[async_trait]
impl InputSource for MemoryQueue {
    async fn fetch_one(&self) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let delivery = state.ready.pop_front();
        if let Some(d) = &delivery {
            state.in_flight.push(d.clone());
        }
        Ok(delivery)
    }

    async fn fetch_many(&self, max: usize) -> Result<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let take = max.min(state.ready.len());
        let batch: Vec<Delivery> = state.ready.drain(..take).collect();
        state.in_flight.extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn delete(&self, handles: &[DeliveryHandle]) -> Result<()> {
        let mut state = self.state.lock().await;
        for handle in handles {
            if let Some(pos) = state.in_flight.iter().position(|d| &d.handle == handle) {
                state.in_flight.remove(pos);
                state.acknowledged.push(handle.clone());
            }
        }
        Ok(())
    }

    async fn approximate_size(&self) -> Result<usize> {
        Ok(self.state.lock().await.ready.len())
    }
}

#[async_trait]
impl OutputSink for MemoryQueue {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        self.push(envelope).await?;
        Ok(())
    }
}

// =============================================================================
// Blob store
// =============================================================================

/// Blob store backed by a map of `memory://blob/<uuid>` references.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place content under a caller-chosen reference.
    pub async fn insert(&self, reference: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.lock().await.insert(reference.into(), bytes.into());
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }

    /// Number of `fetch` calls served, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.blobs
            .lock()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::payload_unavailable(format!("no blob at {}", reference)))
    }

    async fn store(&self, bytes: &[u8]) -> Result<String> {
        let reference = format!("memory://blob/{}", uuid::Uuid::new_v4());
        self.blobs
            .lock()
            .await
            .insert(reference.clone(), bytes.to_vec());
        Ok(reference)
    }
}

// =============================================================================
// Lineage store
// =============================================================================

/// Lineage store that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryLineageStore {
    records: Mutex<Vec<LineageRecord>>,
}

impl MemoryLineageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<LineageRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl LineageStore for MemoryLineageStore {
    async fn record(&self, record: &LineageRecord) -> Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Named in-memory queues plus one shared blob store, addressed by
/// `memory://<name>` references.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    blobs: Arc<MemoryBlobStore>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The queue registered under `name`, created on first use.
    pub async fn queue(&self, name: &str) -> Arc<MemoryQueue> {
        self.queues
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn blobs(&self) -> Arc<MemoryBlobStore> {
        self.blobs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MIME_TEXT;
    use crate::types::ErrorKind;

    #[tokio::test]
    async fn test_queue_keeps_unacked_in_flight() {
        let queue = MemoryQueue::new();
        queue.push(&Envelope::raw_content(MIME_TEXT, "a")).await.unwrap();
        queue.push(&Envelope::raw_content(MIME_TEXT, "b")).await.unwrap();

        let first = queue.fetch_one().await.unwrap().unwrap();
        assert_eq!(queue.approximate_size().await.unwrap(), 1);
        assert_eq!(queue.in_flight().await, 1);

        assert_eq!(queue.redeliver_unacked().await, 1);
        let again = queue.fetch_one().await.unwrap().unwrap();
        assert_eq!(again.handle, first.handle);
    }

    #[tokio::test]
    async fn test_queue_delete_acknowledges_once() {
        let queue = MemoryQueue::new();
        let handle = queue.push(&Envelope::raw_content(MIME_TEXT, "a")).await.unwrap();
        queue.fetch_one().await.unwrap();

        queue.delete(&[handle.clone()]).await.unwrap();
        queue.delete(&[handle.clone()]).await.unwrap();
        assert_eq!(queue.acknowledged().await, vec![handle]);
        assert_eq!(queue.in_flight().await, 0);
        assert_eq!(queue.redeliver_unacked().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_many_preserves_order() {
        let queue = MemoryQueue::new();
        for body in ["1", "2", "3"] {
            queue.push(&Envelope::raw_content(MIME_TEXT, body)).await.unwrap();
        }
        let batch = queue.fetch_many(5).await.unwrap();
        let bodies: Vec<String> = batch
            .iter()
            .map(|d| codec::decode(&d.payload).unwrap().body)
            .collect();
        assert_eq!(bodies, vec!["1", "2", "3"]);
        assert_eq!(queue.in_flight().await, 3);
    }

    #[tokio::test]
    async fn test_blob_store_missing_reference() {
        let store = MemoryBlobStore::new();
        let err = store.fetch("memory://blob/none").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadUnavailableError);
        assert_eq!(store.fetch_count(), 1);

        let reference = store.store(b"payload").await.unwrap();
        assert_eq!(store.fetch(&reference).await.unwrap(), b"payload");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_registry_returns_same_queue() {
        let registry = MemoryRegistry::new();
        let a = registry.queue("x").await;
        let b = registry.queue("x").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &registry.queue("y").await));
    }
}
