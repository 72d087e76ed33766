//! # Pylon Core - Pipeline Component Execution Engine
//!
//! Runs a plain compute function as a pipeline component:
//! - Envelope wire codec with off-band (`EXTERNAL`) payloads
//! - Payload resolution and check-in against a blob store
//! - Lineage ids and lineage records for every invocation
//! - Commit-or-redeliver semantics around each unit of work
//! - Single-shot, continuous and batch-invoked drive modes
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────────┐
//!   InputSource   →  │           ExecutionEngine            │  →  OutputSink
//!                    │  ┌──────────┐ ┌─────────┐ ┌────────┐ │
//!                    │  │ Payload  │ │ Compute │ │Lineage │ │  →  LineageStore
//!                    │  │ Resolver │ │  (user) │ │Tracker │ │
//!                    │  └──────────┘ └─────────┘ └────────┘ │
//!   BlobStore     ↔  │        StateMachine per unit         │  →  MetricsSink
//!                    └──────────────────────────────────────┘
//! ```
//!
//! The engine owns the unit of work; the compute function never sees
//! transports, lineage or acknowledgement.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod data_asset;
pub mod engine;
pub mod envelope;
pub mod io;
pub mod lineage;
pub mod metrics;
pub mod payload;
pub mod types;

// Internal utilities
pub mod observability;

pub use data_asset::DataAsset;
pub use engine::{Compute, ExecutionEngine, ExecutionResult, UnitOutcome};
pub use envelope::Envelope;
pub use types::{ComponentKind, Config, ConfigMap, Error, ErrorKind, LineageId, Result};
