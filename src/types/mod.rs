//! Core types for the pipeline engine.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (LineageId, DeliveryHandle)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Immutable component configuration and component shapes

pub mod config;
mod errors;
mod ids;

pub use config::{ComponentKind, Config, ConfigMap, LogFormat};
pub use errors::{Error, ErrorKind, Result};
pub use ids::{DeliveryHandle, LineageId};
