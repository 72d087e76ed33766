//! Lineage tracking.
//!
//! Every successful non-sink execution produces exactly one [`LineageRecord`]
//! linking the new lineage id to the id of the input that caused it. Records
//! are immutable once built; persistence belongs to a
//! [`LineageStore`](crate::io::LineageStore).

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::LineageId;

/// Audit entry for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageRecord {
    lineage_id: LineageId,
    parent_lineage_id: Option<LineageId>,
    component_name: String,
    component_version: String,
    execution_timestamp_utc: DateTime<Utc>,
    /// `YYYYMMDD` of the execution timestamp.
    date_id: u32,
    hour_of_day: u32,
    metadata: HashMap<String, serde_json::Value>,
}

impl LineageRecord {
    pub fn lineage_id(&self) -> &LineageId {
        &self.lineage_id
    }

    pub fn parent_lineage_id(&self) -> Option<&LineageId> {
        self.parent_lineage_id.as_ref()
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    pub fn component_version(&self) -> &str {
        &self.component_version
    }

    pub fn execution_timestamp_utc(&self) -> DateTime<Utc> {
        self.execution_timestamp_utc
    }

    pub fn date_id(&self) -> u32 {
        self.date_id
    }

    pub fn hour_of_day(&self) -> u32 {
        self.hour_of_day
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }
}

/// Generates lineage ids and builds records.
///
/// Stateless; ids are random v4 UUIDs so independent processes never need to
/// coordinate.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineageTracker;

impl LineageTracker {
    pub fn new() -> Self {
        Self
    }

    /// Allocate a fresh id. The parent does not influence the value; it is
    /// accepted so call sites read as "next id after this one".
    pub fn next_id(&self, parent: Option<&LineageId>) -> LineageId {
        let id = LineageId::new();
        tracing::trace!(lineage_id = %id, parent = ?parent.map(|p| p.as_str()), "lineage_id_allocated");
        id
    }

    /// Build the record for an execution that has already been assigned
    /// `lineage_id`.
    ///
    /// With several parents (fetch-batch members sharing one execution) the
    /// first id in arrival order becomes `parentLineageId`; the others are
    /// dropped. Callers needing full provenance put it in `metadata`.
    pub fn build_record(
        &self,
        lineage_id: LineageId,
        parent_ids: &[LineageId],
        component_name: &str,
        component_version: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> LineageRecord {
        self.build_record_at(
            lineage_id,
            parent_ids,
            component_name,
            component_version,
            metadata,
            Utc::now(),
        )
    }

    pub(crate) fn build_record_at(
        &self,
        lineage_id: LineageId,
        parent_ids: &[LineageId],
        component_name: &str,
        component_version: &str,
        metadata: HashMap<String, serde_json::Value>,
        now: DateTime<Utc>,
    ) -> LineageRecord {
        if parent_ids.len() > 1 {
            tracing::debug!(
                lineage_id = %lineage_id,
                parents = parent_ids.len(),
                "multiple parents, keeping first"
            );
        }
        LineageRecord {
            lineage_id,
            parent_lineage_id: parent_ids.first().cloned(),
            component_name: component_name.to_string(),
            component_version: component_version.to_string(),
            execution_timestamp_utc: now,
            date_id: now.year() as u32 * 10_000 + now.month() * 100 + now.day(),
            hour_of_day: now.hour(),
            metadata,
        }
    }
}
