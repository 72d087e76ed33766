//! Data asset records - structured business payloads carried by
//! `DATA_ASSET` envelopes.
//!
//! A data asset is a named, country-scoped table of rows. Partition keys are
//! ordered and define the physical layout downstream; unique keys are an
//! unordered set defining record identity for deduplication.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::types::{Error, LineageId, Result};

/// One row: field name → value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Column stamped into every row with the producing lineage id.
pub const LINEAGE_COLUMN: &str = "lineage_id";

/// Structured table payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAsset {
    pub name: String,
    pub country: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Ordered; order is significant end to end.
    #[serde(default)]
    pub partition_keys: Vec<String>,

    /// Unordered; two rows are the same record iff all of these match.
    #[serde(default)]
    pub unique_keys: BTreeSet<String>,

    #[serde(default)]
    pub rows: Vec<Row>,

    #[serde(default)]
    pub lineage_id: Option<LineageId>,
}

impl DataAsset {
    pub fn new(name: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            country: country.into(),
            version: String::new(),
            partition_keys: Vec::new(),
            unique_keys: BTreeSet::new(),
            rows: Vec::new(),
            lineage_id: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_partition_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.partition_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unique_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.unique_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn push_row(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Check that the asset is well formed: named, and every unique key is
    /// present in every row.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::schema("data asset name cannot be empty"));
        }
        for (idx, row) in self.rows.iter().enumerate() {
            if let Some(missing) = self.unique_keys.iter().find(|k| !row.contains_key(*k)) {
                return Err(Error::schema(format!(
                    "data asset {}: row {} is missing unique key {:?}",
                    self.name, idx, missing
                )));
            }
        }
        Ok(())
    }

    /// Identity of a row under this asset's unique keys, or `None` if the
    /// row lacks one of them.
    pub fn unique_key<'a>(&self, row: &'a Row) -> Option<Vec<&'a serde_json::Value>> {
        self.unique_keys.iter().map(|k| row.get(k)).collect()
    }

    /// Whether two rows describe the same record.
    pub fn same_record(&self, a: &Row, b: &Row) -> bool {
        match (self.unique_key(a), self.unique_key(b)) {
            (Some(ka), Some(kb)) => ka == kb,
            _ => false,
        }
    }

    /// Drop rows whose identity was already seen, keeping the first
    /// occurrence. Returns how many rows were removed.
    pub fn dedup(&mut self) -> usize {
        if self.unique_keys.is_empty() {
            return 0;
        }
        let before = self.rows.len();
        let mut seen = HashSet::new();
        let keys = self.unique_keys.clone();
        self.rows.retain(|row| {
            let identity: Option<Vec<String>> = keys
                .iter()
                .map(|k| row.get(k).map(|v| v.to_string()))
                .collect();
            match identity {
                Some(identity) => seen.insert(identity),
                None => true,
            }
        });
        before - self.rows.len()
    }

    /// Stamp the producing lineage id on the asset and on every row.
    pub fn stamp_lineage(&mut self, lineage_id: &LineageId) {
        self.lineage_id = Some(lineage_id.clone());
        for row in &mut self.rows {
            row.insert(
                LINEAGE_COLUMN.to_string(),
                serde_json::Value::String(lineage_id.to_string()),
            );
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| Error::schema(format!("invalid data asset body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    fn prices() -> DataAsset {
        DataAsset::new("prices", "AU")
            .with_partition_keys(["year", "month"])
            .with_unique_keys(["sku", "store"])
            .with_rows(vec![
                row(json!({"sku": "A1", "store": 7, "year": 2024, "month": 5, "price": 1.5})),
                row(json!({"sku": "A1", "store": 8, "year": 2024, "month": 5, "price": 1.6})),
                row(json!({"sku": "A1", "store": 7, "year": 2024, "month": 6, "price": 1.4})),
            ])
    }

    #[test]
    fn test_validate_requires_unique_keys_in_every_row() {
        let mut asset = prices();
        assert!(asset.validate().is_ok());

        asset.push_row(row(json!({"sku": "B2", "price": 3.0})));
        let err = asset.validate().unwrap_err();
        assert!(err.to_string().contains("store"));
    }

    #[test]
    fn test_validate_requires_name() {
        assert!(DataAsset::new("", "AU").validate().is_err());
    }

    #[test]
    fn test_same_record_ignores_non_key_fields() {
        let asset = prices();
        assert!(asset.same_record(&asset.rows[0], &asset.rows[2]));
        assert!(!asset.same_record(&asset.rows[0], &asset.rows[1]));
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let mut asset = prices();
        let removed = asset.dedup();
        assert_eq!(removed, 1);
        assert_eq!(asset.rows.len(), 2);
        assert_eq!(asset.rows[0]["month"], 5);
    }

    #[test]
    fn test_stamp_lineage_marks_rows() {
        let mut asset = prices();
        let id = LineageId::from_string("L-1".to_string()).unwrap();
        asset.stamp_lineage(&id);
        assert_eq!(asset.lineage_id.as_ref(), Some(&id));
        assert!(asset.rows.iter().all(|r| r[LINEAGE_COLUMN] == "L-1"));
    }

    #[test]
    fn test_partition_order_survives_serialization() {
        let asset = DataAsset::new("x", "NZ").with_partition_keys(["z", "a", "m"]);
        let back = DataAsset::from_json(&asset.to_json().unwrap()).unwrap();
        assert_eq!(back.partition_keys, vec!["z", "a", "m"]);
    }
}
