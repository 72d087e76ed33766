//! Core enumerations for the envelope wire schema.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the envelope body lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayloadLocation {
    /// `body` holds the content itself.
    Inline,
    /// `body` points at content held in a blob store (`externalRef`).
    External,
}

/// Routing discriminant used by downstream subscribers.
///
/// Legacy camelCase names are accepted on decode; encode always writes the
/// canonical SCREAMING_SNAKE_CASE form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    #[serde(alias = "dataAsset")]
    DataAsset,
    #[serde(alias = "ingestionStep")]
    LineageStep,
    #[serde(alias = "urlResource")]
    RemoteFetchRecord,
    #[serde(alias = "updateNotification")]
    UpdateNotification,
    #[serde(alias = "rawContent")]
    RawContent,
    #[serde(alias = "null")]
    Empty,
    #[serde(alias = "lambdaEvent")]
    InvocationEvent,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::DataAsset => "DATA_ASSET",
            ObjectKind::LineageStep => "LINEAGE_STEP",
            ObjectKind::RemoteFetchRecord => "REMOTE_FETCH_RECORD",
            ObjectKind::UpdateNotification => "UPDATE_NOTIFICATION",
            ObjectKind::RawContent => "RAW_CONTENT",
            ObjectKind::Empty => "EMPTY",
            ObjectKind::InvocationEvent => "INVOCATION_EVENT",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_object_kind() {
        let cases = vec![
            (ObjectKind::DataAsset, "\"DATA_ASSET\""),
            (ObjectKind::LineageStep, "\"LINEAGE_STEP\""),
            (ObjectKind::RemoteFetchRecord, "\"REMOTE_FETCH_RECORD\""),
            (ObjectKind::UpdateNotification, "\"UPDATE_NOTIFICATION\""),
            (ObjectKind::RawContent, "\"RAW_CONTENT\""),
            (ObjectKind::Empty, "\"EMPTY\""),
            (ObjectKind::InvocationEvent, "\"INVOCATION_EVENT\""),
        ];

        for (variant, expected_json) in cases {
            let serialized = serde_json::to_string(&variant).unwrap();
            assert_eq!(serialized, expected_json, "serialize {:?}", variant);
            assert_eq!(format!("\"{}\"", variant), expected_json);
            let deserialized: ObjectKind = serde_json::from_str(&serialized).unwrap();
            assert_eq!(deserialized, variant, "round-trip {:?}", variant);
        }
    }

    #[test]
    fn test_legacy_object_kind_names() {
        let cases = vec![
            ("\"dataAsset\"", ObjectKind::DataAsset),
            ("\"ingestionStep\"", ObjectKind::LineageStep),
            ("\"urlResource\"", ObjectKind::RemoteFetchRecord),
            ("\"rawContent\"", ObjectKind::RawContent),
            ("\"null\"", ObjectKind::Empty),
            ("\"lambdaEvent\"", ObjectKind::InvocationEvent),
        ];
        for (json, expected) in cases {
            let parsed: ObjectKind = serde_json::from_str(json).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn test_unknown_object_kind_rejected() {
        assert!(serde_json::from_str::<ObjectKind>("\"SPREADSHEET\"").is_err());
        assert!(serde_json::from_str::<PayloadLocation>("\"NEARBY\"").is_err());
    }
}
