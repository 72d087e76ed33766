//! Envelope - the unit of transport.
//!
//! An envelope carries an opaque body plus the plumbing the framework needs:
//! where the body lives (inline or in a blob store), a routing discriminant,
//! and the lineage id of the execution that produced it. The framework never
//! inspects business content beyond `DATA_ASSET` stamping.
//!
//! Unknown wire fields are kept in `extra` so forward-compatible producers
//! survive a pass through older components.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data_asset::DataAsset;
use crate::types::{Error, LineageId, Result};

pub mod codec;
pub mod enums;

pub use enums::*;

/// Body written in place of an empty inline body.
pub const EMPTY_BODY_PLACEHOLDER: &str = "filling message body with a string so it is not empty";

pub const MIME_JSON: &str = "text/json";
pub const MIME_TEXT: &str = "text/plain";

/// Transport message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Content (inline) or pointer text (external, before resolution).
    pub body: String,

    pub payload_location: PayloadLocation,

    /// Present iff `payload_location` is `External`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    pub mime_type: String,

    pub object_kind: ObjectKind,

    /// Execution that produced this envelope. Overwritten by the engine on
    /// every published output; `None` only for externally injected events.
    pub lineage_id: Option<LineageId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_asset_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_asset_country: Option<String>,

    /// Unrecognised wire fields, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    #[serde(skip)]
    resolved: bool,
}

impl Envelope {
    /// Create an inline envelope.
    pub fn new(object_kind: ObjectKind, mime_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            payload_location: PayloadLocation::Inline,
            external_ref: None,
            mime_type: mime_type.into(),
            object_kind,
            lineage_id: None,
            data_asset_name: None,
            data_asset_country: None,
            extra: serde_json::Map::new(),
            resolved: false,
        }
    }

    /// Create an envelope whose body lives in a blob store.
    pub fn external(object_kind: ObjectKind, mime_type: impl Into<String>, reference: impl Into<String>) -> Self {
        let reference = reference.into();
        let mut envelope = Self::new(object_kind, mime_type, reference.clone());
        envelope.payload_location = PayloadLocation::External;
        envelope.external_ref = Some(reference);
        envelope
    }

    pub fn raw_content(mime_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(ObjectKind::RawContent, mime_type, body)
    }

    /// Marker envelope with no meaningful content.
    pub fn empty() -> Self {
        Self::new(ObjectKind::Empty, MIME_TEXT, EMPTY_BODY_PLACEHOLDER)
    }

    pub fn update_notification(body: &serde_json::Value) -> Self {
        Self::new(ObjectKind::UpdateNotification, MIME_JSON, body.to_string())
    }

    pub fn remote_fetch_record(body: &serde_json::Value) -> Self {
        Self::new(ObjectKind::RemoteFetchRecord, MIME_JSON, body.to_string())
    }

    pub fn invocation_event(body: &serde_json::Value) -> Self {
        Self::new(ObjectKind::InvocationEvent, MIME_JSON, body.to_string())
    }

    /// Wrap a data asset, filling the routing fields from it.
    pub fn data_asset(asset: &DataAsset) -> Result<Self> {
        asset.validate()?;
        let mut envelope = Self::new(ObjectKind::DataAsset, MIME_JSON, asset.to_json()?);
        envelope.data_asset_name = Some(asset.name.clone());
        envelope.data_asset_country = Some(asset.country.clone());
        Ok(envelope)
    }

    pub fn with_lineage_id(mut self, lineage_id: LineageId) -> Self {
        self.lineage_id = Some(lineage_id);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn extra_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn is_external(&self) -> bool {
        self.payload_location == PayloadLocation::External
    }

    /// Whether the external body has been materialized in memory.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Replace the pointer body with fetched content. The reference is kept.
    pub(crate) fn mark_resolved(&mut self, content: String) {
        self.body = content;
        self.resolved = true;
    }

    /// Parse the body as a data asset.
    pub fn to_data_asset(&self) -> Result<DataAsset> {
        if self.object_kind != ObjectKind::DataAsset {
            return Err(Error::schema(format!(
                "envelope holds {}, not DATA_ASSET",
                self.object_kind
            )));
        }
        DataAsset::from_json(&self.body)
    }

    /// Approximate wire size, used to decide whether to check a body in to
    /// the blob store before publishing.
    pub fn approx_size(&self) -> usize {
        let extra: usize = self
            .extra
            .iter()
            .map(|(k, v)| k.len() + v.to_string().len())
            .sum();
        self.body.len()
            + self.mime_type.len()
            + self.object_kind.as_str().len()
            + self.external_ref.as_ref().map_or(0, String::len)
            + self.lineage_id.as_ref().map_or(0, |id| id.as_str().len())
            + self.data_asset_name.as_ref().map_or(0, String::len)
            + self.data_asset_country.as_ref().map_or(0, String::len)
            + extra
    }

    /// Check the structural invariants.
    pub fn validate(&self) -> Result<()> {
        match (self.payload_location, &self.external_ref) {
            (PayloadLocation::External, None) => {
                return Err(Error::schema("externalRef is required when payloadLocation is EXTERNAL"));
            }
            (PayloadLocation::Inline, Some(_)) => {
                return Err(Error::schema("externalRef must be absent when payloadLocation is INLINE"));
            }
            _ => {}
        }
        if self.payload_location == PayloadLocation::Inline && self.body.is_empty() {
            return Err(Error::schema("inline body cannot be empty"));
        }
        if self.object_kind != ObjectKind::DataAsset
            && (self.data_asset_name.is_some() || self.data_asset_country.is_some())
        {
            return Err(Error::schema(format!(
                "dataAssetName/dataAssetCountry are only valid on DATA_ASSET, not {}",
                self.object_kind
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snippet: String = self.body.chars().take(10).collect();
        let ellipsis = if self.body.chars().count() > 10 { "..." } else { "" };
        write!(
            f,
            "<Envelope {} body=\"{}{}\">",
            self.object_kind, snippet, ellipsis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_envelope_defaults() {
        let env = Envelope::raw_content(MIME_TEXT, "hello");
        assert_eq!(env.object_kind, ObjectKind::RawContent);
        assert_eq!(env.payload_location, PayloadLocation::Inline);
        assert!(env.external_ref.is_none());
        assert!(env.lineage_id.is_none());
        assert!(env.extra.is_empty());
        assert!(!env.is_resolved());
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_external_envelope_invariants() {
        let env = Envelope::external(ObjectKind::RawContent, MIME_TEXT, "memory://blob-1");
        assert!(env.is_external());
        assert_eq!(env.external_ref.as_deref(), Some("memory://blob-1"));
        assert!(env.validate().is_ok());

        let mut broken = env.clone();
        broken.external_ref = None;
        assert!(broken.validate().is_err());

        let mut broken = Envelope::raw_content(MIME_TEXT, "x");
        broken.external_ref = Some("memory://stray".to_string());
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_empty_inline_body_rejected() {
        let env = Envelope::raw_content(MIME_TEXT, "");
        assert!(env.validate().is_err());
        assert!(Envelope::empty().validate().is_ok());
    }

    #[test]
    fn test_data_asset_fields_guarded_by_kind() {
        let mut env = Envelope::raw_content(MIME_TEXT, "x");
        env.data_asset_name = Some("prices".to_string());
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_data_asset_envelope() {
        let asset = DataAsset::new("prices", "AU").with_unique_keys(["sku"]);
        let env = Envelope::data_asset(&asset).unwrap();
        assert_eq!(env.object_kind, ObjectKind::DataAsset);
        assert_eq!(env.data_asset_name.as_deref(), Some("prices"));
        assert_eq!(env.data_asset_country.as_deref(), Some("AU"));
        assert_eq!(env.to_data_asset().unwrap(), asset);

        let raw = Envelope::raw_content(MIME_TEXT, "x");
        assert!(raw.to_data_asset().is_err());
    }

    #[test]
    fn test_structured_constructors() {
        let env = Envelope::update_notification(&json!({"table": "prices"}));
        assert_eq!(env.object_kind, ObjectKind::UpdateNotification);
        assert_eq!(env.mime_type, MIME_JSON);
        assert_eq!(env.body, r#"{"table":"prices"}"#);
    }

    #[test]
    fn test_approx_size_grows_with_body() {
        let small = Envelope::raw_content(MIME_TEXT, "a");
        let large = Envelope::raw_content(MIME_TEXT, "a".repeat(1000));
        assert_eq!(large.approx_size() - small.approx_size(), 999);
    }

    #[test]
    fn test_display_truncates_body() {
        let env = Envelope::raw_content(MIME_TEXT, "hello world, long body");
        assert_eq!(env.to_string(), "<Envelope RAW_CONTENT body=\"hello worl...\">");
    }
}
