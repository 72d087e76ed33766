//! Wire codec for envelopes.
//!
//! The wire format is a single JSON object with camelCase keys. Decoding is
//! non-strict: unknown keys are carried in [`Envelope::extra`] and written back
//! on encode. Payload resolution is layered on top by
//! [`crate::payload::decode_and_resolve`].

use serde_json::Value;

use super::Envelope;
use crate::types::{Error, Result};

/// Keys that must be present on every decoded envelope. `lineageId` may be
/// `null` (root events injected from outside the pipeline) but not absent.
pub const REQUIRED_FIELDS: &[&str] = &["body", "payloadLocation", "mimeType", "objectKind", "lineageId"];

/// Serialize an envelope to wire bytes.
///
/// A resolved `EXTERNAL` envelope is written with its `externalRef` as the
/// body, so forwarding it downstream does not inline the fetched content.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    envelope.validate()?;
    match (&envelope.external_ref, envelope.is_resolved()) {
        (Some(reference), true) => {
            let mut value = serde_json::to_value(envelope)?;
            value["body"] = Value::String(reference.clone());
            Ok(serde_json::to_vec(&value)?)
        }
        _ => Ok(serde_json::to_vec(envelope)?),
    }
}

/// Parse wire bytes into an envelope.
///
/// Fails with `SchemaError` on malformed JSON, a missing required field, an
/// unrecognised enum value, or a broken `externalRef` invariant.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::schema(format!("envelope is not valid JSON: {}", e)))?;

    let Value::Object(mut fields) = value else {
        return Err(Error::schema("envelope must be a JSON object"));
    };

    if let Some(missing) = REQUIRED_FIELDS.iter().find(|k| !fields.contains_key(**k)) {
        return Err(Error::schema(format!("missing field: {}", missing)));
    }

    // Structured bodies are carried as their compact JSON text.
    if let Some(body) = fields.get_mut("body") {
        if !body.is_string() {
            let text = body.to_string();
            *body = Value::String(text);
        }
    }

    let envelope: Envelope = serde_json::from_value(Value::Object(fields))
        .map_err(|e| Error::schema(format!("invalid envelope: {}", e)))?;
    envelope.validate()?;
    Ok(envelope)
}
