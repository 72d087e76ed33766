//! Configuration structures.
//!
//! Configuration is a flat, immutable string→string mapping resolved once at
//! process start (see [`crate::config`]). Well-known keys get typed accessors;
//! every other key passes through untouched to the compute function.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::errors::{Error, Result};

/// Raw configuration mapping handed to compute functions.
pub type ConfigMap = BTreeMap<String, String>;

pub const INPUT_SOURCE_NAME: &str = "INPUT_SOURCE_NAME";
pub const OUTPUT_SINK_REF: &str = "OUTPUT_SINK_REF";
pub const COMPONENT_NAME: &str = "COMPONENT_NAME";
pub const COMPONENT_VERSION: &str = "COMPONENT_VERSION";
pub const LOG_LEVEL: &str = "PYLON_LOG_LEVEL";
pub const LOG_FORMAT: &str = "PYLON_LOG_FORMAT";
pub const LOOP_SLEEP_SECONDS: &str = "PYLON_LOOP_SLEEP_SECONDS";
pub const MAX_MESSAGES: &str = "PYLON_MAX_MESSAGES";
pub const STORE_DESTINATION: &str = "PYLON_STORE_DESTINATION";
pub const STORE_MIN_MESSAGE_BYTES: &str = "PYLON_STORE_MIN_MESSAGE_BYTES";
pub const LINEAGE_ATTRS: &str = "LINEAGE_ATTRS";

/// Legacy keys still honoured for component identity.
pub const LEGACY_IMAGE_NAME: &str = "IMAGE_NAME";
pub const LEGACY_VERSION: &str = "VERSION";

pub const DEFAULT_LOG_LEVEL: &str = "warning";
pub const DEFAULT_LOG_FORMAT: &str = "txt";
pub const DEFAULT_LOOP_SLEEP_SECONDS: u64 = 60;
pub const DEFAULT_MAX_MESSAGES: usize = 10;
pub const DEFAULT_STORE_MIN_MESSAGE_BYTES: usize = 250 * 1024;

/// Every key the framework itself interprets.
pub const KNOWN_KEYS: &[&str] = &[
    INPUT_SOURCE_NAME,
    OUTPUT_SINK_REF,
    COMPONENT_NAME,
    COMPONENT_VERSION,
    LOG_LEVEL,
    LOG_FORMAT,
    LOOP_SLEEP_SECONDS,
    MAX_MESSAGES,
    STORE_DESTINATION,
    STORE_MIN_MESSAGE_BYTES,
    LINEAGE_ATTRS,
    LEGACY_IMAGE_NAME,
    LEGACY_VERSION,
];

/// Shape of a pipeline component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// No input; compute synthesizes outputs from configuration.
    Source,
    /// Consumes one input unit, publishes outputs.
    Pipeline,
    /// Consumes input, publishes nothing and records no lineage.
    Sink,
}

impl ComponentKind {
    pub fn has_input(self) -> bool {
        !matches!(self, ComponentKind::Source)
    }

    pub fn has_output(self) -> bool {
        !matches!(self, ComponentKind::Sink)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Txt,
    Json,
}

/// Immutable component configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: Arc<ConfigMap>,
}

impl Config {
    pub fn new(values: ConfigMap) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// Build from key/value pairs (mostly for tests and embedding).
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &ConfigMap {
        &self.values
    }

    pub fn input_source_name(&self) -> Option<&str> {
        self.non_empty(INPUT_SOURCE_NAME)
    }

    pub fn output_sink_ref(&self) -> Option<&str> {
        self.non_empty(OUTPUT_SINK_REF)
    }

    pub fn component_name(&self) -> Option<&str> {
        self.non_empty(COMPONENT_NAME)
            .or_else(|| self.non_empty(LEGACY_IMAGE_NAME))
    }

    pub fn component_version(&self) -> Option<&str> {
        self.non_empty(COMPONENT_VERSION)
            .or_else(|| self.non_empty(LEGACY_VERSION))
    }

    pub fn log_level(&self) -> &str {
        self.get(LOG_LEVEL).unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_format(&self) -> Result<LogFormat> {
        match self.get(LOG_FORMAT).unwrap_or(DEFAULT_LOG_FORMAT) {
            s if s.eq_ignore_ascii_case("txt") => Ok(LogFormat::Txt),
            s if s.eq_ignore_ascii_case("json") => Ok(LogFormat::Json),
            other => Err(Error::config(format!(
                "{} must be \"txt\" or \"json\", got {:?}",
                LOG_FORMAT, other
            ))),
        }
    }

    pub fn loop_sleep(&self) -> Result<Duration> {
        self.parse_or(LOOP_SLEEP_SECONDS, DEFAULT_LOOP_SLEEP_SECONDS)
            .map(Duration::from_secs)
    }

    pub fn max_messages(&self) -> Result<usize> {
        let n = self.parse_or(MAX_MESSAGES, DEFAULT_MAX_MESSAGES)?;
        if n == 0 {
            return Err(Error::config(format!("{} must be positive", MAX_MESSAGES)));
        }
        Ok(n)
    }

    pub fn store_destination(&self) -> Option<&str> {
        self.non_empty(STORE_DESTINATION)
    }

    pub fn store_min_message_bytes(&self) -> Result<usize> {
        self.parse_or(STORE_MIN_MESSAGE_BYTES, DEFAULT_STORE_MIN_MESSAGE_BYTES)
    }

    /// Extra lineage metadata configured for every execution.
    pub fn lineage_attrs(&self) -> Result<HashMap<String, serde_json::Value>> {
        match self.non_empty(LINEAGE_ATTRS) {
            None => Ok(HashMap::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                Error::config(format!("{} must be a JSON object: {}", LINEAGE_ATTRS, e))
            }),
        }
    }

    /// Check the mandatory keys for a component shape.
    pub fn validate_for(&self, kind: ComponentKind) -> Result<()> {
        if kind.has_input() && self.input_source_name().is_none() {
            return Err(Error::config(format!(
                "{} is required for {:?} components",
                INPUT_SOURCE_NAME, kind
            )));
        }
        if kind.has_output() && self.output_sink_ref().is_none() {
            return Err(Error::config(format!(
                "{} is required for {:?} components",
                OUTPUT_SINK_REF, kind
            )));
        }
        self.log_format()?;
        self.loop_sleep()?;
        self.max_messages()?;
        self.store_min_message_bytes()?;
        self.lineage_attrs()?;
        Ok(())
    }

    fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.non_empty(key) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("invalid value for {}: {:?} ({})", key, raw, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::default();
        assert_eq!(config.log_level(), "warning");
        assert_eq!(config.log_format().unwrap(), LogFormat::Txt);
        assert_eq!(config.loop_sleep().unwrap(), Duration::from_secs(60));
        assert_eq!(config.max_messages().unwrap(), 10);
        assert_eq!(config.store_min_message_bytes().unwrap(), 256_000);
        assert!(config.lineage_attrs().unwrap().is_empty());
    }

    #[test]
    fn test_validate_for_component_kinds() {
        let empty = Config::default();
        assert!(empty.validate_for(ComponentKind::Pipeline).is_err());
        assert!(empty.validate_for(ComponentKind::Sink).is_err());
        assert!(empty.validate_for(ComponentKind::Source).is_err());

        let source = Config::from_pairs([(OUTPUT_SINK_REF, "folder:///tmp/out")]);
        assert!(source.validate_for(ComponentKind::Source).is_ok());
        assert!(source.validate_for(ComponentKind::Pipeline).is_err());

        let sink = Config::from_pairs([(INPUT_SOURCE_NAME, "folder:///tmp/in")]);
        assert!(sink.validate_for(ComponentKind::Sink).is_ok());

        let err = sink.validate_for(ComponentKind::Pipeline).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains(OUTPUT_SINK_REF));
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let config = Config::from_pairs([(INPUT_SOURCE_NAME, "  ")]);
        assert!(config.input_source_name().is_none());
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        let config = Config::from_pairs([(LOOP_SLEEP_SECONDS, "soon")]);
        assert!(config.loop_sleep().unwrap_err().is_fatal());

        let config = Config::from_pairs([(MAX_MESSAGES, "0")]);
        assert!(config.max_messages().is_err());
    }

    #[test]
    fn test_component_identity_falls_back_to_legacy_keys() {
        let config = Config::from_pairs([(LEGACY_IMAGE_NAME, "scraper"), (LEGACY_VERSION, "1.2")]);
        assert_eq!(config.component_name(), Some("scraper"));
        assert_eq!(config.component_version(), Some("1.2"));

        let config = Config::from_pairs([
            (COMPONENT_NAME, "cleaner"),
            (LEGACY_IMAGE_NAME, "scraper"),
        ]);
        assert_eq!(config.component_name(), Some("cleaner"));
    }

    #[test]
    fn test_lineage_attrs_parse() {
        let config = Config::from_pairs([(LINEAGE_ATTRS, r#"{"team":"data","tier":2}"#)]);
        let attrs = config.lineage_attrs().unwrap();
        assert_eq!(attrs["team"], "data");
        assert_eq!(attrs["tier"], 2);

        let bad = Config::from_pairs([(LINEAGE_ATTRS, "[1,2]")]);
        assert!(bad.lineage_attrs().is_err());
    }
}
