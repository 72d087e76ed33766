//! Layered configuration resolution.
//!
//! Precedence, lowest first:
//! 1. built-in defaults for framework keys
//! 2. the base document named by `PYLON_CONFIG` (inline JSON, `file://path`,
//!    or a parameter-store reference)
//! 3. environment overrides, for framework keys and for keys the base
//!    already defines
//!
//! Deprecated aliases are then rewritten to their canonical keys. The result
//! is an immutable [`Config`]; it is resolved once at startup and never
//! reloaded.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::types::config::{
    self as keys, DEFAULT_LOG_FORMAT, DEFAULT_LOG_LEVEL, DEFAULT_LOOP_SLEEP_SECONDS,
    DEFAULT_MAX_MESSAGES, DEFAULT_STORE_MIN_MESSAGE_BYTES, KNOWN_KEYS,
};
use crate::types::{Config, ConfigMap, Error, Result};

/// Environment variable holding the base configuration or a pointer to it.
pub const CONFIG_ENV: &str = "PYLON_CONFIG";

/// Deprecated key → canonical key.
pub const ALIASES: &[(&str, &str)] = &[
    ("INPUT_QUEUE_NAME", keys::INPUT_SOURCE_NAME),
    ("PYLON_INPUT", keys::INPUT_SOURCE_NAME),
    ("OUTPUT_TOPIC_ARN", keys::OUTPUT_SINK_REF),
    ("PYLON_OUTPUT", keys::OUTPUT_SINK_REF),
];

const PLAIN_LOGGING: &str = "PYLON_PLAIN_LOGGING";

/// Produces the process configuration.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Config>;
}

/// Remote key/value store holding base configuration documents.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<String>;
}

/// Fixed configuration, mostly for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource(pub Config);

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<Config> {
        Ok(self.0.clone())
    }
}

/// Configuration from the process environment.
#[derive(Clone, Default)]
pub struct EnvConfigSource {
    vars: Option<Vec<(String, String)>>,
    parameters: Option<Arc<dyn ParameterStore>>,
}

impl std::fmt::Debug for EnvConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfigSource")
            .field("captured_vars", &self.vars.as_ref().map(Vec::len))
            .field("parameters", &self.parameters.is_some())
            .finish()
    }
}

impl EnvConfigSource {
    /// Read from `std::env` at load time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed set of variables instead of the live environment.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            parameters: None,
        }
    }

    pub fn with_parameter_store(mut self, store: Arc<dyn ParameterStore>) -> Self {
        self.parameters = Some(store);
        self
    }

    fn vars(&self) -> Vec<(String, String)> {
        match &self.vars {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        }
    }
}

#[async_trait]
impl ConfigSource for EnvConfigSource {
    async fn load(&self) -> Result<Config> {
        let vars = self.vars();
        let pointer = vars
            .iter()
            .find(|(k, _)| k == CONFIG_ENV)
            .map(|(_, v)| v.as_str());
        let base = load_base(pointer, self.parameters.as_deref()).await?;
        let overrides = vars.iter().filter(|(k, _)| k != CONFIG_ENV).cloned();
        Ok(Config::new(resolve_layered(base, overrides)))
    }
}

/// Fetch and parse the base document.
pub async fn load_base(pointer: Option<&str>, parameters: Option<&dyn ParameterStore>) -> Result<ConfigMap> {
    let pointer = match pointer.map(str::trim) {
        None | Some("") => return Ok(ConfigMap::new()),
        Some(p) => p,
    };

    let text = if pointer.starts_with('{') {
        pointer.to_string()
    } else if let Some(path) = pointer.strip_prefix("file://") {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::config(format!("cannot read config file {}: {}", path, e)))?
    } else {
        let name = pointer
            .split_once("://")
            .map_or(pointer, |(_, rest)| rest);
        let store = parameters.ok_or_else(|| {
            Error::config(format!("{:?} is not a recognised config location", pointer))
        })?;
        store
            .get(name)
            .await
            .map_err(|e| Error::config(format!("cannot fetch config {}: {}", pointer, e)))?
    };

    parse_document(&text)
}

/// Parse a JSON object into a flat string map.
pub fn parse_document(text: &str) -> Result<ConfigMap> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::config(format!("config is not valid JSON: {}", e)))?;
    let Value::Object(fields) = value else {
        return Err(Error::config("config document must be a JSON object"));
    };
    Ok(fields
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, text)
        })
        .collect())
}

/// Merge defaults, base and overrides, then rewrite deprecated keys.
pub fn resolve_layered(base: ConfigMap, overrides: impl IntoIterator<Item = (String, String)>) -> ConfigMap {
    let mut config = defaults();
    let base_keys: Vec<String> = base.keys().cloned().collect();
    config.extend(base);

    for (key, value) in overrides {
        let eligible = KNOWN_KEYS.contains(&key.as_str())
            || ALIASES.iter().any(|(alias, _)| *alias == key)
            || key == PLAIN_LOGGING
            || base_keys.contains(&key);
        if eligible {
            config.insert(key, value);
        }
    }

    apply_aliases(&mut config);
    warn_unrecognised(&config);
    config
}

fn defaults() -> ConfigMap {
    ConfigMap::from([
        (keys::LOG_LEVEL.to_string(), DEFAULT_LOG_LEVEL.to_string()),
        (keys::LOG_FORMAT.to_string(), DEFAULT_LOG_FORMAT.to_string()),
        (keys::LOOP_SLEEP_SECONDS.to_string(), DEFAULT_LOOP_SLEEP_SECONDS.to_string()),
        (keys::MAX_MESSAGES.to_string(), DEFAULT_MAX_MESSAGES.to_string()),
        (
            keys::STORE_MIN_MESSAGE_BYTES.to_string(),
            DEFAULT_STORE_MIN_MESSAGE_BYTES.to_string(),
        ),
    ])
}

fn apply_aliases(config: &mut ConfigMap) {
    for (alias, canonical) in ALIASES {
        let Some(value) = config.remove(*alias) else {
            continue;
        };
        if config.contains_key(*canonical) {
            tracing::warn!(alias, canonical, "deprecated config key ignored, canonical key already set");
        } else {
            tracing::warn!(alias, canonical, "deprecated config key, use the canonical key instead");
            config.insert(canonical.to_string(), value);
        }
    }

    if let Some(plain) = config.remove(PLAIN_LOGGING) {
        tracing::warn!(
            alias = PLAIN_LOGGING,
            canonical = keys::LOG_FORMAT,
            "deprecated config key, use \"txt\" or \"json\" instead"
        );
        let plain = matches!(plain.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        let format = if plain { "txt" } else { "json" };
        config.insert(keys::LOG_FORMAT.to_string(), format.to_string());
    }
}

fn warn_unrecognised(config: &ConfigMap) {
    for key in config.keys() {
        if key.starts_with("PYLON") && !KNOWN_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "using unrecognised config variable");
        }
    }
}
