//! Compute function contract.

use std::collections::HashMap;
use std::fmt;

use crate::envelope::Envelope;
use crate::types::ConfigMap;

/// What a compute invocation returns: outputs to publish (in order) and
/// optional metadata for the lineage record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub outputs: Vec<Envelope>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl ExecutionResult {
    /// No outputs, no metadata.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_outputs(outputs: Vec<Envelope>) -> Self {
        Self {
            outputs,
            metadata: None,
        }
    }

    pub fn single(output: Envelope) -> Self {
        Self::with_outputs(vec![output])
    }

    pub fn push(mut self, output: Envelope) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

impl From<Vec<Envelope>> for ExecutionResult {
    fn from(outputs: Vec<Envelope>) -> Self {
        Self::with_outputs(outputs)
    }
}

/// User compute.
///
/// `message` is `None` for source components. The engine never looks inside
/// the message or the outputs beyond envelope plumbing. A source component is
/// invoked once per cycle and restarts its sequence on every call.
pub trait Compute: Send + Sync {
    fn invoke(&self, message: Option<&Envelope>, config: &ConfigMap) -> anyhow::Result<ExecutionResult>;
}

/// Adapter turning a plain function or closure into a [`Compute`].
pub struct FnCompute<F>(pub F);

impl<F> Compute for FnCompute<F>
where
    F: Fn(Option<&Envelope>, &ConfigMap) -> anyhow::Result<ExecutionResult> + Send + Sync,
{
    fn invoke(&self, message: Option<&Envelope>, config: &ConfigMap) -> anyhow::Result<ExecutionResult> {
        (self.0)(message, config)
    }
}

impl<F> fmt::Debug for FnCompute<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCompute")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MIME_TEXT;
    use serde_json::json;

    #[test]
    fn test_result_builders() {
        let result = ExecutionResult::single(Envelope::raw_content(MIME_TEXT, "a"))
            .push(Envelope::raw_content(MIME_TEXT, "b"))
            .with_metadata("rows", json!(2));
        assert_eq!(result.outputs.len(), 2);
        assert_eq!(result.outputs[1].body, "b");
        assert_eq!(result.metadata.unwrap()["rows"], 2);

        assert!(ExecutionResult::empty().outputs.is_empty());
        assert!(ExecutionResult::from(Vec::<Envelope>::new()).metadata.is_none());
    }

    #[test]
    fn test_fn_compute_sees_message_and_config() {
        let compute = FnCompute(|message: Option<&Envelope>, config: &ConfigMap| -> anyhow::Result<ExecutionResult> {
            let body = message.map(|m| m.body.clone()).unwrap_or_default();
            let suffix = config.get("SUFFIX").cloned().unwrap_or_default();
            Ok(ExecutionResult::single(Envelope::raw_content(MIME_TEXT, body + &suffix)))
        });
        let config = ConfigMap::from([("SUFFIX".to_string(), "!".to_string())]);
        let input = Envelope::raw_content(MIME_TEXT, "hi");

        let result = compute.invoke(Some(&input), &config).unwrap();
        assert_eq!(result.outputs[0].body, "hi!");

        let result = compute.invoke(None, &config).unwrap();
        assert_eq!(result.outputs[0].body, "!");
    }
}
