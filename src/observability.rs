//! Observability utilities.

use std::sync::OnceLock;
use tracing::Dispatch;
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

use crate::types::LogFormat;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// `level` takes the configured `PYLON_LOG_LEVEL` (`debug`, `info`,
/// `warning`, `error`, `critical`); `RUST_LOG` wins when set. Later calls are
/// no-ops.
pub fn init_tracing(level: &str, format: LogFormat) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_current_span(true))
                .try_init(),
            LogFormat::Txt => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact())
                .try_init(),
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// Warn-level text subscriber for the window before configuration is loaded.
///
/// Install it with [`tracing::dispatcher::set_default`] around config
/// resolution, then call [`init_tracing`] with the resolved level and format.
pub fn bootstrap_dispatch<W>(writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().compact().with_ansi(false).with_writer(writer));
    Dispatch::new(subscriber)
}

/// Map a configured level name to an `EnvFilter` directive.
fn filter_directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "error" | "critical" | "fatal" => "error",
        _ => "warn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve_layered;
    use crate::types::ConfigMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn bootstrap_captures_config_warnings() {
        let captured = Captured::default();
        let writer = captured.clone();
        let dispatch = bootstrap_dispatch(move || writer.clone());

        tracing::dispatcher::with_default(&dispatch, || {
            let base = ConfigMap::from([
                ("INPUT_QUEUE_NAME".to_string(), "memory://in".to_string()),
                ("PYLON_MYSTERY".to_string(), "1".to_string()),
            ]);
            resolve_layered(base, Vec::new());
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("deprecated config key"), "{logs}");
        assert!(logs.contains("INPUT_QUEUE_NAME"), "{logs}");
        assert!(logs.contains("PYLON_MYSTERY"), "{logs}");
    }

    #[test]
    fn level_names_map_to_directives() {
        assert_eq!(filter_directive("warning"), "warn");
        assert_eq!(filter_directive("WARNING"), "warn");
        assert_eq!(filter_directive("critical"), "error");
        assert_eq!(filter_directive("debug"), "debug");
        assert_eq!(filter_directive("nonsense"), "warn");
    }
}
