//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::errors::{Result, SlashGuardError};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            SlashGuardError::ConfigError(format!("Invalid log level {}: {}", config.level, e))
        })?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer(&config.format, std::io::stdout))
        .try_init()
        .map_err(|e| SlashGuardError::InternalError(format!("Logging already initialized: {}", e)))
}

/// Output layer for a configured format: `json`, or human-readable otherwise
fn fmt_layer<S, W>(format: &str, writer: W) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        "json" => fmt::layer().json().with_writer(writer).boxed(),
        _ => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::info;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(format: &str) -> String {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::registry().with(fmt_layer(format, buffer.clone()));
        tracing::subscriber::with_default(subscriber, || info!(key = "k1", "signed attestation"));
        buffer.contents()
    }

    #[test]
    fn test_json_format() {
        let output = capture("json");
        let line: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["fields"]["message"], "signed attestation");
        assert_eq!(line["fields"]["key"], "k1");
    }

    #[test]
    fn test_pretty_format() {
        let output = capture("pretty");
        assert!(output.contains("INFO"));
        assert!(output.contains("signed attestation"));
        assert!(output.contains("key=\"k1\""));
        assert!(serde_json::from_str::<serde_json::Value>(output.trim()).is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let config = LoggingConfig::default();
        // Another test may already have installed a subscriber.
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, SlashGuardError::InternalError(_)));
    }
}
