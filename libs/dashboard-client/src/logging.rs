//! Logger capability and its `tracing` backed implementation.
//!
//! The bootstrapper only ever emits two kinds of events: an error when the
//! connection could not be prepared and an info event once it is ready. Both
//! carry a small map of structured fields, so the capability is kept to those
//! two calls. Tests substitute a recording double.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::TryInitError;

/// Structured fields attached to a log event.
pub type LogFields = BTreeMap<String, serde_json::Value>;

/// Leveled structured logging used by the bootstrapper.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str, fields: &LogFields);
    fn error(&self, message: &str, fields: &LogFields);
}

/// Forwards events to the global `tracing` dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

struct DisplayFields<'a>(&'a LogFields);

impl fmt::Display for DisplayFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str, fields: &LogFields) {
        tracing::info!(fields = %DisplayFields(fields), "{message}");
    }

    fn error(&self, message: &str, fields: &LogFields) {
        tracing::error!(fields = %DisplayFields(fields), "{message}");
    }
}

/// Subscriber settings for [`init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `EnvFilter` directive, e.g. `info` or `dashboard_client=debug`.
    pub level: String,
    /// Emit newline-delimited JSON instead of human readable lines.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `settings.level` when set.
///
/// # Errors
/// Returns [`TryInitError`] if a global subscriber is already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Result<(), TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fields_render_as_json() {
        let fields = LogFields::from([
            ("target".to_owned(), json!("localhost:9000")),
            ("attempt".to_owned(), json!(1)),
        ]);
        assert_eq!(
            DisplayFields(&fields).to_string(),
            r#"{"attempt":1,"target":"localhost:9000"}"#
        );
    }

    #[test]
    fn default_settings() {
        let settings = LoggingSettings::default();
        assert_eq!(settings.level, "info");
        assert!(!settings.json);
    }

    #[test]
    fn init_tracing_installs_once() {
        let settings = LoggingSettings {
            level: "debug".to_owned(),
            json: true,
        };
        assert!(init_tracing(&settings).is_ok());
        assert!(init_tracing(&settings).is_err());

        TracingLogger.info("after init", &LogFields::new());
    }
}
