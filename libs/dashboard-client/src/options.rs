//! Client options and the settings they can be loaded from.
//!
//! [`ClientOptions`] is the in-process input of [`crate::Facade::open`]: an
//! explicit address, an optional environment and a logger. [`ClientSettings`]
//! is its serializable counterpart, layered with `figment` from defaults, an
//! optional YAML file and `DASHBOARD_CLIENT_*` variables.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use crate::connection::{CONTEXT_TIMEOUT, ConnectionPolicy, LoadBalancingPolicy};
use crate::env::{AppEnv, Environment};
use crate::error::ClientError;
use crate::logging::{Logger, LoggingSettings};

/// Production address used by deployments that dial the service directly.
pub const DEFAULT_PRODUCTION_ADDRESS: &str = "localhost:50051";
/// Address of the service when run locally.
pub const DEFAULT_DEVELOPMENT_ADDRESS: &str = "localhost:8080";
/// Port the service listens on in development.
pub const DEV_PORT: u16 = 8080;

/// Prefix of environment variables overriding [`ClientSettings`].
pub const ENV_PREFIX: &str = "DASHBOARD_CLIENT_";

/// Bootstrap input for [`crate::Facade::open`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Address to dial, e.g. `localhost:8080` or `xds://dashboard`. Empty
    /// means "use the default discovery target".
    pub address: String,
    /// Environment classification. `None` counts as "not development".
    pub env: Option<Arc<dyn Environment>>,
    pub logger: Arc<dyn Logger>,
}

impl ClientOptions {
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            address: String::new(),
            env: None,
            logger,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: Arc<dyn Environment>) -> Self {
        self.env = Some(env);
        self
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("address", &self.address)
            .field(
                "development",
                &self.env.as_ref().map(|env| env.is_development()),
            )
            .finish_non_exhaustive()
    }
}

/// Serializable client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientSettings {
    pub address: String,
    pub environment: AppEnv,
    #[serde(with = "humantime_duration")]
    pub connect_timeout: Duration,
    pub load_balancing: LoadBalancingPolicy,
    pub logging: LoggingSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: String::new(),
            environment: AppEnv::default(),
            connect_timeout: CONTEXT_TIMEOUT,
            load_balancing: LoadBalancingPolicy::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ClientSettings {
    /// Layer defaults, then `path` (YAML) if given, then `DASHBOARD_CLIENT_*`
    /// variables. Nested keys use `__`, e.g. `DASHBOARD_CLIENT_LOGGING__LEVEL`.
    ///
    /// # Errors
    /// Returns [`ClientError::Settings`] if a layer is malformed or holds
    /// unknown keys.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ClientError::Settings(Box::new(e)))
    }

    #[must_use]
    pub fn connection_policy(&self) -> ConnectionPolicy {
        ConnectionPolicy::default()
            .with_connect_timeout(self.connect_timeout)
            .with_load_balancing(self.load_balancing)
    }

    #[must_use]
    pub fn into_options(self, logger: Arc<dyn Logger>) -> ClientOptions {
        ClientOptions {
            address: self.address,
            env: Some(Arc::new(self.environment)),
            logger,
        }
    }
}

/// `Duration` as a humantime string (`15s`, `1m 30s`).
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*d))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::TracingLogger;
    use std::io::Write;

    #[test]
    fn defaults_without_sources() {
        temp_env::with_vars_unset(
            [
                "DASHBOARD_CLIENT_ADDRESS",
                "DASHBOARD_CLIENT_ENVIRONMENT",
                "DASHBOARD_CLIENT_CONNECT_TIMEOUT",
            ],
            || {
                let settings = ClientSettings::load(None).unwrap();
                assert_eq!(settings, ClientSettings::default());
                assert_eq!(settings.connect_timeout, Duration::from_secs(15));
                assert_eq!(settings.environment, AppEnv::Production);
            },
        );
    }

    #[test]
    fn yaml_then_env_layering() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            "address: \"xds://dashboard\"\nenvironment: dev\nconnect_timeout: 5s\nlogging:\n  level: debug\n"
        )
        .unwrap();

        temp_env::with_vars(
            [
                ("DASHBOARD_CLIENT_ADDRESS", Some("localhost:9000")),
                ("DASHBOARD_CLIENT_LOGGING__JSON", Some("true")),
            ],
            || {
                let settings = ClientSettings::load(Some(file.path())).unwrap();
                assert_eq!(settings.address, "localhost:9000");
                assert_eq!(settings.environment, AppEnv::Development);
                assert_eq!(settings.connect_timeout, Duration::from_secs(5));
                assert_eq!(settings.logging.level, "debug");
                assert!(settings.logging.json);
            },
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "adress: typo").unwrap();
        let err = ClientSettings::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ClientError::Settings(_)));
    }

    #[test]
    fn into_options_carries_environment() {
        let settings = ClientSettings {
            address: "localhost:9000".to_owned(),
            environment: AppEnv::Development,
            ..ClientSettings::default()
        };
        let policy = settings.connection_policy();
        assert_eq!(policy.connect_timeout, CONTEXT_TIMEOUT);

        let options = settings.into_options(Arc::new(TracingLogger));
        assert_eq!(options.address, "localhost:9000");
        assert!(options.env.as_ref().is_some_and(|env| env.is_development()));
    }

    #[test]
    fn options_builder() {
        let options = ClientOptions::new(Arc::new(TracingLogger))
            .with_address(DEFAULT_DEVELOPMENT_ADDRESS)
            .with_env(Arc::new(AppEnv::Staging));
        assert_eq!(options.address, "localhost:8080");
        assert!(options.env.is_some());
        assert!(format!("{options:?}").contains("localhost:8080"));
    }
}
