//! Environment classification consumed by the credential selector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Process variable read by [`AppEnv::from_process_env`].
pub const APP_ENV_VAR: &str = "APP_ENV";

/// Answers whether the client runs in a development environment.
pub trait Environment: Send + Sync {
    fn is_development(&self) -> bool;
}

/// Deployment environment of the calling application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    #[serde(alias = "dev", alias = "local")]
    Development,
    #[serde(alias = "stage")]
    Staging,
    #[default]
    #[serde(alias = "prod")]
    Production,
}

impl AppEnv {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Reads `APP_ENV`. Unset or unrecognised values fall back to production
    /// so that a misconfigured process never downgrades to plaintext.
    #[must_use]
    pub fn from_process_env() -> Self {
        std::env::var(APP_ENV_VAR)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }
}

impl Environment for AppEnv {
    fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown environment '{0}'")]
pub struct UnknownEnv(String);

impl FromStr for AppEnv {
    type Err = UnknownEnv;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(UnknownEnv(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("dev".parse::<AppEnv>().unwrap(), AppEnv::Development);
        assert_eq!(" Production ".parse::<AppEnv>().unwrap(), AppEnv::Production);
        assert_eq!("stage".parse::<AppEnv>().unwrap(), AppEnv::Staging);
        assert!("qa".parse::<AppEnv>().is_err());
    }

    #[test]
    fn only_development_is_development() {
        assert!(AppEnv::Development.is_development());
        assert!(!AppEnv::Staging.is_development());
        assert!(!AppEnv::Production.is_development());
    }

    #[test]
    fn process_env_defaults_to_production() {
        temp_env::with_var_unset(APP_ENV_VAR, || {
            assert_eq!(AppEnv::from_process_env(), AppEnv::Production);
        });
        temp_env::with_var(APP_ENV_VAR, Some("garbage"), || {
            assert_eq!(AppEnv::from_process_env(), AppEnv::Production);
        });
        temp_env::with_var(APP_ENV_VAR, Some("dev"), || {
            assert_eq!(AppEnv::from_process_env(), AppEnv::Development);
        });
    }
}
