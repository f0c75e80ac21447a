//! Transport credential selection.
//!
//! The choice between plaintext and discovery-negotiated security is a small
//! decision table evaluated top to bottom; the first matching rule wins.
//!
//! | # | condition                                             | mode                          |
//! |---|-------------------------------------------------------|-------------------------------|
//! | 1 | environment reports development                       | `Insecure`                    |
//! | 2 | explicit address without the `xds://` scheme          | `Insecure`                    |
//! | 3 | anything else (default target, or `xds://` address)   | `DiscoverySecureWithFallback` |
//!
//! Rules 1 and 2 agree today, so their relative order is not observable. If
//! development ever needs discovery security, rule 1 has to move.

use tonic::transport::ClientTlsConfig;

use crate::bootstrap::{BootstrapError, BootstrapSource};
use crate::env::Environment;
use crate::error::ClientError;
use crate::target::has_discovery_scheme;

/// Transport-security mode attached to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialMode {
    /// Plaintext HTTP/2.
    Insecure,
    /// Credentials negotiated through the discovery control plane, falling
    /// back to plaintext where the control plane provides no security.
    DiscoverySecureWithFallback,
}

impl CredentialMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insecure => "insecure",
            Self::DiscoverySecureWithFallback => "xds",
        }
    }
}

struct SelectionInput<'a> {
    env: Option<&'a dyn Environment>,
    target: &'a str,
    explicit_address: bool,
}

struct Rule {
    name: &'static str,
    matches: fn(&SelectionInput<'_>) -> bool,
    mode: CredentialMode,
}

static RULES: [Rule; 3] = [
    Rule {
        name: "development",
        matches: |input| input.env.is_some_and(|env| env.is_development()),
        mode: CredentialMode::Insecure,
    },
    Rule {
        name: "explicit-direct-address",
        matches: |input| input.explicit_address && !has_discovery_scheme(input.target),
        mode: CredentialMode::Insecure,
    },
    Rule {
        name: "discovery",
        matches: |_| true,
        mode: CredentialMode::DiscoverySecureWithFallback,
    },
];

/// Pick the credential mode for `target`.
///
/// An absent environment counts as "not development".
#[must_use]
pub fn select_credentials(
    env: Option<&dyn Environment>,
    target: &str,
    explicit_address_supplied: bool,
) -> CredentialMode {
    let input = SelectionInput {
        env,
        target,
        explicit_address: explicit_address_supplied,
    };

    let rule = RULES
        .iter()
        .find(|rule| (rule.matches)(&input))
        .unwrap_or(&RULES[RULES.len() - 1]);

    tracing::debug!(
        rule = rule.name,
        mode = rule.mode.as_str(),
        dial_target = target,
        "selected transport credentials"
    );
    rule.mode
}

/// Discovery-backed credentials with an insecure fallback.
#[derive(Debug, Clone)]
pub struct DiscoveryCredentials {
    control_plane: String,
    tls: Option<ClientTlsConfig>,
}

impl DiscoveryCredentials {
    /// Build credentials from the discovery bootstrap.
    ///
    /// # Errors
    /// Returns [`BootstrapError`] when the bootstrap is missing or unusable.
    pub fn new(source: &BootstrapSource) -> Result<Self, BootstrapError> {
        let bootstrap = source.load()?;
        let tls = bootstrap.tls_config()?;
        let control_plane = bootstrap.server_uri().unwrap_or_default().to_owned();
        Ok(Self { control_plane, tls })
    }

    /// Control-plane server named by the bootstrap.
    #[must_use]
    pub fn control_plane(&self) -> &str {
        &self.control_plane
    }

    /// `true` when the control plane supplies no certificates and plaintext
    /// is used instead.
    #[must_use]
    pub fn uses_fallback(&self) -> bool {
        self.tls.is_none()
    }
}

/// Credential material for a [`CredentialMode`].
#[derive(Debug, Clone)]
pub enum TransportCredentials {
    Insecure,
    Discovery(DiscoveryCredentials),
}

impl TransportCredentials {
    /// Materialise `mode`. Only the discovery mode can fail.
    ///
    /// # Errors
    /// Returns [`ClientError::CredentialConstruction`] if discovery credentials
    /// cannot be built.
    pub fn build(mode: CredentialMode, bootstrap: &BootstrapSource) -> Result<Self, ClientError> {
        match mode {
            CredentialMode::Insecure => Ok(Self::Insecure),
            CredentialMode::DiscoverySecureWithFallback => DiscoveryCredentials::new(bootstrap)
                .map(Self::Discovery)
                .map_err(ClientError::CredentialConstruction),
        }
    }

    #[must_use]
    pub fn mode(&self) -> CredentialMode {
        match self {
            Self::Insecure => CredentialMode::Insecure,
            Self::Discovery(_) => CredentialMode::DiscoverySecureWithFallback,
        }
    }

    /// TLS settings to apply to the endpoint, if any.
    #[must_use]
    pub fn tls(&self) -> Option<&ClientTlsConfig> {
        match self {
            Self::Insecure => None,
            Self::Discovery(creds) => creds.tls.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::AppEnv;
    use crate::target::{DEFAULT_DISCOVERY_TARGET, resolve};

    const DEV: AppEnv = AppEnv::Development;
    const PROD: AppEnv = AppEnv::Production;

    fn select(env: Option<&AppEnv>, address: &str) -> CredentialMode {
        let target = resolve(address);
        select_credentials(
            env.map(|e| e as &dyn Environment),
            &target,
            !address.is_empty(),
        )
    }

    #[test]
    fn development_is_always_insecure() {
        for address in ["", "localhost:9000", "xds://my-service", "ab"] {
            assert_eq!(select(Some(&DEV), address), CredentialMode::Insecure);
        }
    }

    #[test]
    fn explicit_direct_address_is_insecure() {
        assert_eq!(select(Some(&PROD), "localhost:9000"), CredentialMode::Insecure);
    }

    #[test]
    fn explicit_discovery_address_is_secure() {
        assert_eq!(
            select(Some(&PROD), "xds://my-service"),
            CredentialMode::DiscoverySecureWithFallback
        );
    }

    #[test]
    fn default_target_is_secure() {
        assert_eq!(select(Some(&PROD), ""), CredentialMode::DiscoverySecureWithFallback);
    }

    #[test]
    fn short_address_is_insecure() {
        assert_eq!(select(Some(&PROD), "ab"), CredentialMode::Insecure);
        assert_eq!(select(Some(&PROD), "xds:/"), CredentialMode::Insecure);
    }

    #[test]
    fn absent_environment_is_not_development() {
        assert_eq!(select(None, ""), CredentialMode::DiscoverySecureWithFallback);
        assert_eq!(select(None, "localhost:9000"), CredentialMode::Insecure);
    }

    #[test]
    fn default_target_without_explicit_flag_ignores_its_shape() {
        // The default target has no `xds://` prefix but was not supplied
        // explicitly, so rule 2 does not apply.
        assert!(!has_discovery_scheme(DEFAULT_DISCOVERY_TARGET));
        assert_eq!(
            select_credentials(Some(&PROD as &dyn Environment), DEFAULT_DISCOVERY_TARGET, false),
            CredentialMode::DiscoverySecureWithFallback
        );
    }

    #[test]
    fn insecure_build_never_fails() {
        let creds =
            TransportCredentials::build(CredentialMode::Insecure, &BootstrapSource::FromEnv)
                .unwrap();
        assert_eq!(creds.mode(), CredentialMode::Insecure);
        assert!(creds.tls().is_none());
    }

    #[test]
    fn discovery_build_without_bootstrap_fails() {
        let err = TransportCredentials::build(
            CredentialMode::DiscoverySecureWithFallback,
            &BootstrapSource::Inline("{}".to_owned()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ClientError::CredentialConstruction(BootstrapError::NoServers)
        ));
    }

    #[test]
    fn discovery_build_falls_back_without_certificates() {
        let creds = TransportCredentials::build(
            CredentialMode::DiscoverySecureWithFallback,
            &BootstrapSource::Inline(
                r#"{ "xds_servers": [{ "server_uri": "cp:18000" }] }"#.to_owned(),
            ),
        )
        .unwrap();
        let TransportCredentials::Discovery(discovery) = &creds else {
            panic!("expected discovery credentials");
        };
        assert_eq!(discovery.control_plane(), "cp:18000");
        assert!(discovery.uses_fallback());
        assert!(creds.tls().is_none());
    }
}
