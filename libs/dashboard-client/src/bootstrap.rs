//! Discovery control-plane bootstrap.
//!
//! Discovery credentials need to know where the control plane lives and which
//! certificates secure the data plane. Like other xDS clients, the location of
//! that document is taken from the process environment:
//!
//! - `GRPC_XDS_BOOTSTRAP` names a JSON file;
//! - `GRPC_XDS_BOOTSTRAP_CONFIG` holds the JSON inline.
//!
//! The file variable takes precedence. Only the subset of the document this
//! crate acts on is modelled; unknown keys are ignored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

pub const BOOTSTRAP_FILE_ENV: &str = "GRPC_XDS_BOOTSTRAP";
pub const BOOTSTRAP_CONFIG_ENV: &str = "GRPC_XDS_BOOTSTRAP_CONFIG";

const FILE_WATCHER_PLUGIN: &str = "file_watcher";
const DEFAULT_PROVIDER: &str = "default";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BootstrapError {
    #[error("bootstrap environment variables ({BOOTSTRAP_FILE_ENV} or {BOOTSTRAP_CONFIG_ENV}) are unspecified")]
    Unspecified,

    #[error("failed to read bootstrap file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse bootstrap config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("bootstrap config lists no xds server with a server_uri")]
    NoServers,

    #[error("certificate provider '{provider}' is missing {field}")]
    IncompleteProvider {
        provider: String,
        field: &'static str,
    },

    #[error("failed to read certificate material {}: {source}", .path.display())]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the bootstrap document comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BootstrapSource {
    /// Consult `GRPC_XDS_BOOTSTRAP` then `GRPC_XDS_BOOTSTRAP_CONFIG`.
    #[default]
    FromEnv,
    /// A bootstrap file at a fixed path.
    File(PathBuf),
    /// The JSON document itself.
    Inline(String),
}

impl BootstrapSource {
    /// Load and validate the bootstrap document.
    ///
    /// # Errors
    /// Returns [`BootstrapError`] if no source is configured, the document
    /// cannot be read or parsed, or it names no control-plane server.
    pub fn load(&self) -> Result<BootstrapConfig, BootstrapError> {
        match self {
            Self::FromEnv => {
                if let Some(path) = non_empty_var(BOOTSTRAP_FILE_ENV) {
                    read_file(Path::new(&path))
                } else if let Some(json) = non_empty_var(BOOTSTRAP_CONFIG_ENV) {
                    BootstrapConfig::parse(&json)
                } else {
                    Err(BootstrapError::Unspecified)
                }
            }
            Self::File(path) => read_file(path),
            Self::Inline(json) => BootstrapConfig::parse(json),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_file(path: &Path) -> Result<BootstrapConfig, BootstrapError> {
    let raw = std::fs::read_to_string(path).map_err(|source| BootstrapError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    BootstrapConfig::parse(&raw)
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub xds_servers: Vec<XdsServer>,
    #[serde(default)]
    pub node: Option<Node>,
    #[serde(default)]
    pub certificate_providers: BTreeMap<String, CertificateProvider>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XdsServer {
    pub server_uri: String,
    #[serde(default)]
    pub channel_creds: Vec<ChannelCreds>,
    #[serde(default)]
    pub server_features: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelCreds {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub cluster: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateProvider {
    pub plugin_name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Config of the `file_watcher` certificate provider plugin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileWatcherConfig {
    pub certificate_file: Option<PathBuf>,
    pub private_key_file: Option<PathBuf>,
    pub ca_certificate_file: Option<PathBuf>,
}

impl BootstrapConfig {
    /// Parse and validate a bootstrap document.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Parse`] for invalid JSON and
    /// [`BootstrapError::NoServers`] when no control plane is named.
    pub fn parse(json: &str) -> Result<Self, BootstrapError> {
        let config: Self = serde_json::from_str(json)?;
        if config
            .xds_servers
            .iter()
            .all(|s| s.server_uri.trim().is_empty())
        {
            return Err(BootstrapError::NoServers);
        }
        Ok(config)
    }

    /// First usable control-plane server URI.
    #[must_use]
    pub fn server_uri(&self) -> Option<&str> {
        self.xds_servers
            .iter()
            .map(|s| s.server_uri.as_str())
            .find(|uri| !uri.trim().is_empty())
    }

    /// The `file_watcher` provider to secure the data plane with, preferring
    /// the one named `default`.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Parse`] if the provider config is malformed.
    pub fn file_watcher(&self) -> Result<Option<(&str, FileWatcherConfig)>, BootstrapError> {
        let provider = self
            .certificate_providers
            .get_key_value(DEFAULT_PROVIDER)
            .filter(|(_, p)| p.plugin_name == FILE_WATCHER_PLUGIN)
            .or_else(|| {
                self.certificate_providers
                    .iter()
                    .find(|(_, p)| p.plugin_name == FILE_WATCHER_PLUGIN)
            });

        let Some((name, provider)) = provider else {
            return Ok(None);
        };
        let config: FileWatcherConfig = serde_json::from_value(provider.config.clone())?;
        Ok(Some((name.as_str(), config)))
    }

    /// Build TLS settings from the `file_watcher` provider, if one is present.
    ///
    /// A provider must at least name a CA bundle. Client identity is attached
    /// when both certificate and key are configured.
    ///
    /// # Errors
    /// Returns [`BootstrapError`] if the provider is incomplete or a PEM file
    /// cannot be read.
    pub fn tls_config(&self) -> Result<Option<ClientTlsConfig>, BootstrapError> {
        let Some((name, watcher)) = self.file_watcher()? else {
            return Ok(None);
        };

        let ca_path =
            watcher
                .ca_certificate_file
                .as_deref()
                .ok_or_else(|| BootstrapError::IncompleteProvider {
                    provider: name.to_owned(),
                    field: "ca_certificate_file",
                })?;
        let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(read_pem(ca_path)?));

        match (&watcher.certificate_file, &watcher.private_key_file) {
            (Some(cert), Some(key)) => {
                tls = tls.identity(Identity::from_pem(read_pem(cert)?, read_pem(key)?));
            }
            (Some(_), None) => {
                return Err(BootstrapError::IncompleteProvider {
                    provider: name.to_owned(),
                    field: "private_key_file",
                });
            }
            (None, Some(_)) => {
                return Err(BootstrapError::IncompleteProvider {
                    provider: name.to_owned(),
                    field: "certificate_file",
                });
            }
            (None, None) => {}
        }

        Ok(Some(tls))
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, BootstrapError> {
    std::fs::read(path).map_err(|source| BootstrapError::Certificate {
        path: path.to_path_buf(),
        source,
    })
}
