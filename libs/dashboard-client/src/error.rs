use thiserror::Error;

use crate::bootstrap::BootstrapError;

/// Errors returned while bootstrapping the dashboard client.
///
/// Credential failures and connection failures are kept apart so callers can
/// tell a missing discovery control plane from a bad target.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// Discovery-backed credentials could not be built.
    #[error("failed to create xds credentials: {0}")]
    CredentialConstruction(#[source] BootstrapError),

    /// The local connection object could not be created.
    #[error("failed to open connection to {target}: {source}")]
    ConnectionOpen {
        target: String,
        #[source]
        source: ConnectionOpenError,
    },

    /// Client settings could not be loaded.
    #[error("invalid client settings: {0}")]
    Settings(#[from] Box<figment::Error>),
}

/// Synchronous failures raised while creating the channel.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConnectionOpenError {
    #[error("malformed target '{0}'")]
    MalformedTarget(String),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    /// The channel worker needs a Tokio runtime and none is running.
    #[error("no Tokio runtime is running on this thread")]
    NoRuntime,
}

/// A call was issued through a facade that has already been closed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("connection closed")]
pub struct ConnectionClosed;

impl From<ConnectionClosed> for tonic::Status {
    fn from(err: ConnectionClosed) -> Self {
        tonic::Status::unavailable(err.to_string())
    }
}
