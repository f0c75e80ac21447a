//! Shared gRPC connection.
//!
//! This module owns the transport-level side of the bootstrap:
//! - Endpoint configuration (connect timeout, TCP and HTTP/2 keepalive)
//! - Load balancing policy selection
//! - A one-shot close guard shared by every clone of the connection
//!
//! **Note:** no per-call timeout is configured here. Deadlines belong to the
//! caller and are set per request.
//!
//! The channel is created lazily: `open` only fails for problems that can be
//! detected locally (malformed target, rejected TLS settings). Reachability is
//! reported by the first RPC.

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tonic::body::Body;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tower::{BoxError, Service, ServiceExt};

use crate::bootstrap::BootstrapSource;
use crate::credentials::{CredentialMode, TransportCredentials};
use crate::error::{ConnectionClosed, ConnectionOpenError};
use crate::target::dial_uri;

/// Upper bound for establishing the underlying transport connection.
pub const CONTEXT_TIMEOUT: Duration = Duration::from_secs(15);

const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const HTTP2_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const HTTP2_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

fn duration_to_u64_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Load balancing across the backends a target resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    PickFirst,
}

impl LoadBalancingPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::PickFirst => "pick_first",
        }
    }

    /// gRPC service config selecting this policy, as reported when the
    /// channel is created.
    #[must_use]
    pub fn service_config(self) -> String {
        serde_json::json!({ "loadBalancingPolicy": self.as_str() }).to_string()
    }
}

/// Connection-level settings applied to every facade.
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    pub load_balancing: LoadBalancingPolicy,

    /// Timeout for establishing the transport connection.
    pub connect_timeout: Duration,

    pub tcp_keepalive: Option<Duration>,
    pub http2_keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,

    /// Where discovery credentials read the control-plane bootstrap from.
    pub discovery_bootstrap: BootstrapSource,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            load_balancing: LoadBalancingPolicy::RoundRobin,
            connect_timeout: CONTEXT_TIMEOUT,
            tcp_keepalive: Some(TCP_KEEPALIVE),
            http2_keep_alive_interval: HTTP2_KEEPALIVE_INTERVAL,
            keep_alive_timeout: HTTP2_KEEPALIVE_TIMEOUT,
            discovery_bootstrap: BootstrapSource::FromEnv,
        }
    }
}

impl ConnectionPolicy {
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_load_balancing(mut self, policy: LoadBalancingPolicy) -> Self {
        self.load_balancing = policy;
        self
    }

    #[must_use]
    pub fn with_discovery_bootstrap(mut self, source: BootstrapSource) -> Self {
        self.discovery_bootstrap = source;
        self
    }
}

fn build_endpoint(
    uri: String,
    policy: &ConnectionPolicy,
    tls: Option<&ClientTlsConfig>,
) -> Result<Endpoint, tonic::transport::Error> {
    let endpoint = Endpoint::from_shared(uri)?
        .connect_timeout(policy.connect_timeout)
        .tcp_keepalive(policy.tcp_keepalive)
        .http2_keep_alive_interval(policy.http2_keep_alive_interval)
        .keep_alive_timeout(policy.keep_alive_timeout)
        .keep_alive_while_idle(true);

    match tls {
        Some(tls) => endpoint.tls_config(tls.clone()),
        None => Ok(endpoint),
    }
}

struct Shared {
    target: String,
    mode: CredentialMode,
    channel: ArcSwapOption<Channel>,
}

/// One shared transport handle.
///
/// Clones share the underlying channel and the close guard, so a generated
/// client bound with `FooClient::new(connection.clone())` stops working as
/// soon as any holder calls [`Connection::close`].
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.shared.target)
            .field("mode", &self.shared.mode)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Create the channel for `target`.
    ///
    /// Must be called from within a Tokio runtime; the channel worker is
    /// spawned onto it.
    ///
    /// # Errors
    /// Returns [`ConnectionOpenError`] if the target is malformed, the
    /// transport rejects the endpoint settings or no runtime is running.
    pub fn open(
        target: &str,
        credentials: &TransportCredentials,
        policy: &ConnectionPolicy,
    ) -> Result<Self, ConnectionOpenError> {
        let span = tracing::debug_span!(
            "grpc_connect",
            dial_target = %target,
            mode = credentials.mode().as_str(),
        );
        let _entered = span.enter();

        let tls = credentials.tls();
        let uri = dial_uri(target, tls.is_some())?;
        let endpoint = build_endpoint(uri, policy, tls)?;

        // Both channel constructors spawn their worker onto the current runtime.
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ConnectionOpenError::NoRuntime);
        }

        let channel = match policy.load_balancing {
            LoadBalancingPolicy::RoundRobin => Channel::balance_list(std::iter::once(endpoint)),
            LoadBalancingPolicy::PickFirst => endpoint.connect_lazy(),
        };

        tracing::debug!(
            load_balancing = policy.load_balancing.as_str(),
            service_config = %policy.load_balancing.service_config(),
            connect_timeout_ms = duration_to_u64_ms(policy.connect_timeout),
            tls = tls.is_some(),
            "gRPC channel created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                target: target.to_owned(),
                mode: credentials.mode(),
                channel: ArcSwapOption::from_pointee(channel),
            }),
        })
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    #[must_use]
    pub fn credential_mode(&self) -> CredentialMode {
        self.shared.mode
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.channel.load().is_none()
    }

    /// Release the channel. Returns `true` only for the call that actually
    /// closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        let closed = self.shared.channel.swap(None).is_some();
        if closed {
            tracing::debug!(dial_target = %self.shared.target, "gRPC channel closed");
        }
        closed
    }
}

// Boxed as a `Status` so tonic's error mapping finds the code.
fn closed_status() -> BoxError {
    Box::new(tonic::Status::from(ConnectionClosed))
}

impl Service<http::Request<Body>> for Connection {
    type Response = http::Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_closed() {
            Poll::Ready(Err(closed_status()))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        let channel = self.shared.channel.load_full();
        Box::pin(async move {
            let Some(channel) = channel else {
                return Err(closed_status());
            };
            Channel::clone(&*channel)
                .oneshot(request)
                .await
                .map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ConnectionPolicy::default();
        assert_eq!(policy.load_balancing, LoadBalancingPolicy::RoundRobin);
        assert_eq!(policy.connect_timeout, Duration::from_secs(15));
        assert_eq!(policy.tcp_keepalive, Some(Duration::from_secs(30)));
        assert_eq!(policy.discovery_bootstrap, BootstrapSource::FromEnv);
    }

    #[test]
    fn test_policy_builder() {
        let policy = ConnectionPolicy::default()
            .with_connect_timeout(Duration::from_secs(5))
            .with_load_balancing(LoadBalancingPolicy::PickFirst)
            .with_discovery_bootstrap(BootstrapSource::Inline("{}".to_owned()));

        assert_eq!(policy.connect_timeout, Duration::from_secs(5));
        assert_eq!(policy.load_balancing, LoadBalancingPolicy::PickFirst);
        assert_eq!(
            policy.discovery_bootstrap,
            BootstrapSource::Inline("{}".to_owned())
        );
    }

    #[test]
    fn test_service_config() {
        assert_eq!(
            LoadBalancingPolicy::RoundRobin.service_config(),
            r#"{"loadBalancingPolicy":"round_robin"}"#
        );
    }

    #[test]
    fn test_build_endpoint_succeeds() {
        let policy = ConnectionPolicy::default();
        let result = build_endpoint("http://localhost:50051".to_owned(), &policy, None);
        assert!(
            result.is_ok(),
            "build_endpoint should succeed with valid URI"
        );
    }

    #[test]
    fn test_build_endpoint_empty_uri() {
        let policy = ConnectionPolicy::default();
        let result = build_endpoint(String::new(), &policy, None);
        assert!(result.is_err(), "build_endpoint should fail with empty URI");
    }

    #[tokio::test]
    async fn test_open_is_lazy_and_close_is_one_shot() {
        let conn = Connection::open(
            "127.0.0.1:1",
            &TransportCredentials::Insecure,
            &ConnectionPolicy::default(),
        )
        .unwrap();

        assert_eq!(conn.target(), "127.0.0.1:1");
        assert_eq!(conn.credential_mode(), CredentialMode::Insecure);
        assert!(!conn.is_closed());

        let clone = conn.clone();
        assert!(clone.close());
        assert!(conn.is_closed());
        assert!(!conn.close());
    }

    #[tokio::test]
    async fn test_open_rejects_malformed_target() {
        let err = Connection::open(
            "xds:///",
            &TransportCredentials::Insecure,
            &ConnectionPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConnectionOpenError::MalformedTarget(_)));
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let mut conn = Connection::open(
            "127.0.0.1:1",
            &TransportCredentials::Insecure,
            &ConnectionPolicy::default().with_load_balancing(LoadBalancingPolicy::PickFirst),
        )
        .unwrap();
        conn.close();

        let err = ServiceExt::<http::Request<Body>>::ready(&mut conn)
            .await
            .unwrap_err();
        let status = tonic::Status::from_error(err);
        assert_eq!(status.code(), tonic::Code::Unavailable);

        let err = conn
            .call(http::Request::new(Body::empty()))
            .await
            .unwrap_err();
        let status = tonic::Status::from_error(err);
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert_eq!(status.message(), "connection closed");
    }

    #[test]
    fn test_open_without_runtime_is_an_error() {
        let err = Connection::open(
            "localhost:9000",
            &TransportCredentials::Insecure,
            &ConnectionPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConnectionOpenError::NoRuntime));
    }
}
