//! Dial target resolution.

use crate::error::ConnectionOpenError;

/// Address prefix marking a target resolved through the discovery control plane.
pub const DISCOVERY_SCHEME: &str = "xds://";

/// Well-known production endpoint dialed when no address is configured.
pub const DEFAULT_DISCOVERY_TARGET: &str = "todo-service.svc.cluster.local:8443";

const DNS_SCHEME: &str = "dns:";

/// Returns the target to dial. An explicit address always wins.
#[must_use]
pub fn resolve(explicit_address: &str) -> String {
    if explicit_address.is_empty() {
        DEFAULT_DISCOVERY_TARGET.to_owned()
    } else {
        explicit_address.to_owned()
    }
}

/// Byte-wise check of the first six characters against [`DISCOVERY_SCHEME`].
#[must_use]
pub fn has_discovery_scheme(address: &str) -> bool {
    address.as_bytes().get(..DISCOVERY_SCHEME.len()) == Some(DISCOVERY_SCHEME.as_bytes())
}

/// Translate a resolved target into the URI handed to the transport.
///
/// `xds://` and `dns:` targets are reduced to their endpoint part, the last
/// path segment, since name resolution belongs to the runtime. Bare
/// `host:port` targets get `https://` when TLS material is attached.
///
/// # Errors
/// Returns [`ConnectionOpenError::MalformedTarget`] when nothing dialable
/// remains.
pub fn dial_uri(target: &str, tls: bool) -> Result<String, ConnectionOpenError> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Ok(target.to_owned());
    }

    let authority = if has_discovery_scheme(target) {
        last_segment(&target[DISCOVERY_SCHEME.len()..])
    } else if let Some(rest) = target.strip_prefix(DNS_SCHEME) {
        last_segment(rest)
    } else {
        target
    };

    if authority.is_empty() || authority.chars().any(char::is_whitespace) {
        return Err(ConnectionOpenError::MalformedTarget(target.to_owned()));
    }

    let scheme = if tls { "https" } else { "http" };
    Ok(format!("{scheme}://{authority}"))
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or_default()
}
