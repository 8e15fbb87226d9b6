//! Transport configuration and target synthesis.
//!
//! [`TransportConfig`] is the whole configuration surface of the adapter.
//! It can be built in code with the `with_*` methods or loaded from JSON.
//!
//! # Example
//!
//! ```
//! use mqtt_ws_socket::TransportConfig;
//!
//! let config = TransportConfig::new()
//!     .with_tls()
//!     .with_path("/ws")
//!     .with_header("Authorization", "Bearer token");
//!
//! let target = config.resolve("broker.local", 8884).unwrap();
//! assert_eq!(target.url.as_str(), "wss://broker.local:8884/ws");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::backend::BackendSelection;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default path appended to `scheme://host:port`.
pub const DEFAULT_PATH: &str = "/mqtt";

/// Sub-protocol advertised by default.
pub const DEFAULT_PROTOCOL: &str = "mqtt";

/// Default handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// TransportConfig
// ============================================================================

/// Adapter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Use `wss` instead of `ws` when composing the URL.
    pub enable_tls: bool,

    /// Use [`uri`](Self::uri) verbatim and ignore host/port.
    pub use_uri_verbatim: bool,

    /// Fully preconfigured target, only read in verbatim mode.
    pub uri: Option<String>,

    /// Path suffix for composed URLs.
    pub path: String,

    /// Extra handshake headers.
    pub headers: BTreeMap<String, String>,

    /// Sub-protocols advertised in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,

    /// Backend variant selection.
    pub backend: BackendSelection,

    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Accept any server certificate. Development only.
    pub allow_untrusted_certificates: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl TransportConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enable_tls: false,
            use_uri_verbatim: false,
            uri: None,
            path: DEFAULT_PATH.to_string(),
            headers: BTreeMap::new(),
            protocols: vec![DEFAULT_PROTOCOL.to_string()],
            backend: BackendSelection::Auto,
            connect_timeout_ms: millis(DEFAULT_CONNECT_TIMEOUT),
            allow_untrusted_certificates: false,
        }
    }

    /// Parses a configuration from a JSON document.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document is malformed.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the file cannot be read
    /// - [`Error::Json`] if the document is malformed
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl TransportConfig {
    /// Enables TLS (`wss` scheme).
    #[inline]
    #[must_use]
    pub fn with_tls(mut self) -> Self {
        self.enable_tls = true;
        self
    }

    /// Uses `uri` verbatim for every connect.
    #[inline]
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self.use_uri_verbatim = true;
        self
    }

    /// Sets the path suffix for composed URLs.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Adds a handshake header.
    #[inline]
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Replaces the advertised sub-protocols.
    #[inline]
    #[must_use]
    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Selects the backend variant.
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: BackendSelection) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    /// Accepts any server certificate.
    ///
    /// Never enable this outside development setups.
    #[inline]
    #[must_use]
    pub fn with_untrusted_certificates(mut self) -> Self {
        self.allow_untrusted_certificates = true;
        self
    }

    /// Returns the configured handshake timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

// ============================================================================
// Target Synthesis
// ============================================================================

/// URL and headers for one connection attempt.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// WebSocket URL (`ws` or `wss`).
    pub url: Url,
    /// Validated handshake headers, sub-protocol included.
    pub headers: HeaderMap,
}

impl ResolvedTarget {
    /// Returns `true` if the URL requires TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }
}

impl TransportConfig {
    /// Synthesizes the target for `host:port`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] if no valid `ws`/`wss` URL can be built
    /// - [`Error::InvalidHeader`] if a header name or value is unusable
    pub fn resolve(&self, host: &str, port: u16) -> Result<ResolvedTarget> {
        let url = self.target_url(host, port)?;
        let headers = self.handshake_headers()?;
        Ok(ResolvedTarget { url, headers })
    }

    /// Builds the target URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the URL cannot be built.
    pub fn target_url(&self, host: &str, port: u16) -> Result<Url> {
        if self.use_uri_verbatim {
            let raw = self
                .uri
                .as_deref()
                .ok_or_else(|| Error::invalid_url("", "verbatim mode requires a configured uri"))?;
            let url = Url::parse(raw).map_err(|e| Error::invalid_url(raw, e))?;
            return Self::validate_url(url, raw);
        }

        let host = host.trim();
        if host.is_empty() {
            return Err(Error::invalid_url(host, "empty host"));
        }

        let scheme = if self.enable_tls { "wss" } else { "ws" };
        let host = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]")
        } else {
            host.to_string()
        };
        let path = match self.path.as_str() {
            "" => String::new(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        };

        let raw = format!("{scheme}://{host}:{port}{path}");
        let url = Url::parse(&raw).map_err(|e| Error::invalid_url(&raw, e))?;
        Self::validate_url(url, &raw)
    }

    /// Builds the validated header map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] for a name or value that cannot be
    /// sent in an HTTP upgrade request.
    pub fn handshake_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::invalid_header(name, e))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| Error::invalid_header(name, e))?;
            headers.insert(header_name, header_value);
        }

        let protocols: Vec<&str> = self
            .protocols
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();

        if !protocols.is_empty() && !headers.contains_key(SEC_WEBSOCKET_PROTOCOL) {
            let joined = protocols.join(", ");
            let value = HeaderValue::from_str(&joined)
                .map_err(|e| Error::invalid_header(SEC_WEBSOCKET_PROTOCOL.as_str(), e))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        Ok(headers)
    }

    fn validate_url(url: Url, raw: &str) -> Result<Url> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::invalid_url(
                raw,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        match url.host_str() {
            Some(h) if !h.is_empty() => Ok(url),
            _ => Err(Error::invalid_url(raw, "missing host")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert!(!config.enable_tls);
        assert!(!config.use_uri_verbatim);
        assert_eq!(config.path, "/mqtt");
        assert_eq!(config.protocols, vec!["mqtt".to_string()]);
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert!(!config.allow_untrusted_certificates);
    }

    #[test]
    fn test_connect_timeout_saturates() {
        let config = TransportConfig::new().with_connect_timeout(Duration::MAX);
        assert_eq!(config.connect_timeout_ms, u64::MAX);
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
    }

    #[test]
    fn test_composed_url_plain() {
        let url = TransportConfig::new().target_url("10.0.0.5", 8083).unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.5:8083/mqtt");
    }

    #[test]
    fn test_composed_url_tls_and_path_without_slash() {
        let url = TransportConfig::new()
            .with_tls()
            .with_path("ws")
            .target_url("broker.local", 8884)
            .unwrap();
        assert_eq!(url.as_str(), "wss://broker.local:8884/ws");
    }

    #[test]
    fn test_composed_url_ipv6_host() {
        let url = TransportConfig::new()
            .with_path("")
            .target_url("::1", 9001)
            .unwrap();
        assert_eq!(url.host_str(), Some("[::1]"));
        assert_eq!(url.port(), Some(9001));
    }

    #[test]
    fn test_verbatim_uri_ignores_host_and_port() {
        let config = TransportConfig::new().with_uri("wss://gateway.example/mqtt?token=abc");
        let url = config.target_url("ignored", 1).unwrap();
        assert_eq!(url.as_str(), "wss://gateway.example/mqtt?token=abc");
    }

    #[test]
    fn test_verbatim_without_uri_is_invalid() {
        let config = TransportConfig {
            use_uri_verbatim: true,
            ..TransportConfig::default()
        };
        let err = config.target_url("host", 1).unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_verbatim_rejects_http_scheme() {
        let err = TransportConfig::new()
            .with_uri("http://broker.local/mqtt")
            .target_url("", 0)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_malformed_host_is_invalid() {
        let config = TransportConfig::new();
        assert!(matches!(
            config.target_url("bad host", 1883),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(matches!(
            config.target_url("   ", 1883),
            Err(Error::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_headers_include_protocol() {
        let headers = TransportConfig::new()
            .with_header("X-Client", "sensor-7")
            .handshake_headers()
            .unwrap();

        assert_eq!(headers.get("x-client").unwrap(), "sensor-7");
        assert_eq!(headers.get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "mqtt");
    }

    #[test]
    fn test_explicit_protocol_header_wins() {
        let headers = TransportConfig::new()
            .with_header("Sec-WebSocket-Protocol", "mqttv3.1")
            .handshake_headers()
            .unwrap();

        assert_eq!(headers.get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "mqttv3.1");
    }

    #[test]
    fn test_multiple_protocols_joined() {
        let headers = TransportConfig::new()
            .with_protocols(["mqtt", "mqttv3.1"])
            .handshake_headers()
            .unwrap();

        assert_eq!(
            headers.get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "mqtt, mqttv3.1"
        );
    }

    #[test]
    fn test_invalid_header_value() {
        let err = TransportConfig::new()
            .with_header("X-Bad", "line\nbreak")
            .handshake_headers()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { .. }));
    }

    #[test]
    fn test_from_json_partial() {
        let config = TransportConfig::from_json_str(
            r#"{ "enable_tls": true, "headers": { "X-Home": "kitchen" }, "backend": "portable" }"#,
        )
        .unwrap();

        assert!(config.enable_tls);
        assert_eq!(config.path, "/mqtt");
        assert_eq!(config.backend, BackendSelection::Portable);
        assert_eq!(config.headers.get("X-Home").map(String::as_str), Some("kitchen"));
    }

    #[test]
    fn test_from_json_malformed() {
        let err = TransportConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
