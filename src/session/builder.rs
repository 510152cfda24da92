//! Builder pattern for session configuration.
//!
//! Provides a fluent API for configuring and creating [`Session`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use hass_session::Session;
//!
//! # fn example() -> hass_session::Result<()> {
//! let session = Session::builder()
//!     .url("http://homeassistant.local:8123")
//!     .token("long-lived-access-token")
//!     .request_timeout(Some(Duration::from_secs(10)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::transport::{
    Connector, ConnectionOptions, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT, WsConnector,
};

use super::core::Session;

// ============================================================================
// Constants
// ============================================================================

/// Endpoint used when none is configured.
pub const DEFAULT_URL: &str = "ws://localhost:8123/api/websocket";

/// Path of the WebSocket API below an instance's base URL.
const WEBSOCKET_PATH: &str = "/api/websocket";

/// Environment variable holding the WebSocket endpoint.
pub const ENV_WEBSOCKET_URL: &str = "HA_WEBSOCKET_URL";

/// Environment variable holding the instance base URL.
pub const ENV_URL: &str = "HA_URL";

/// Environment variable holding the access token.
pub const ENV_TOKEN: &str = "HA_TOKEN";

// ============================================================================
// SessionConfig
// ============================================================================

/// Validated, immutable session configuration.
///
/// Produced by [`SessionBuilder::build`].
#[derive(Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint.
    pub(crate) url: Url,
    /// Access token.
    pub(crate) token: String,
    /// Connection timing.
    pub(crate) options: ConnectionOptions,
    /// Opens the frame channel.
    pub(crate) connector: Arc<dyn Connector>,
}

impl SessionConfig {
    /// Returns the WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the connection timing options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> ConnectionOptions {
        self.options
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url.as_str())
            .field("token", &"<redacted>")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring a [`Session`] instance.
///
/// Use [`Session::builder()`] to create a new builder.
#[derive(Clone)]
pub struct SessionBuilder {
    /// Endpoint or instance base URL.
    url: Option<String>,
    /// Access token.
    token: Option<String>,
    /// Per-command timeout.
    request_timeout: Option<Duration>,
    /// Handshake timeout.
    handshake_timeout: Duration,
    /// Keepalive interval.
    keepalive_interval: Option<Duration>,
    /// Custom connector.
    connector: Option<Arc<dyn Connector>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            keepalive_interval: Some(DEFAULT_KEEPALIVE_INTERVAL),
            connector: None,
        }
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

// ============================================================================
// SessionBuilder Implementation
// ============================================================================

impl SessionBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder from the process environment.
    ///
    /// Reads `HA_WEBSOCKET_URL`, falling back to `HA_URL`, and `HA_TOKEN`.
    /// A missing token is reported by [`build`](Self::build).
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates a builder from an arbitrary variable source.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut builder = Self::new();

        if let Some(url) = lookup(ENV_WEBSOCKET_URL).or_else(|| lookup(ENV_URL)) {
            builder.url = Some(url);
        }
        builder.token = lookup(ENV_TOKEN);

        builder
    }

    /// Sets the endpoint.
    ///
    /// Accepts a `ws://`/`wss://` endpoint or an `http://`/`https://` base
    /// URL, which is converted to its WebSocket API endpoint.
    ///
    /// # Arguments
    ///
    /// * `url` - e.g. `ws://homeassistant.local:8123/api/websocket`
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the long-lived access token.
    #[inline]
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the per-command timeout; `None` disables it.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Sets the authentication handshake timeout.
    #[inline]
    #[must_use]
    pub fn handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    /// Sets the keepalive ping interval; `None` disables pings.
    #[inline]
    #[must_use]
    pub fn keepalive_interval(mut self, keepalive_interval: Option<Duration>) -> Self {
        self.keepalive_interval = keepalive_interval;
        self
    }

    /// Replaces the default WebSocket connector.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Validates the configuration and creates the session.
    ///
    /// No connection is opened until first use.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredential`] if no token (or a blank one) is set
    /// - [`Error::Url`] if the endpoint does not parse
    /// - [`Error::Config`] if the endpoint scheme is not ws, wss, http or
    ///   https, or the keepalive interval is zero
    pub fn build(self) -> Result<Session> {
        self.into_config().map(Session::new)
    }

    /// Validates the configuration without creating a session.
    ///
    /// # Errors
    ///
    /// Same as [`build`](Self::build).
    pub fn into_config(self) -> Result<SessionConfig> {
        let token = self.validate_token()?;
        self.validate_keepalive()?;
        let url = normalize_url(self.url.as_deref().unwrap_or(DEFAULT_URL))?;
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WsConnector),
        };

        Ok(SessionConfig {
            url,
            token,
            options: ConnectionOptions {
                request_timeout: self.request_timeout,
                handshake_timeout: self.handshake_timeout,
                keepalive_interval: self.keepalive_interval,
            },
            connector,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionBuilder {
    /// Validates the token configuration.
    fn validate_token(&self) -> Result<String> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(Error::missing_credential(
                "access token is required. Use .token() or set HA_TOKEN.",
            )),
        }
    }
}

impl SessionBuilder {
    /// Rejects a zero keepalive interval; use `None` to disable pings.
    fn validate_keepalive(&self) -> Result<()> {
        if self.keepalive_interval.is_some_and(|every| every.is_zero()) {
            return Err(Error::config(
                "keepalive interval must be non-zero; use None to disable pings",
            ));
        }
        Ok(())
    }
}

/// Parses `raw` and converts an http(s) base URL to its WebSocket endpoint.
fn normalize_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;

    let ws_scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::config(format!(
                "unsupported URL scheme '{other}' in {raw}; expected ws, wss, http or https"
            )));
        }
    };

    url.set_scheme(ws_scheme)
        .map_err(|()| Error::config(format!("cannot convert {raw} to a WebSocket URL")))?;

    if !url.path().ends_with(WEBSOCKET_PATH) {
        let path = format!("{}{WEBSOCKET_PATH}", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    use crate::transport::ChannelConnector;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: FxHashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionBuilder::new().token("abc").into_config().expect("config");
        assert_eq!(config.url().as_str(), DEFAULT_URL);
        assert_eq!(config.options(), ConnectionOptions::default());
    }

    #[test]
    fn test_missing_token() {
        let result = SessionBuilder::new().into_config();
        assert!(matches!(result, Err(Error::MissingCredential { .. })));
    }

    #[test]
    fn test_blank_token() {
        let result = SessionBuilder::new().token("   ").into_config();
        assert!(matches!(result, Err(Error::MissingCredential { .. })));
    }

    #[test]
    fn test_http_base_url_is_converted() {
        let config = SessionBuilder::new()
            .url("http://homeassistant.local:8123")
            .token("abc")
            .into_config()
            .expect("config");
        assert_eq!(
            config.url().as_str(),
            "ws://homeassistant.local:8123/api/websocket"
        );
    }

    #[test]
    fn test_https_base_url_with_trailing_slash() {
        let config = SessionBuilder::new()
            .url("https://example.org/ha/")
            .token("abc")
            .into_config()
            .expect("config");
        assert_eq!(config.url().as_str(), "wss://example.org/ha/api/websocket");
    }

    #[test]
    fn test_ws_url_is_kept() {
        let config = SessionBuilder::new()
            .url("wss://example.org/custom")
            .token("abc")
            .into_config()
            .expect("config");
        assert_eq!(config.url().as_str(), "wss://example.org/custom");
    }

    #[test]
    fn test_unsupported_scheme() {
        let result = SessionBuilder::new()
            .url("ftp://example.org")
            .token("abc")
            .into_config();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_unparseable_url() {
        let result = SessionBuilder::new().url("not a url").token("abc").into_config();
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn test_env_prefers_websocket_url() {
        let builder = SessionBuilder::from_lookup(lookup(&[
            (ENV_WEBSOCKET_URL, "ws://a:1/api/websocket"),
            (ENV_URL, "http://b:2"),
            (ENV_TOKEN, "abc"),
        ]));
        let config = builder.into_config().expect("config");
        assert_eq!(config.url().as_str(), "ws://a:1/api/websocket");
    }

    #[test]
    fn test_env_falls_back_to_base_url() {
        let builder =
            SessionBuilder::from_lookup(lookup(&[(ENV_URL, "http://b:2"), (ENV_TOKEN, "abc")]));
        let config = builder.into_config().expect("config");
        assert_eq!(config.url().as_str(), "ws://b:2/api/websocket");
    }

    #[test]
    fn test_env_without_token() {
        let builder = SessionBuilder::from_lookup(lookup(&[(ENV_URL, "http://b:2")]));
        assert!(matches!(
            builder.into_config(),
            Err(Error::MissingCredential { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let (connector, _acceptor) = ChannelConnector::new();
        let builder = SessionBuilder::new().token("super-secret").connector(connector);
        assert!(!format!("{builder:?}").contains("super-secret"));

        let config = builder.into_config().expect("config");
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_timing_options() {
        let config = SessionBuilder::new()
            .token("abc")
            .request_timeout(None)
            .handshake_timeout(Duration::from_secs(3))
            .keepalive_interval(None)
            .into_config()
            .expect("config");
        let options = config.options();
        assert_eq!(options.request_timeout, None);
        assert_eq!(options.handshake_timeout, Duration::from_secs(3));
        assert_eq!(options.keepalive_interval, None);
    }

    #[test]
    fn test_zero_keepalive_is_rejected() {
        let result = SessionBuilder::new()
            .token("abc")
            .keepalive_interval(Some(Duration::ZERO))
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));

        let config = SessionBuilder::new()
            .token("abc")
            .keepalive_interval(Some(Duration::from_millis(1)))
            .into_config()
            .expect("config");
        assert_eq!(config.options().keepalive_interval, Some(Duration::from_millis(1)));
    }
}
