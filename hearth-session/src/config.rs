//! Session configuration.

use crate::compression::{DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_MAX_DECOMPRESSED_SIZE};
use crate::error::{SessionError, SessionResult};
use crate::expiry::{DEFAULT_IDLE_TIMEOUT, ExpiryPolicy};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default cookie name for cookie-resident sessions.
pub const DEFAULT_COOKIE_NAME: &str = "__Host-session";

/// Default cookie name for key-value sessions.
pub const DEFAULT_KV_COOKIE_NAME: &str = "__Host-session-id";

/// Session cookie attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Cookie name
    pub name: String,
    /// Cookie path
    pub path: String,
    /// Omit the `Secure` attribute (local development over plain HTTP)
    pub insecure: bool,
    /// Emit `Max-Age` so the cookie survives a browser restart
    pub persist: bool,
}

impl CookieOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: "/".to_string(),
            insecure: false,
            persist: false,
        }
    }

    /// Set the cookie path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Drop the `Secure` attribute.
    pub fn insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    /// Emit a `Max-Age` matching the session expiry.
    pub fn persistent(mut self) -> Self {
        self.persist = true;
        self
    }

    fn validate(&self) -> SessionResult<()> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .bytes()
                .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b));
        if !valid_name {
            return Err(SessionError::Config(format!(
                "invalid cookie name: {:?}",
                self.name
            )));
        }
        if !self.path.starts_with('/') || self.path.contains(';') {
            return Err(SessionError::Config(format!(
                "invalid cookie path: {:?}",
                self.path
            )));
        }
        Ok(())
    }
}

/// Payload compression settings for cookie sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionOptions {
    /// Never compress
    pub disabled: bool,
    /// Compress framed payloads strictly larger than this many bytes
    pub threshold: usize,
    /// Refuse to decompress beyond this many bytes
    pub max_decompressed_size: usize,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            disabled: false,
            threshold: DEFAULT_COMPRESSION_THRESHOLD,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

impl CompressionOptions {
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Whether a framed payload of `len` bytes should be compressed.
    pub fn should_compress(&self, len: usize) -> bool {
        !self.disabled && len > self.threshold
    }
}

/// Session manager configuration.
///
/// # Examples
///
/// ```
/// use hearth_session::{CookieOptions, SessionConfig};
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_max_lifetime(Duration::from_secs(7 * 86400))
///     .with_idle_timeout(Duration::from_secs(3600))
///     .with_cookie(CookieOptions::new("app-session").persistent());
/// assert!(config.expiry_policy().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Absolute lifetime measured from session creation
    pub max_lifetime: Option<Duration>,
    /// Lifetime measured from the last persist
    pub idle_timeout: Option<Duration>,
    /// Cookie attributes; `None` uses the store's default cookie name
    pub cookie: Option<CookieOptions>,
    pub compression: CompressionOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_lifetime: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            cookie: None,
            compression: CompressionOptions::default(),
        }
    }
}

impl SessionConfig {
    /// Set the absolute session lifetime.
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Disable the idle timeout. A max lifetime must then be set.
    pub fn without_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    pub fn with_cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = Some(cookie);
        self
    }

    pub fn with_compression(mut self, compression: CompressionOptions) -> Self {
        self.compression = compression;
        self
    }

    /// Validate the expiry settings.
    pub fn expiry_policy(&self) -> SessionResult<ExpiryPolicy> {
        ExpiryPolicy::new(self.max_lifetime, self.idle_timeout)
    }

    /// Cookie options, falling back to `default_name`.
    pub fn cookie_options(&self, default_name: &str) -> SessionResult<CookieOptions> {
        let mut options = self
            .cookie
            .clone()
            .unwrap_or_else(|| CookieOptions::new(default_name));
        if options.name.is_empty() {
            options.name = default_name.to_string();
        }
        options.validate()?;
        Ok(options)
    }

    /// Load settings from a TOML document.
    pub fn from_toml_str(content: &str) -> SessionResult<Self> {
        SessionSettings::from_toml_str(content)?.try_into()
    }

    /// Load settings from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> SessionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Deserializable session settings, with durations in seconds.
///
/// ```toml
/// max_lifetime_secs = 604800
/// idle_timeout_secs = 3600
///
/// [cookie]
/// name = "app-session"
/// persist = true
///
/// [compression]
/// threshold = 1024
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_lifetime_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub cookie: Option<CookieSettings>,
    pub compression: CompressionSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    pub name: Option<String>,
    pub path: Option<String>,
    pub insecure: bool,
    pub persist: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub disabled: bool,
    pub threshold: Option<usize>,
    pub max_decompressed_size: Option<usize>,
}

impl SessionSettings {
    pub fn from_toml_str(content: &str) -> SessionResult<Self> {
        toml::from_str(content).map_err(|e| SessionError::Config(e.to_string()))
    }
}

impl TryFrom<SessionSettings> for SessionConfig {
    type Error = SessionError;

    fn try_from(settings: SessionSettings) -> SessionResult<Self> {
        let max_lifetime = settings.max_lifetime_secs.map(Duration::from_secs);
        let idle_timeout = match (settings.max_lifetime_secs, settings.idle_timeout_secs) {
            (None, None) => Some(DEFAULT_IDLE_TIMEOUT),
            (_, idle) => idle.map(Duration::from_secs),
        };

        // An empty name is filled in with the store's default later.
        let cookie = settings.cookie.map(|c| CookieOptions {
            name: c.name.unwrap_or_default(),
            path: c.path.unwrap_or_else(|| "/".to_string()),
            insecure: c.insecure,
            persist: c.persist,
        });

        let defaults = CompressionOptions::default();
        let config = Self {
            max_lifetime,
            idle_timeout,
            cookie,
            compression: CompressionOptions {
                disabled: settings.compression.disabled,
                threshold: settings.compression.threshold.unwrap_or(defaults.threshold),
                max_decompressed_size: settings
                    .compression
                    .max_decompressed_size
                    .unwrap_or(defaults.max_decompressed_size),
            },
        };

        config.expiry_policy()?;
        config.cookie_options(DEFAULT_COOKIE_NAME)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
        assert!(config.expiry_policy().is_ok());
        let cookie = config.cookie_options(DEFAULT_COOKIE_NAME).unwrap();
        assert_eq!(cookie.name, "__Host-session");
        assert_eq!(cookie.path, "/");
        assert!(!cookie.insecure);
        assert!(!cookie.persist);
    }

    #[test]
    fn test_no_expiry_is_rejected() {
        let config = SessionConfig::default().without_idle_timeout();
        assert!(matches!(
            config.expiry_policy(),
            Err(SessionError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_cookie_name() {
        let config = SessionConfig::default().with_cookie(CookieOptions::new("bad name;"));
        assert!(config.cookie_options(DEFAULT_COOKIE_NAME).is_err());
    }

    #[test]
    fn test_compression_threshold() {
        let options = CompressionOptions::default();
        assert!(!options.should_compress(512));
        assert!(options.should_compress(513));
        assert!(!CompressionOptions::disabled().should_compress(10_000));
    }

    #[test]
    fn test_from_toml() {
        let config = SessionConfig::from_toml_str(
            r#"
            max_lifetime_secs = 600
            idle_timeout_secs = 60

            [cookie]
            name = "app"
            path = "/app"
            insecure = true
            persist = true

            [compression]
            threshold = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.max_lifetime, Some(Duration::from_secs(600)));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        let cookie = config.cookie.unwrap();
        assert_eq!(cookie.name, "app");
        assert_eq!(cookie.path, "/app");
        assert!(cookie.insecure && cookie.persist);
        assert_eq!(config.compression.threshold, 1024);
    }

    #[test]
    fn test_from_empty_toml_uses_defaults() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
        assert!(config.cookie.is_none());
    }

    #[test]
    fn test_from_toml_cookie_without_name() {
        let config = SessionConfig::from_toml_str("[cookie]\ninsecure = true").unwrap();
        let cookie = config.cookie_options(DEFAULT_KV_COOKIE_NAME).unwrap();
        assert_eq!(cookie.name, "__Host-session-id");
        assert!(cookie.insecure);
    }

    #[test]
    fn test_from_toml_max_lifetime_only() {
        let config = SessionConfig::from_toml_str("max_lifetime_secs = 30").unwrap();
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.max_lifetime, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_toml_zero_durations() {
        let result = SessionConfig::from_toml_str("max_lifetime_secs = 0\nidle_timeout_secs = 0");
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[test]
    fn test_from_toml_syntax_error() {
        assert!(SessionConfig::from_toml_str("max_lifetime_secs = ").is_err());
    }
}
