//! Client configuration: service endpoints, size limits, blob cache and retries.
//!
//! Every section has defaults suitable for `bsky.social`; `ATP_*` environment
//! variables override them through [`Config::from_env`].
//!
//! ```rust
//! use nanoatp::config::{Config, HttpConfig, RetryConfig};
//!
//! let config = Config::builder()
//!     .http(HttpConfig::builder().service_url("http://localhost:2583").build())
//!     .retry(RetryConfig::builder().max_attempts(1).build())
//!     .build();
//!
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{AtpError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default entryway for Bluesky accounts.
pub const DEFAULT_SERVICE: &str = "https://bsky.social";

/// Default link card extraction service.
pub const DEFAULT_CARD_SERVICE: &str = "https://cardyb.bsky.app";

/// Main configuration structure for the client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP client configuration
    pub http: HttpConfig,
    /// Size limits for uploads and downloads
    pub security: SecurityConfig,
    /// Blob cache configuration
    pub cache: CacheConfig,
    /// Retry configuration
    pub retry: RetryConfig,
}

/// HTTP client configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Service the XRPC calls go to (default: "https://bsky.social")
    pub service_url: String,
    /// Link card extraction service (default: "https://cardyb.bsky.app")
    pub card_service_url: String,
    /// Request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,
    /// Connection timeout in seconds (default: 10)
    pub connect_timeout_secs: u64,
    /// User agent string for requests
    pub user_agent: String,
}

/// Size limits applied before data crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Maximum blob size accepted for upload in bytes (default: 50MB)
    pub max_upload_size: u64,
    /// Maximum size of a fetched remote resource in bytes (default: 20MB)
    pub max_download_size: u64,
}

/// Blob cache configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Reuse blob references for byte-identical uploads (default: true)
    pub enable_blob_cache: bool,
    /// Maximum number of cached blob references (default: 256)
    pub max_blob_entries: usize,
}

/// Retry configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per request (default: 3)
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds (default: 500)
    pub base_delay_ms: u64,
    /// Maximum delay between retries in seconds (default: 30)
    pub max_delay_secs: u64,
    /// Exponential backoff factor (default: 2.0)
    pub backoff_factor: f64,
    /// Whether to add jitter to retry delays (default: true)
    pub enable_jitter: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE.to_string(),
            card_service_url: DEFAULT_CARD_SERVICE.to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: format!("nanoatp/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 50 * 1024 * 1024,   // 50MB
            max_download_size: 20 * 1024 * 1024, // 20MB
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_blob_cache: true,
            max_blob_entries: 256,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_secs: 30,
            backoff_factor: 2.0,
            enable_jitter: true,
        }
    }
}

impl Config {
    /// Creates a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Loads the defaults overridden by `ATP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("ATP_SERVICE") {
            config.http.service_url = url;
        }
        if let Ok(url) = std::env::var("ATP_CARD_SERVICE") {
            config.http.card_service_url = url;
        }
        if let Some(secs) = parse_env("ATP_REQUEST_TIMEOUT")? {
            config.http.request_timeout_secs = secs;
        }
        if let Some(bytes) = parse_env("ATP_MAX_UPLOAD_SIZE")? {
            config.security.max_upload_size = bytes;
        }
        if let Some(bytes) = parse_env("ATP_MAX_DOWNLOAD_SIZE")? {
            config.security.max_download_size = bytes;
        }
        if let Some(attempts) = parse_env("ATP_MAX_RETRIES")? {
            config.retry.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for consistency and constraints.
    pub fn validate(&self) -> Result<()> {
        if self.http.service_url.is_empty() {
            return Err(AtpError::config_error("service_url cannot be empty"));
        }

        url::Url::parse(&self.http.service_url)?;
        url::Url::parse(&self.http.card_service_url)?;

        if self.http.request_timeout_secs == 0 {
            return Err(AtpError::config_error(
                "request_timeout_secs must be greater than 0",
            ));
        }

        if self.http.connect_timeout_secs == 0 {
            return Err(AtpError::config_error(
                "connect_timeout_secs must be greater than 0",
            ));
        }

        if self.security.max_upload_size == 0 {
            return Err(AtpError::config_error(
                "max_upload_size must be greater than 0",
            ));
        }

        if self.security.max_download_size == 0 {
            return Err(AtpError::config_error(
                "max_download_size must be greater than 0",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AtpError::config_error(
                "max_attempts must be greater than 0",
            ));
        }

        if self.retry.backoff_factor < 1.0 {
            return Err(AtpError::config_error("backoff_factor must be >= 1.0"));
        }

        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_secs(self.retry.max_delay_secs)
    }

    /// Whole-request timeout for the HTTP client.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect_timeout_secs)
    }
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AtpError::config_error(format!("Invalid {name} value: {value}"))),
        Err(_) => Ok(None),
    }
}

/// Login credentials: a handle, DID or email plus an (app) password.
#[derive(Clone, Default)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
}

impl Credentials {
    /// Creates credentials from an identifier and password.
    pub fn new(identifier: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            password: password.into(),
        }
    }

    /// Reads `ATP_IDENTIFIER` and `ATP_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        let identifier = std::env::var("ATP_IDENTIFIER")
            .map_err(|_| AtpError::config_error("ATP_IDENTIFIER environment variable not set"))?;
        let password = std::env::var("ATP_PASSWORD")
            .map_err(|_| AtpError::config_error("ATP_PASSWORD environment variable not set"))?;
        Ok(Self::new(identifier, password))
    }

    /// Fills empty fields from the environment, leaving explicit values alone.
    pub fn or_env(self) -> Self {
        let identifier = if self.identifier.is_empty() {
            std::env::var("ATP_IDENTIFIER").unwrap_or_default()
        } else {
            self.identifier
        };
        let password = if self.password.is_empty() {
            std::env::var("ATP_PASSWORD").unwrap_or_default()
        } else {
            self.password
        };
        Self {
            identifier,
            password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Builder for [`Config`]; unset sections keep their defaults.
#[derive(Debug, Default)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn http(mut self, http: HttpConfig) -> Self {
        self.0.http = http;
        self
    }

    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.0.security = security;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.0.cache = cache;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.0.retry = retry;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

impl HttpConfig {
    pub fn builder() -> HttpConfigBuilder {
        HttpConfigBuilder(Self::default())
    }
}

impl SecurityConfig {
    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder(Self::default())
    }
}

impl RetryConfig {
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder(Self::default())
    }
}

/// Builder for [`HttpConfig`], starting from the defaults.
#[derive(Debug)]
pub struct HttpConfigBuilder(HttpConfig);

impl HttpConfigBuilder {
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.0.service_url = url.into();
        self
    }

    pub fn card_service_url(mut self, url: impl Into<String>) -> Self {
        self.0.card_service_url = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.0.request_timeout_secs = secs;
        self
    }

    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.0.connect_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.0.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> HttpConfig {
        self.0
    }
}

/// Builder for [`SecurityConfig`], starting from the defaults.
#[derive(Debug)]
pub struct SecurityConfigBuilder(SecurityConfig);

impl SecurityConfigBuilder {
    pub fn max_upload_size(mut self, bytes: u64) -> Self {
        self.0.max_upload_size = bytes;
        self
    }

    pub fn max_download_size(mut self, bytes: u64) -> Self {
        self.0.max_download_size = bytes;
        self
    }

    pub fn build(self) -> SecurityConfig {
        self.0
    }
}

/// Builder for [`RetryConfig`], starting from the defaults.
#[derive(Debug)]
pub struct RetryConfigBuilder(RetryConfig);

impl RetryConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.0.max_attempts = attempts;
        self
    }

    pub fn base_delay_ms(mut self, millis: u64) -> Self {
        self.0.base_delay_ms = millis;
        self
    }

    pub fn max_delay_secs(mut self, secs: u64) -> Self {
        self.0.max_delay_secs = secs;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.0.backoff_factor = factor;
        self
    }

    pub fn enable_jitter(mut self, enabled: bool) -> Self {
        self.0.enable_jitter = enabled;
        self
    }

    pub fn build(self) -> RetryConfig {
        self.0
    }
}
