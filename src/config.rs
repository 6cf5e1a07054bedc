//! Configuration parsing and validation for trickle.

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::relay::HeaderCopy;

/// Root configuration structure.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream provider the relay forwards to.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API (e.g., "https://api.openai.com/v1")
    pub url: String,
    pub api_key: Option<ApiKey>,
    /// Whole-request timeout, including the time spent streaming.
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

/// Relay behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(rename = "stream_speed_ms", default)]
    pub stream_speed: StreamSpeed,
    #[serde(default)]
    pub header_copy: HeaderCopy,
    /// Decode full responses for usage and error envelopes.
    #[serde(default = "default_true")]
    pub consume_quota: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stream_speed: StreamSpeed::default(),
            header_copy: HeaderCopy::default(),
            consume_quota: true,
        }
    }
}

/// Default per-code-point pacing delay.
pub const DEFAULT_STREAM_SPEED_MS: u64 = 15;

/// Delay between paced sub-events, in milliseconds.
///
/// Read leniently: integers and numeric strings are accepted, anything else
/// falls back to [`DEFAULT_STREAM_SPEED_MS`], and negative values mean no
/// delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpeed {
    millis: u64,
}

impl StreamSpeed {
    pub fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    /// Interpret a textual setting such as the `STREAM_SPEED` variable.
    pub fn from_setting(setting: Option<&str>) -> Self {
        match setting.map(str::trim).map(str::parse::<i64>) {
            Some(Ok(ms)) => Self::from_signed(ms),
            _ => Self::default(),
        }
    }

    fn from_signed(ms: i64) -> Self {
        Self {
            millis: u64::try_from(ms).unwrap_or(0),
        }
    }

    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.millis)
    }
}

impl Default for StreamSpeed {
    fn default() -> Self {
        Self {
            millis: DEFAULT_STREAM_SPEED_MS,
        }
    }
}

impl<'de> Deserialize<'de> for StreamSpeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Setting {
            Millis(i64),
            Text(String),
            Other(serde::de::IgnoredAny),
        }

        Ok(match Setting::deserialize(deserializer)? {
            Setting::Millis(ms) => Self::from_signed(ms),
            Setting::Text(text) => Self::from_setting(Some(&text)),
            Setting::Other(_) => Self::default(),
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level for trickle's own targets, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Cannot expand '{var}' in {field}: {message}")]
    EnvVar {
        var: String,
        field: &'static str,
        message: String,
    },
}

/// `[upstream]` as written in the file, before `${VAR}` expansion.
#[derive(Deserialize)]
struct RawUpstreamConfig {
    url: String,
    api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    upstream: RawUpstreamConfig,
    #[serde(default)]
    relay: RelayConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Expand every `${VAR}` in `input` through `lookup`.
///
/// A `$` not followed by `{` is kept as-is. An unclosed reference, an empty
/// name or an unset variable is an error naming `field`.
fn expand_env_vars_with<F>(input: &str, field: &'static str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find('}') else {
            return Err(ConfigError::EnvVar {
                var: after.to_string(),
                field,
                message: "unclosed '${'".to_string(),
            });
        };
        let var = &after[..end];
        if var.is_empty() {
            return Err(ConfigError::EnvVar {
                var: String::new(),
                field,
                message: "empty variable name".to_string(),
            });
        }

        let value = lookup(var).ok_or_else(|| ConfigError::EnvVar {
            var: var.to_string(),
            field,
            message: "environment variable is not set".to_string(),
        })?;
        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` from the
    /// process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse_str_with(content, |name| std::env::var(name).ok())
    }

    /// Parse configuration, resolving `${VAR}` references through `lookup`.
    pub fn parse_str_with<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content)?;

        let url = expand_env_vars_with(&raw.upstream.url, "upstream.url", &lookup)?;
        let api_key = raw
            .upstream
            .api_key
            .map(|key| expand_env_vars_with(&key, "upstream.api_key", &lookup))
            .transpose()?
            .filter(|key| !key.is_empty())
            .map(ApiKey::from);

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                url,
                api_key,
                timeout_secs: raw.upstream.timeout_secs,
            },
            relay: raw.relay,
            logging: raw.logging,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.upstream.url;
        if url.is_empty() {
            return Err(ConfigError::Validation("upstream.url is empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "upstream.url must be an http(s) URL, got '{}'",
                url
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "upstream.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.upstream.api_key.is_none() {
            tracing::warn!("No upstream api_key configured, requests are forwarded unauthenticated");
        }
        Ok(())
    }

    /// Full upstream URL for an API path such as `chat/completions`.
    pub fn upstream_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.upstream.url.trim_end_matches('/'), path)
    }
}
