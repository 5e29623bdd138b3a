//! Client configuration.
//!
//! A [`ClientConfig`] is either built in code or loaded from environment
//! variables with [`ClientConfig::from_env`].

use std::fmt;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Production REST base URL.
pub const API_BASE_URL: &str = "https://api.tradier.com/v1";
/// Sandbox (paper trading) REST base URL.
pub const SANDBOX_API_BASE_URL: &str = "https://sandbox.tradier.com/v1";
/// WebSocket market events endpoint.
pub const WEBSOCKET_EVENTS_URL: &str = "wss://ws.tradier.com/v1/markets/events";

/// Environment variable holding the bearer access token.
pub const ACCESS_TOKEN_VAR: &str = "TRADIER_ACCESS_TOKEN";
/// Environment variable selecting `production` or `sandbox`.
pub const ENVIRONMENT_VAR: &str = "TRADIER_ENVIRONMENT";
/// Environment variable overriding the REST base URL.
pub const API_BASE_URL_VAR: &str = "TRADIER_API_BASE_URL";
/// Environment variable overriding the WebSocket events endpoint.
pub const WEBSOCKET_URL_VAR: &str = "TRADIER_WEBSOCKET_URL";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Brokerage environment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl Environment {
    /// Parses `production`/`live` or `sandbox`/`paper`, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "live" => Some(Self::Production),
            "sandbox" | "paper" => Some(Self::Sandbox),
            _ => None,
        }
    }

    pub fn api_base_url(&self) -> &'static str {
        match self {
            Self::Production => API_BASE_URL,
            Self::Sandbox => SANDBOX_API_BASE_URL,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// Settings for the HTTP transport and the streaming client.
#[derive(Clone)]
pub struct ClientConfig {
    pub access_token: SecretString,
    pub environment: Environment,
    /// Takes precedence over `environment` when set.
    pub base_url_override: Option<String>,
    pub websocket_url: String,
    pub connect_timeout: Duration,
    /// Per-attempt timeout for request/response calls. Not applied to the
    /// event feed.
    pub attempt_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl ClientConfig {
    pub fn new(access_token: SecretString) -> Self {
        Self {
            access_token,
            environment: Environment::default(),
            base_url_override: None,
            websocket_url: WEBSOCKET_EVENTS_URL.to_string(),
            connect_timeout: ClientDefaults::CONNECT_TIMEOUT,
            attempt_timeout: ClientDefaults::ATTEMPT_TIMEOUT,
            retry_policy: RetryPolicy::session_request(),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into().trim().to_string());
        self
    }

    pub fn with_websocket_url(mut self, websocket_url: impl Into<String>) -> Self {
        self.websocket_url = websocket_url.into().trim().to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let access_token =
            read(ACCESS_TOKEN_VAR).ok_or(ConfigError::MissingVar(ACCESS_TOKEN_VAR))?;
        let mut config = Self::new(SecretString::new(access_token.trim().to_string()));

        if let Some(value) = read(ENVIRONMENT_VAR) {
            let environment = Environment::parse(&value).ok_or(ConfigError::InvalidVar {
                name: ENVIRONMENT_VAR,
                value,
            })?;
            config = config.with_environment(environment);
        }
        if let Some(base_url) = read(API_BASE_URL_VAR) {
            config = config.with_base_url(base_url);
        }
        if let Some(websocket_url) = read(WEBSOCKET_URL_VAR) {
            config = config.with_websocket_url(websocket_url);
        }

        Ok(config)
    }

    /// REST base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.environment.api_base_url())
            .trim_end_matches('/')
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("access_token", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url())
            .field("websocket_url", &self.websocket_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}
