use std::env;
use std::time::Duration;

use thiserror::Error;
use tidetable_sdk::HttpDatasetApi;
use url::Url;

use crate::transport::BackoffPolicy;

pub const API_URL_ENV: &str = "TIDETABLE_API_URL";
pub const PAGE_ORIGIN_ENV: &str = "TIDETABLE_PAGE_ORIGIN";
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid url ({value}): {source}")]
    InvalidUrl {
        var: &'static str,
        value: String,
        source: url::ParseError,
    },
    #[error("{var} must be an http(s) url, got `{value}`")]
    UnsupportedScheme { var: &'static str, value: String },
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base origin of the dataset API.
    pub api_base: Url,
    /// Origin the push transport URL is derived from.
    pub page_origin: Url,
    pub backoff: BackoffPolicy,
}

impl ClientConfig {
    /// Read `.env` if present, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(target = "tidetable::config", path = %path.display(), "loaded .env");
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base = match non_blank(API_URL_ENV) {
            Some(raw) => parse_origin(API_URL_ENV, &raw)?,
            None => parse_origin(API_URL_ENV, DEFAULT_API_URL)?,
        };
        let page_origin = match non_blank(PAGE_ORIGIN_ENV) {
            Some(raw) => parse_origin(PAGE_ORIGIN_ENV, &raw)?,
            None => api_base.clone(),
        };
        Ok(Self {
            api_base,
            page_origin,
            backoff: BackoffPolicy::default(),
        })
    }

    /// API and push transport served from the same origin.
    pub fn for_origin(origin: Url) -> Self {
        Self {
            page_origin: origin.clone(),
            api_base: origin,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = BackoffPolicy::new(initial, max);
        self
    }

    /// HTTP client for the dataset API at `api_base`.
    pub fn api(&self) -> HttpDatasetApi {
        HttpDatasetApi::new(self.api_base.clone())
    }
}

fn non_blank(var: &'static str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse an http(s) origin, inferring a scheme when none is given: `http`
/// for loopback hosts, `https` otherwise.
fn parse_origin(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{}://{raw}", infer_scheme(raw))
    };
    let url = Url::parse(&candidate).map_err(|source| ConfigError::InvalidUrl {
        var,
        value: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme {
            var,
            value: raw.to_string(),
        }),
    }
}

fn infer_scheme(raw: &str) -> &'static str {
    let host = raw.split(['/', '?']).next().unwrap_or(raw);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    let loopback = matches!(host, "localhost" | "[::1]" | "::1")
        || host.starts_with("127.")
        || host.ends_with(".localhost");
    if loopback { "http" } else { "https" }
}
