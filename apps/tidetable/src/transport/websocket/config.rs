use url::Url;

use crate::model::DatasetId;
use crate::transport::TransportError;

/// Where a dataset view's transport connects.
///
/// The URL takes its scheme and host from the page origin (`wss` iff the
/// origin is `https`) and keeps the path exactly as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    origin: Url,
    path: String,
}

impl WebSocketConfig {
    pub fn new(origin: Url, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { origin, path }
    }

    pub fn dataset(origin: Url, dataset: DatasetId) -> Self {
        Self::new(origin, format!("/ws/datasets/{dataset}"))
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Build the full WebSocket URL.
    pub fn build_url(&self) -> Result<Url, TransportError> {
        let scheme = match self.origin.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported origin scheme `{other}`"
                )));
            }
        };
        let host = self
            .origin
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("origin has no host".into()))?;
        let authority = match self.origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Url::parse(&format!("{scheme}://{authority}{}", self.path))
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))
    }
}
