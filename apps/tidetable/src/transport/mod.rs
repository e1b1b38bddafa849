//! Persistent push connection for one dataset view.
//!
//! [`ConnectionManager::open`] spawns a supervisor task that connects,
//! forwards inbound payloads as [`ConnectionEvent::Message`], and reconnects
//! with exponential backoff after any closure. Errors are closures; they are
//! never delivered separately.

pub mod backoff;
pub mod manager;
#[cfg(test)]
pub(crate) mod mock;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use backoff::{Backoff, BackoffPolicy};
pub use manager::{ConnectionHandle, ConnectionManager};
pub use websocket::{WebSocketConfig, WebSocketConnector};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid transport url: {0}")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A transport opened. `resumed` is false only when the very first
    /// attempt succeeds; otherwise the consumer must refetch whatever it
    /// missed, including changes made before an initial refusal.
    Connected { attempt: u64, resumed: bool },
    /// One inbound payload, in arrival order.
    Message(Vec<u8>),
    /// The transport closed or failed to open; the next attempt starts
    /// after `retry_in`.
    Disconnected { retry_in: Duration, retry_count: u32 },
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameSource>, TransportError>;
}

/// Inbound half of an open transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next payload; `None` once the peer closed.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Close from our side.
    async fn close(&mut self);
}
