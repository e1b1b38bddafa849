//! Scripted transports for exercising the supervisor without sockets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use super::{Connector, FrameSource, TransportError};

/// What the next connection attempt does.
pub(crate) enum Script {
    /// Fail to open.
    Refuse,
    /// Open, deliver these payloads, then close from the peer side.
    Serve(Vec<Vec<u8>>),
    /// Open and relay whatever the test feeds in; the peer closes when the
    /// feeding sender is dropped.
    Hold(mpsc::UnboundedReceiver<Vec<u8>>),
}

impl Script {
    pub(crate) fn held() -> (mpsc::UnboundedSender<Vec<u8>>, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Script::Hold(rx))
    }
}

/// Plays scripts in order; refuses every attempt once they run out.
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    attempts: Mutex<Vec<(Instant, Url)>>,
    closed_by_client: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            attempts: Mutex::new(Vec::new()),
            closed_by_client: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(at, _)| *at).collect()
    }

    pub(crate) fn attempt_urls(&self) -> Vec<Url> {
        self.attempts.lock().iter().map(|(_, url)| url.clone()).collect()
    }

    pub(crate) fn closed_by_client(&self) -> usize {
        self.closed_by_client.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn FrameSource>, TransportError> {
        self.attempts.lock().push((Instant::now(), url.clone()));
        let script = self.scripts.lock().pop_front().unwrap_or(Script::Refuse);
        let feed = match script {
            Script::Refuse => return Err(TransportError::Closed),
            Script::Serve(payloads) => Feed::Queued(payloads.into()),
            Script::Hold(rx) => Feed::Live(rx),
        };
        Ok(Box::new(ScriptedSource {
            feed,
            closed_by_client: Arc::clone(&self.closed_by_client),
        }))
    }
}

enum Feed {
    Queued(VecDeque<Vec<u8>>),
    Live(mpsc::UnboundedReceiver<Vec<u8>>),
}

struct ScriptedSource {
    feed: Feed,
    closed_by_client: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        match &mut self.feed {
            Feed::Queued(queue) => queue.pop_front().map(Ok),
            Feed::Live(rx) => rx.recv().await.map(Ok),
        }
    }

    async fn close(&mut self) {
        self.closed_by_client.fetch_add(1, Ordering::SeqCst);
    }
}
