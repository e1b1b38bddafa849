use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Backoff, BackoffPolicy, ConnectionEvent, ConnectionState, Connector, FrameSource,
    TransportError, WebSocketConfig,
};

/// Opens supervised connections relative to one page origin.
#[derive(Clone)]
pub struct ConnectionManager {
    origin: Url,
    policy: BackoffPolicy,
    connector: Arc<dyn Connector>,
}

impl ConnectionManager {
    pub fn new(origin: Url, policy: BackoffPolicy, connector: Arc<dyn Connector>) -> Self {
        Self {
            origin,
            policy,
            connector,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Start connecting to `path` and keep reconnecting until the handle is
    /// closed or dropped.
    ///
    /// Must be called inside a tokio runtime.
    pub fn open(
        &self,
        path: &str,
    ) -> Result<(ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>), TransportError> {
        let config = WebSocketConfig::new(self.origin.clone(), path);
        let url = config.build_url()?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            config,
            connector: Arc::clone(&self.connector),
            backoff: Backoff::new(self.policy),
            state: state_tx,
            events: events_tx,
            cancel: cancel.clone(),
        };
        debug!(target = "tidetable::transport", %url, "opening supervised connection");
        let task = tokio::spawn(supervisor.run());

        Ok((
            ConnectionHandle {
                url,
                state: state_rx,
                cancel,
                task: Some(task),
            },
            events_rx,
        ))
    }
}

/// Owner of one supervised connection.
///
/// Dropping the handle cancels the connection the same way
/// [`close`](Self::close) does, without waiting for the task.
pub struct ConnectionHandle {
    url: Url,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel any pending reconnect, close an open transport, and wait for
    /// the supervisor to finish. No reconnect follows.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(
                    target = "tidetable::transport",
                    error = %err,
                    "connection supervisor ended abnormally"
                );
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Served {
    /// The transport closed on its own; back off and retry.
    Closed,
    /// Teardown or the consumer went away; stop for good.
    Stopped,
}

struct Supervisor {
    config: WebSocketConfig,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self) {
        let mut attempt: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            attempt += 1;
            self.state.send_replace(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connect() => result,
            };

            match connected {
                Ok(source) => {
                    if let Served::Stopped = self.serve(source, attempt).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!(
                        target = "tidetable::transport",
                        path = self.config.path(),
                        attempt,
                        error = %err,
                        "connection attempt failed"
                    );
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            self.state.send_replace(ConnectionState::Disconnected);
            let retry_in = self.backoff.next_delay();
            let retry_count = self.backoff.retry_count();
            debug!(
                target = "tidetable::transport",
                path = self.config.path(),
                retry_in_ms = retry_in.as_millis() as u64,
                retry_count,
                "scheduling reconnect"
            );
            if !self.emit(ConnectionEvent::Disconnected {
                retry_in,
                retry_count,
            }) {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(retry_in) => {}
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
        debug!(
            target = "tidetable::transport",
            path = self.config.path(),
            "connection supervisor stopped"
        );
    }

    async fn connect(&self) -> Result<Box<dyn FrameSource>, TransportError> {
        let url = self.config.build_url()?;
        self.connector.connect(&url).await
    }

    async fn serve(&mut self, mut source: Box<dyn FrameSource>, attempt: u64) -> Served {
        if self.cancel.is_cancelled() {
            source.close().await;
            return Served::Stopped;
        }
        self.backoff.reset();
        self.state.send_replace(ConnectionState::Connected);
        // Any earlier attempt, served or refused, may have missed changes.
        let resumed = attempt > 1;
        info!(
            target = "tidetable::transport",
            path = self.config.path(),
            attempt,
            resumed,
            "connection established"
        );
        if !self.emit(ConnectionEvent::Connected { attempt, resumed }) {
            source.close().await;
            return Served::Stopped;
        }

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    source.close().await;
                    return Served::Stopped;
                }
                frame = source.recv() => frame,
            };
            match frame {
                Some(Ok(payload)) => {
                    if !self.emit(ConnectionEvent::Message(payload)) {
                        source.close().await;
                        return Served::Stopped;
                    }
                }
                Some(Err(err)) => {
                    debug!(
                        target = "tidetable::transport",
                        path = self.config.path(),
                        error = %err,
                        "transport error; treating as closure"
                    );
                    return Served::Closed;
                }
                None => {
                    debug!(
                        target = "tidetable::transport",
                        path = self.config.path(),
                        "transport closed by peer"
                    );
                    return Served::Closed;
                }
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) -> bool {
        if self.events.send(event).is_err() {
            debug!(
                target = "tidetable::transport",
                path = self.config.path(),
                "event consumer dropped; stopping"
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Script, ScriptedConnector};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::Instant;

    fn manager(connector: Arc<ScriptedConnector>) -> ConnectionManager {
        ConnectionManager::new(
            Url::parse("https://tables.example.com").unwrap(),
            BackoffPolicy::default(),
            connector,
        )
    }

    async fn next_disconnect(events: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Duration {
        loop {
            match events.recv().await.expect("event stream open") {
                ConnectionEvent::Disconnected { retry_in, .. } => return retry_in,
                _ => continue,
            }
        }
    }

    fn gaps(instants: &[Instant]) -> Vec<u128> {
        instants
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn consecutive_failures_back_off_exponentially() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let (handle, mut events) = manager(connector.clone())
            .open("/ws/datasets/3")
            .expect("open");
        assert_eq!(handle.url().as_str(), "wss://tables.example.com/ws/datasets/3");

        let mut delays = Vec::new();
        for _ in 0..6 {
            delays.push(next_disconnect(&mut events).await.as_millis());
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 15000, 15000]);

        let attempts = connector.attempt_times();
        assert_eq!(gaps(&attempts[..6]), vec![1000, 2000, 4000, 8000, 15000]);
        assert!(!handle.connected());
        handle.close().await;
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn success_resets_the_next_delay_and_counts_as_a_resume() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Script::Refuse,
            Script::Refuse,
            Script::Serve(vec![]),
            Script::Refuse,
        ]));
        let (handle, mut events) = manager(connector.clone()).open("/ws/datasets/3").unwrap();

        let mut seen = Vec::new();
        while seen.len() < 6 {
            seen.push(events.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(1000),
                    retry_count: 1
                },
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(2000),
                    retry_count: 2
                },
                ConnectionEvent::Connected {
                    attempt: 3,
                    resumed: true
                },
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(1000),
                    retry_count: 1
                },
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(2000),
                    retry_count: 2
                },
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(4000),
                    retry_count: 3
                },
            ]
        );
        handle.close().await;
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn forwards_messages_in_order_and_flags_resumes() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            Script::Serve(vec![b"one".to_vec(), b"two".to_vec()]),
            Script::Serve(vec![b"three".to_vec()]),
        ]));
        let (handle, mut events) = manager(connector).open("/ws/datasets/3").unwrap();

        let mut seen = Vec::new();
        while seen.len() < 7 {
            seen.push(events.recv().await.unwrap());
        }
        assert_eq!(
            seen,
            vec![
                ConnectionEvent::Connected {
                    attempt: 1,
                    resumed: false
                },
                ConnectionEvent::Message(b"one".to_vec()),
                ConnectionEvent::Message(b"two".to_vec()),
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(1000),
                    retry_count: 1
                },
                ConnectionEvent::Connected {
                    attempt: 2,
                    resumed: true
                },
                ConnectionEvent::Message(b"three".to_vec()),
                ConnectionEvent::Disconnected {
                    retry_in: Duration::from_millis(1000),
                    retry_count: 1
                },
            ]
        );
        handle.close().await;
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn close_cancels_a_pending_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(vec![Script::Refuse]));
        let (handle, mut events) = manager(connector.clone()).open("/ws/datasets/3").unwrap();

        next_disconnect(&mut events).await;
        handle.close().await;

        sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.attempt_times().len(), 1);
        assert!(events.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn close_shuts_an_open_transport_without_reconnecting() {
        let (feed, script) = Script::held();
        let connector = Arc::new(ScriptedConnector::new(vec![script]));
        let (handle, mut events) = manager(connector.clone()).open("/ws/datasets/3").unwrap();
        let mut state = handle.watch_state();

        assert!(matches!(
            events.recv().await,
            Some(ConnectionEvent::Connected { .. })
        ));
        state
            .wait_for(|state| state.is_connected())
            .await
            .expect("state channel open");
        feed.send(b"live".to_vec()).unwrap();
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent::Message(b"live".to_vec()))
        );

        handle.close().await;
        assert_eq!(connector.closed_by_client(), 1);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_times().len(), 1);
        assert!(events.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn dropping_the_event_receiver_stops_the_supervisor() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let (handle, events) = manager(connector.clone()).open("/ws/datasets/3").unwrap();
        drop(events);

        let mut state = handle.watch_state();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempt_times().len(), 1);
        assert_eq!(*state.borrow_and_update(), ConnectionState::Disconnected);
        handle.close().await;
    }

    #[test]
    fn open_rejects_unusable_origins() {
        let manager = ConnectionManager::new(
            Url::parse("mailto:ops@example.com").unwrap(),
            BackoffPolicy::default(),
            Arc::new(ScriptedConnector::new(Vec::new())),
        );
        assert!(matches!(
            manager.open("/ws/datasets/1"),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
