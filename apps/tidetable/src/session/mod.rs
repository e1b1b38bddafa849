//! One open dataset: its store, its push connection, and its dispatcher.
//!
//! [`DatasetView::open`] loads metadata, opens the connection, and loads the
//! rows. A pump task then applies pushed events in arrival order. After every
//! reconnect it resynchronizes: columns the server gained are added, and the
//! rows for the current query are refetched. Closing the view stops the pump,
//! closes the connection, and freezes the store.

use std::sync::Arc;

use thiserror::Error;
use tidetable_sdk::{ApiError, DatasetApi};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::dispatch::{EditDispatcher, RowsRefetch};
use crate::model::{DatasetId, DatasetState};
use crate::notify::Notifier;
use crate::protocol::{self, ChangeEvent};
use crate::store::DatasetStore;
use crate::telemetry::logging::hexdump;
use crate::transport::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, Connector,
    TransportError, WebSocketConfig,
};

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("dataset request failed: {0}")]
    Api(#[from] ApiError),
    #[error("dataset transport unavailable: {0}")]
    Transport(#[from] TransportError),
}

pub struct DatasetView {
    dataset: DatasetId,
    name: String,
    store: Arc<DatasetStore>,
    dispatcher: EditDispatcher,
    connection: Option<ConnectionHandle>,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl DatasetView {
    pub async fn open(
        config: &ClientConfig,
        dataset: DatasetId,
        api: Arc<dyn DatasetApi>,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ViewError> {
        let meta = api.dataset(dataset).await?;
        let store = Arc::new(DatasetStore::new(dataset, meta.schema));
        let refetch = Arc::new(RowsRefetch::new(Arc::clone(&store), Arc::clone(&api)));

        let manager = ConnectionManager::new(config.page_origin.clone(), config.backoff, connector);
        let path = WebSocketConfig::dataset(config.page_origin.clone(), dataset);
        let (connection, events) = manager.open(path.path())?;

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(
            Pump {
                store: Arc::clone(&store),
                api: Arc::clone(&api),
                refetch: Arc::clone(&refetch),
                cancel: cancel.clone(),
            }
            .run(events),
        );

        let mut view = Self {
            dataset,
            name: meta.name,
            dispatcher: EditDispatcher::new(Arc::clone(&store), api, notifier, Arc::clone(&refetch)),
            store,
            connection: Some(connection),
            cancel,
            pump: Some(pump),
        };

        if let Err(err) = refetch.run().await {
            view.shutdown().await;
            return Err(err.into());
        }
        info!(
            target = "tidetable::session",
            dataset,
            name = %view.name,
            rows = view.store.snapshot().len(),
            "dataset view opened"
        );
        Ok(view)
    }

    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Arc<DatasetState> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<DatasetState>> {
        self.store.subscribe()
    }

    pub fn dispatcher(&self) -> &EditDispatcher {
        &self.dispatcher
    }

    pub fn connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(ConnectionHandle::connected)
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        match &self.connection {
            Some(connection) => connection.watch_state(),
            None => watch::channel(ConnectionState::Disconnected).1,
        }
    }

    pub fn saving(&self) -> watch::Receiver<bool> {
        self.dispatcher.saving()
    }

    /// Tear the view down. No event or response is applied afterwards.
    pub async fn close(mut self) {
        self.shutdown().await;
        debug!(target = "tidetable::session", dataset = self.dataset, "dataset view closed");
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.store.close();
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        if let Some(pump) = self.pump.take() {
            if let Err(err) = pump.await {
                warn!(
                    target = "tidetable::session",
                    dataset = self.dataset,
                    error = %err,
                    "event pump ended abnormally"
                );
            }
        }
    }
}

impl Drop for DatasetView {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.store.close();
    }
}

struct Pump {
    store: Arc<DatasetStore>,
    api: Arc<dyn DatasetApi>,
    refetch: Arc<RowsRefetch>,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        let dataset = self.store.dataset();
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                ConnectionEvent::Message(payload) => self.apply(&payload),
                ConnectionEvent::Connected { resumed: true, attempt } => {
                    debug!(
                        target = "tidetable::session",
                        dataset,
                        attempt,
                        "connection resumed; resynchronizing"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = self.resync() => {}
                    }
                }
                ConnectionEvent::Connected { .. } => {}
                ConnectionEvent::Disconnected { retry_in, .. } => {
                    debug!(
                        target = "tidetable::session",
                        dataset,
                        retry_in_ms = retry_in.as_millis() as u64,
                        "connection lost"
                    );
                }
            }
        }
    }

    fn apply(&self, payload: &[u8]) {
        match protocol::decode(payload) {
            Ok(event) => {
                self.store.apply(event);
            }
            Err(err) => {
                warn!(
                    target = "tidetable::session",
                    dataset = self.store.dataset(),
                    error = %err,
                    "dropping undecodable change event"
                );
                trace!(
                    target = "tidetable::session",
                    payload = %hexdump(payload),
                    "undecodable payload"
                );
            }
        }
    }

    async fn resync(&self) {
        let dataset = self.store.dataset();
        match self.api.dataset(dataset).await {
            Ok(meta) => {
                let known = self.store.snapshot();
                for key in meta.schema.keys().filter(|key| !known.schema().contains(key)) {
                    self.store.apply(ChangeEvent::column_add(key));
                }
            }
            Err(err) => {
                warn!(
                    target = "tidetable::session",
                    dataset,
                    error = %err,
                    "schema resync failed"
                );
            }
        }
        if let Err(err) = self.refetch.run().await {
            warn!(
                target = "tidetable::session",
                dataset,
                error = %err,
                "row resync failed"
            );
        }
    }
}
