//! Test doubles shared by the dispatcher and view tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidetable_sdk::{
    ApiError, CellPatch, CreateDataset, DatasetApi, DatasetId, DatasetMeta, DatasetSummary,
    ExportFormat, ExportPayload, InMemoryDatasetApi, RowFields, RowId, RowsPage, Schema,
    UpsertResult,
};
use tokio::sync::oneshot;

/// A held request: the call has reached the API and waits for `release`.
pub(crate) struct Gate {
    entered: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl Gate {
    pub(crate) async fn entered(&mut self) {
        if let Some(entered) = self.entered.take() {
            let _ = entered.await;
        }
    }

    /// Whether the held call has already reached the API.
    pub(crate) fn has_entered(&mut self) -> bool {
        match self.entered.as_mut() {
            Some(entered) => {
                if entered.try_recv().is_ok() {
                    self.entered = None;
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    pub(crate) fn release(self) {
        let _ = self.release.send(());
    }
}

type Held = (oneshot::Sender<()>, oneshot::Receiver<()>);

/// Wraps [`InMemoryDatasetApi`] so individual calls can be paused.
pub(crate) struct GatedApi {
    inner: Arc<InMemoryDatasetApi>,
    held: Mutex<HashMap<&'static str, VecDeque<Held>>>,
}

impl GatedApi {
    pub(crate) fn new(inner: Arc<InMemoryDatasetApi>) -> Self {
        Self {
            inner,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Hold the next not-yet-held call to `operation`.
    pub(crate) fn hold(&self, operation: &'static str) -> Gate {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.held
            .lock()
            .entry(operation)
            .or_default()
            .push_back((entered_tx, release_rx));
        Gate {
            entered: Some(entered_rx),
            release: release_tx,
        }
    }

    async fn pass(&self, operation: &'static str) {
        let held = self
            .held
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        if let Some((entered, release)) = held {
            let _ = entered.send(());
            let _ = release.await;
        }
    }
}

#[async_trait]
impl DatasetApi for GatedApi {
    async fn dataset(&self, dataset: DatasetId) -> Result<DatasetMeta, ApiError> {
        self.pass("dataset").await;
        self.inner.dataset(dataset).await
    }

    async fn rows(&self, dataset: DatasetId, query: Option<&str>) -> Result<RowsPage, ApiError> {
        self.pass("rows").await;
        self.inner.rows(dataset, query).await
    }

    async fn patch_cell(&self, dataset: DatasetId, patch: &CellPatch) -> Result<(), ApiError> {
        self.pass("patch_cell").await;
        self.inner.patch_cell(dataset, patch).await
    }

    async fn upsert_rows(
        &self,
        dataset: DatasetId,
        rows: Vec<RowFields>,
    ) -> Result<UpsertResult, ApiError> {
        self.pass("upsert_rows").await;
        self.inner.upsert_rows(dataset, rows).await
    }

    async fn add_column(&self, dataset: DatasetId, key: &str) -> Result<Schema, ApiError> {
        self.pass("add_column").await;
        self.inner.add_column(dataset, key).await
    }

    async fn delete_rows(&self, dataset: DatasetId, ids: &[RowId]) -> Result<u64, ApiError> {
        self.pass("delete_rows").await;
        self.inner.delete_rows(dataset, ids).await
    }

    async fn export(
        &self,
        dataset: DatasetId,
        format: ExportFormat,
    ) -> Result<ExportPayload, ApiError> {
        self.pass("export").await;
        self.inner.export(dataset, format).await
    }

    async fn list_all(&self) -> Result<Vec<DatasetSummary>, ApiError> {
        self.pass("list_all").await;
        self.inner.list_all().await
    }

    async fn list_mine(&self, client_id: &str) -> Result<Vec<DatasetSummary>, ApiError> {
        self.pass("list_mine").await;
        self.inner.list_mine(client_id).await
    }

    async fn create_dataset(&self, request: &CreateDataset) -> Result<DatasetMeta, ApiError> {
        self.pass("create_dataset").await;
        self.inner.create_dataset(request).await
    }

    async fn health(&self) -> Result<(), ApiError> {
        self.pass("health").await;
        self.inner.health().await
    }
}
