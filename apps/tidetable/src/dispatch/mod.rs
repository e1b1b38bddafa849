//! User actions against an open dataset view.
//!
//! Each action ends in one [`EditOutcome`]. Request failures are reported
//! through the [`Notifier`] and leave whatever the optimistic step already
//! applied in place; a later pushed event or reconnect refetch repairs it.
//! Every local change goes through [`DatasetStore::apply`].

mod refetch;
mod saving;

use std::sync::Arc;
use std::task::Poll;

use serde_json::Value;
use tidetable_sdk::{ApiError, CellPatch, DatasetApi, ExportFormat, RowFields};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{DatasetId, RowId};
use crate::notify::{Notice, Notifier};
use crate::protocol::ChangeEvent;
use crate::store::DatasetStore;

pub use refetch::{Refetched, RowsRefetch};
pub use saving::{SavingGuard, SavingTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    /// The server accepted the change.
    Committed,
    /// Nothing to do: blank input, an empty selection, or a closed view.
    Ignored,
    /// Input failed validation; nothing was sent and nothing changed.
    Rejected,
    /// The request failed and the user was notified. Optimistic changes stay.
    Failed,
}

/// A downloadable export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub file_name: String,
    pub mime_type: &'static str,
    pub contents: String,
}

/// Parse free-form cell input.
///
/// Text that opens with `{` or `[` must be valid JSON; anything else is kept
/// as a plain string.
pub fn parse_cell_input(raw: &str) -> Result<Value, serde_json::Error> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(raw)
    } else {
        Ok(Value::String(raw.to_string()))
    }
}

pub struct EditDispatcher {
    dataset: DatasetId,
    store: Arc<DatasetStore>,
    api: Arc<dyn DatasetApi>,
    notifier: Arc<dyn Notifier>,
    refetch: Arc<RowsRefetch>,
    saving: SavingTracker,
}

impl EditDispatcher {
    pub fn new(
        store: Arc<DatasetStore>,
        api: Arc<dyn DatasetApi>,
        notifier: Arc<dyn Notifier>,
        refetch: Arc<RowsRefetch>,
    ) -> Self {
        Self {
            dataset: store.dataset(),
            store,
            api,
            notifier,
            refetch,
            saving: SavingTracker::new(),
        }
    }

    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }

    /// Current search query.
    pub fn query(&self) -> String {
        self.refetch.query()
    }

    /// True while any cell patch is in flight.
    pub fn saving(&self) -> watch::Receiver<bool> {
        self.saving.subscribe()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.is_saving()
    }

    /// Apply the value locally, then send the patch.
    pub async fn edit_cell(&self, row_id: RowId, key: &str, value: Value) -> EditOutcome {
        if self
            .store
            .apply(ChangeEvent::cell(row_id, key, value.clone()))
            .is_none()
        {
            return EditOutcome::Ignored;
        }

        let _saving = self.saving.begin();
        let patch = CellPatch {
            id: row_id,
            key: key.to_string(),
            value,
        };
        match self.api.patch_cell(self.dataset, &patch).await {
            Ok(()) => EditOutcome::Committed,
            Err(err) => self.failed("patch_cell", err),
        }
    }

    /// [`edit_cell`](Self::edit_cell) for raw text typed by the user.
    pub async fn edit_cell_input(&self, row_id: RowId, key: &str, raw: &str) -> EditOutcome {
        match parse_cell_input(raw) {
            Ok(value) => self.edit_cell(row_id, key, value).await,
            Err(err) => {
                debug!(
                    target = "tidetable::dispatch",
                    dataset = self.dataset,
                    row_id,
                    key,
                    error = %err,
                    "rejecting malformed cell input"
                );
                self.notifier
                    .notify(Notice::validation(format!("Invalid JSON: {err}")));
                EditOutcome::Rejected
            }
        }
    }

    /// Create a blank row on the server, then refetch rows for the current
    /// query. Nothing is inserted locally before the refetch.
    pub async fn add_row(&self) -> EditOutcome {
        if self.store.is_closed() {
            return EditOutcome::Ignored;
        }
        let blank: RowFields = self
            .store
            .snapshot()
            .schema()
            .keys()
            .map(|key| (key.to_string(), Value::String(String::new())))
            .collect();
        if let Err(err) = self.api.upsert_rows(self.dataset, vec![blank]).await {
            return self.failed("upsert_rows", err);
        }
        self.refetch_rows().await
    }

    /// Append the column locally, then ask the server to add it.
    pub async fn add_column(&self, name: &str) -> EditOutcome {
        let key = name.trim();
        if key.is_empty() {
            return EditOutcome::Ignored;
        }
        if self.store.apply(ChangeEvent::column_add(key)).is_none() {
            return EditOutcome::Ignored;
        }
        match self.api.add_column(self.dataset, key).await {
            Ok(_) => EditOutcome::Committed,
            Err(err) => self.failed("add_column", err),
        }
    }

    /// Send the delete for exactly `ids` and remove them locally once the
    /// request has been issued, without waiting for the response.
    pub async fn delete_rows(&self, ids: &[RowId]) -> EditOutcome {
        if ids.is_empty() || self.store.is_closed() {
            return EditOutcome::Ignored;
        }

        let dataset = self.dataset;
        let mut request = self.api.delete_rows(dataset, ids);
        // The first poll puts the request on its way.
        let issued = futures_util::poll!(&mut request);

        self.store.apply(ChangeEvent::DeleteRows { ids: ids.to_vec() });

        let result = match issued {
            Poll::Ready(result) => result,
            Poll::Pending => request.await,
        };
        match result {
            Ok(deleted) => {
                debug!(
                    target = "tidetable::dispatch",
                    dataset,
                    requested = ids.len(),
                    deleted,
                    "rows deleted"
                );
                EditOutcome::Committed
            }
            Err(err) => self.failed("delete_rows", err),
        }
    }

    /// Change the search query and refetch rows from the server.
    pub async fn search(&self, query: &str) -> EditOutcome {
        self.refetch.set_query(query);
        self.refetch_rows().await
    }

    /// Fetch an export of the whole dataset, ready to save.
    pub async fn export(&self, format: ExportFormat) -> Option<ExportFile> {
        let payload = match self.api.export(self.dataset, format).await {
            Ok(payload) => payload,
            Err(err) => {
                self.failed("export", err);
                return None;
            }
        };
        match payload.file_contents(format) {
            Ok(contents) => Some(ExportFile {
                file_name: payload.file_name(format),
                mime_type: format.mime_type(),
                contents,
            }),
            Err(err) => {
                warn!(
                    target = "tidetable::dispatch",
                    dataset = self.dataset,
                    error = %err,
                    "export payload could not be serialized"
                );
                self.notifier.notify(Notice::error(err.to_string()));
                None
            }
        }
    }

    async fn refetch_rows(&self) -> EditOutcome {
        match self.refetch.run().await {
            Ok(Refetched::Applied | Refetched::Superseded) => EditOutcome::Committed,
            Ok(Refetched::Closed) => EditOutcome::Ignored,
            Err(err) => self.failed("rows", err),
        }
    }

    fn failed(&self, operation: &'static str, err: ApiError) -> EditOutcome {
        warn!(
            target = "tidetable::dispatch",
            dataset = self.dataset,
            operation,
            error = %err,
            "request failed"
        );
        self.notifier.notify(Notice::error(err.user_message()));
        EditOutcome::Failed
    }
}
