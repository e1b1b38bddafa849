//! Single owner of one dataset view's state.
//!
//! Every mutation, local or pushed, goes through [`DatasetStore::apply`].
//! Readers take [`DatasetStore::snapshot`] (a shared, immutable
//! `Arc<DatasetState>`) or await changes on [`DatasetStore::subscribe`]; a
//! reader never observes a partially applied event.

pub mod reconcile;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::trace;

use crate::model::{DatasetId, DatasetState, Schema};
use crate::protocol::ChangeEvent;

pub use reconcile::{MergeOutcome, merge, reconcile};

pub struct DatasetStore {
    dataset: DatasetId,
    state: watch::Sender<Arc<DatasetState>>,
    closed: AtomicBool,
}

impl DatasetStore {
    pub fn new(dataset: DatasetId, schema: Schema) -> Self {
        Self::from_state(dataset, DatasetState::new(schema))
    }

    pub fn from_state(dataset: DatasetId, state: DatasetState) -> Self {
        let (state, _) = watch::channel(Arc::new(state));
        Self {
            dataset,
            state,
            closed: AtomicBool::new(false),
        }
    }

    pub fn dataset(&self) -> DatasetId {
        self.dataset
    }

    pub fn snapshot(&self) -> Arc<DatasetState> {
        Arc::clone(&self.state.borrow())
    }

    /// Receiver that is notified after every event that changed the state.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DatasetState>> {
        self.state.subscribe()
    }

    /// Apply one change event and return the resulting state.
    ///
    /// Returns `None` once the store has been closed; the event is dropped.
    pub fn apply(&self, event: ChangeEvent) -> Option<Arc<DatasetState>> {
        let tag = event.tag();
        let mut outcome = None;
        let mut next = None;
        self.state.send_if_modified(|state| {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            let merged = merge(Arc::make_mut(state), event);
            outcome = Some(merged);
            next = Some(Arc::clone(state));
            merged.changed()
        });
        match outcome {
            Some(outcome) => {
                trace!(
                    target = "tidetable::store",
                    dataset = self.dataset,
                    event = tag,
                    ?outcome,
                    "change event applied"
                );
            }
            None => {
                trace!(
                    target = "tidetable::store",
                    dataset = self.dataset,
                    event = tag,
                    "store closed; change event dropped"
                );
            }
        }
        next
    }

    /// Tear down: every later [`apply`](Self::apply) is a no-op.
    pub fn close(&self) {
        self.state.send_if_modified(|_| {
            self.closed.store(true, Ordering::Release);
            false
        });
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DatasetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DatasetStore")
            .field("dataset", &self.dataset)
            .field("columns", &state.schema().len())
            .field("rows", &state.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
