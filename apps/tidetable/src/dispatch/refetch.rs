use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tidetable_sdk::{ApiError, DatasetApi};
use tracing::debug;

use crate::protocol::ChangeEvent;
use crate::store::DatasetStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refetched {
    /// The server's rows replaced the local rows.
    Applied,
    /// A newer refetch was issued while this one was in flight.
    Superseded,
    /// The view was torn down before the response arrived.
    Closed,
}

/// Server-filtered row refetch for one view.
///
/// Holds the current search query. Every call takes a new generation number,
/// and a response is applied only if no later call has been issued since.
pub struct RowsRefetch {
    store: Arc<DatasetStore>,
    api: Arc<dyn DatasetApi>,
    query: Mutex<String>,
    generation: AtomicU64,
}

impl RowsRefetch {
    pub fn new(store: Arc<DatasetStore>, api: Arc<dyn DatasetApi>) -> Self {
        Self {
            store,
            api,
            query: Mutex::new(String::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn query(&self) -> String {
        self.query.lock().clone()
    }

    pub fn set_query(&self, query: impl Into<String>) {
        *self.query.lock() = query.into();
    }

    /// Fetch rows for the current query and replace the local rows.
    pub async fn run(&self) -> Result<Refetched, ApiError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let query = self.query();
        let dataset = self.store.dataset();
        let filter = (!query.is_empty()).then_some(query.as_str());
        let page = self.api.rows(dataset, filter).await?;

        if self.generation.load(Ordering::Acquire) != generation {
            debug!(
                target = "tidetable::dispatch",
                dataset,
                generation,
                query = %query,
                "discarding superseded refetch"
            );
            return Ok(Refetched::Superseded);
        }
        match self.store.apply(ChangeEvent::RowsReset { rows: page.rows }) {
            Some(state) => {
                debug!(
                    target = "tidetable::dispatch",
                    dataset,
                    generation,
                    rows = state.len(),
                    total = page.total,
                    "rows refetched"
                );
                Ok(Refetched::Applied)
            }
            None => Ok(Refetched::Closed),
        }
    }
}
