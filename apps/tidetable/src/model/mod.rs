//! In-memory view state for one open dataset.

use indexmap::IndexMap;

pub use tidetable_sdk::model::{Column, DatasetId, Row, RowFields, RowId, Schema};

/// Schema plus rows keyed by id.
///
/// Rows keep their arrival order: an existing row never moves when it is
/// rewritten, and unseen ids are appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetState {
    pub(crate) schema: Schema,
    pub(crate) rows: IndexMap<RowId, Row>,
}

impl DatasetState {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: IndexMap::new(),
        }
    }

    pub fn with_rows(schema: Schema, rows: impl IntoIterator<Item = Row>) -> Self {
        let mut state = Self::new(schema);
        for row in rows {
            state.rows.insert(row.id, row);
        }
        state
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = &Row> {
        self.rows.values()
    }

    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.get(&id)
    }

    pub fn contains_row(&self, id: RowId) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `key` in row `id`, `None` when either is missing.
    pub fn cell(&self, id: RowId, key: &str) -> Option<&serde_json::Value> {
        self.rows.get(&id).and_then(|row| row.get(key))
    }
}
