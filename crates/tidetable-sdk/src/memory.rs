use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::model::{
    CellPatch, Column, CreateDataset, DatasetId, DatasetMeta, DatasetSummary, ExportFormat,
    ExportPayload, Row, RowFields, RowId, RowsPage, Schema, UpsertResult,
};
use crate::{ApiError, DatasetApi};

/// A request observed by [`InMemoryDatasetApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Dataset(DatasetId),
    Rows {
        dataset: DatasetId,
        query: Option<String>,
    },
    PatchCell {
        dataset: DatasetId,
        patch: CellPatch,
    },
    UpsertRows {
        dataset: DatasetId,
        rows: Vec<RowFields>,
    },
    AddColumn {
        dataset: DatasetId,
        key: String,
    },
    DeleteRows {
        dataset: DatasetId,
        ids: Vec<RowId>,
    },
    Export {
        dataset: DatasetId,
        format: ExportFormat,
    },
    ListAll,
    ListMine(String),
    CreateDataset(CreateDataset),
    Health,
}

impl ApiCall {
    pub fn operation(&self) -> &'static str {
        match self {
            ApiCall::Dataset(_) => "dataset",
            ApiCall::Rows { .. } => "rows",
            ApiCall::PatchCell { .. } => "patch_cell",
            ApiCall::UpsertRows { .. } => "upsert_rows",
            ApiCall::AddColumn { .. } => "add_column",
            ApiCall::DeleteRows { .. } => "delete_rows",
            ApiCall::Export { .. } => "export",
            ApiCall::ListAll => "list_all",
            ApiCall::ListMine(_) => "list_mine",
            ApiCall::CreateDataset(_) => "create_dataset",
            ApiCall::Health => "health",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredDataset {
    name: String,
    schema: Schema,
    rows: Vec<Row>,
    created_by: Option<String>,
}

impl StoredDataset {
    fn meta(&self, id: DatasetId) -> DatasetMeta {
        DatasetMeta {
            id,
            name: self.name.clone(),
            schema: self.schema.clone(),
            updated_at: None,
        }
    }

    fn summary(&self, id: DatasetId) -> DatasetSummary {
        DatasetSummary {
            id,
            name: self.name.clone(),
            updated_at: None,
        }
    }
}

#[derive(Default)]
struct State {
    datasets: BTreeMap<DatasetId, StoredDataset>,
    next_dataset_id: DatasetId,
    next_row_id: RowId,
    calls: Vec<ApiCall>,
    failing: HashSet<&'static str>,
}

/// In-memory adapter for tests and early wiring.
///
/// Behaves like the dataset service for the operations the core uses and
/// records every call it receives.
#[derive(Default)]
pub struct InMemoryDatasetApi {
    state: Mutex<State>,
}

fn status(code: StatusCode, detail: &str) -> ApiError {
    ApiError::UnexpectedStatus {
        status: code,
        body: json!({ "detail": detail }).to_string(),
    }
}

fn not_found() -> ApiError {
    status(StatusCode::NOT_FOUND, "Dataset not found")
}

fn row_matches(row: &Row, needle: &str) -> bool {
    let haystack = Value::Object(row.fields.clone()).to_string().to_lowercase();
    haystack.contains(&needle.to_lowercase())
}

fn csv_field(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

impl InMemoryDatasetApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset and return its id. Rows keep their ids; later
    /// inserts are numbered after the highest seeded id.
    pub fn seed(&self, name: &str, schema: Schema, rows: Vec<Row>) -> DatasetId {
        let mut state = self.state.lock();
        state.next_dataset_id += 1;
        let id = state.next_dataset_id;
        let max_row = rows.iter().map(|row| row.id).max().unwrap_or(0);
        state.next_row_id = state.next_row_id.max(max_row);
        state.datasets.insert(
            id,
            StoredDataset {
                name: name.to_string(),
                schema,
                rows,
                created_by: None,
            },
        );
        id
    }

    /// Make every subsequent call to `operation` fail with a 500.
    pub fn fail_operation(&self, operation: &'static str) {
        self.state.lock().failing.insert(operation);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().calls.clone()
    }

    pub fn rows_of(&self, dataset: DatasetId) -> Vec<Row> {
        self.state
            .lock()
            .datasets
            .get(&dataset)
            .map(|stored| stored.rows.clone())
            .unwrap_or_default()
    }

    pub fn schema_of(&self, dataset: DatasetId) -> Option<Schema> {
        self.state
            .lock()
            .datasets
            .get(&dataset)
            .map(|stored| stored.schema.clone())
    }

    /// Server-side column addition that bypasses the call log, as another
    /// client would cause.
    pub fn add_column_remotely(&self, dataset: DatasetId, key: &str) {
        if let Some(stored) = self.state.lock().datasets.get_mut(&dataset) {
            if !stored.schema.contains(key) {
                stored.schema.columns.push(Column::new(key).with_kind("string"));
            }
        }
    }

    /// Server-side row write that bypasses the call log.
    pub fn put_row_remotely(&self, dataset: DatasetId, row: Row) {
        if let Some(stored) = self.state.lock().datasets.get_mut(&dataset) {
            match stored.rows.iter_mut().find(|existing| existing.id == row.id) {
                Some(existing) => *existing = row,
                None => stored.rows.push(row),
            }
        }
    }

    fn record(&self, call: ApiCall) -> Result<parking_lot::MutexGuard<'_, State>, ApiError> {
        let mut state = self.state.lock();
        let operation = call.operation();
        state.calls.push(call);
        if state.failing.contains(operation) {
            return Err(status(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("{operation} failed"),
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl DatasetApi for InMemoryDatasetApi {
    async fn dataset(&self, dataset: DatasetId) -> Result<DatasetMeta, ApiError> {
        let state = self.record(ApiCall::Dataset(dataset))?;
        let stored = state.datasets.get(&dataset).ok_or_else(not_found)?;
        Ok(stored.meta(dataset))
    }

    async fn rows(&self, dataset: DatasetId, query: Option<&str>) -> Result<RowsPage, ApiError> {
        let state = self.record(ApiCall::Rows {
            dataset,
            query: query.map(str::to_string),
        })?;
        let stored = state.datasets.get(&dataset).ok_or_else(not_found)?;
        let mut rows: Vec<Row> = stored
            .rows
            .iter()
            .filter(|row| match query {
                Some(q) if !q.is_empty() => row_matches(row, q),
                _ => true,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(RowsPage {
            total: rows.len() as u64,
            rows,
        })
    }

    async fn patch_cell(&self, dataset: DatasetId, patch: &CellPatch) -> Result<(), ApiError> {
        let mut state = self.record(ApiCall::PatchCell {
            dataset,
            patch: patch.clone(),
        })?;
        let stored = state.datasets.get_mut(&dataset).ok_or_else(not_found)?;
        let row = stored
            .rows
            .iter_mut()
            .find(|row| row.id == patch.id)
            .ok_or_else(|| status(StatusCode::NOT_FOUND, "Row not found"))?;
        row.set(patch.key.clone(), patch.value.clone());
        Ok(())
    }

    async fn upsert_rows(
        &self,
        dataset: DatasetId,
        rows: Vec<RowFields>,
    ) -> Result<UpsertResult, ApiError> {
        let mut state = self.record(ApiCall::UpsertRows {
            dataset,
            rows: rows.clone(),
        })?;
        let mut next_row_id = state.next_row_id;
        let stored = state.datasets.get_mut(&dataset).ok_or_else(not_found)?;
        let mut created = 0;
        for mut fields in rows {
            let id = fields.remove("id").and_then(|value| value.as_i64());
            match id {
                Some(id) => {
                    if let Some(existing) = stored.rows.iter_mut().find(|row| row.id == id) {
                        existing.fields = fields;
                    }
                }
                None => {
                    next_row_id += 1;
                    stored.rows.push(Row {
                        id: next_row_id,
                        fields,
                    });
                    created += 1;
                }
            }
        }
        state.next_row_id = next_row_id;
        Ok(UpsertResult { created })
    }

    async fn add_column(&self, dataset: DatasetId, key: &str) -> Result<Schema, ApiError> {
        let mut state = self.record(ApiCall::AddColumn {
            dataset,
            key: key.to_string(),
        })?;
        let stored = state.datasets.get_mut(&dataset).ok_or_else(not_found)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(status(StatusCode::BAD_REQUEST, "Column key required"));
        }
        if stored.schema.contains(key) {
            return Err(status(StatusCode::CONFLICT, "Column already exists"));
        }
        stored
            .schema
            .columns
            .push(Column::new(key).with_kind("string"));
        Ok(stored.schema.clone())
    }

    async fn delete_rows(&self, dataset: DatasetId, ids: &[RowId]) -> Result<u64, ApiError> {
        let mut state = self.record(ApiCall::DeleteRows {
            dataset,
            ids: ids.to_vec(),
        })?;
        let Some(stored) = state.datasets.get_mut(&dataset) else {
            return Ok(0);
        };
        let before = stored.rows.len();
        stored.rows.retain(|row| !ids.contains(&row.id));
        Ok((before - stored.rows.len()) as u64)
    }

    async fn export(
        &self,
        dataset: DatasetId,
        format: ExportFormat,
    ) -> Result<ExportPayload, ApiError> {
        let state = self.record(ApiCall::Export { dataset, format })?;
        let stored = state.datasets.get(&dataset).ok_or_else(not_found)?;
        let filename = Some(format!("{}.{}", stored.name, format.as_str()));
        let content = match format {
            ExportFormat::Json => serde_json::to_value(&stored.rows)
                .map_err(|err| ApiError::Unavailable(err.to_string()))?,
            ExportFormat::Csv => {
                let headers: Vec<&str> = stored.schema.keys().collect();
                let mut out = headers
                    .iter()
                    .map(|header| csv_field(Some(&Value::String(header.to_string()))))
                    .collect::<Vec<_>>()
                    .join(",");
                out.push_str("\r\n");
                for row in &stored.rows {
                    let line = headers
                        .iter()
                        .map(|header| csv_field(row.get(header)))
                        .collect::<Vec<_>>()
                        .join(",");
                    out.push_str(&line);
                    out.push_str("\r\n");
                }
                Value::String(out)
            }
        };
        Ok(ExportPayload { filename, content })
    }

    async fn list_all(&self) -> Result<Vec<DatasetSummary>, ApiError> {
        let state = self.record(ApiCall::ListAll)?;
        Ok(state
            .datasets
            .iter()
            .rev()
            .map(|(id, stored)| stored.summary(*id))
            .collect())
    }

    async fn list_mine(&self, client_id: &str) -> Result<Vec<DatasetSummary>, ApiError> {
        let state = self.record(ApiCall::ListMine(client_id.to_string()))?;
        Ok(state
            .datasets
            .iter()
            .rev()
            .filter(|(_, stored)| stored.created_by.as_deref() == Some(client_id))
            .map(|(id, stored)| stored.summary(*id))
            .collect())
    }

    async fn create_dataset(&self, request: &CreateDataset) -> Result<DatasetMeta, ApiError> {
        let mut state = self.record(ApiCall::CreateDataset(request.clone()))?;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(status(StatusCode::BAD_REQUEST, "Dataset name required"));
        }
        let columns: Vec<String> = request
            .columns
            .iter()
            .flatten()
            .map(|column| column.trim().to_string())
            .filter(|column| !column.is_empty())
            .collect();
        let schema = Schema::new(
            columns
                .into_iter()
                .map(|key| Column::new(key).with_kind("string"))
                .collect(),
        );
        state.next_dataset_id += 1;
        let id = state.next_dataset_id;
        let stored = StoredDataset {
            name: name.to_string(),
            schema,
            rows: Vec::new(),
            created_by: request.created_by_client.clone(),
        };
        let meta = stored.meta(id);
        state.datasets.insert(id, stored);
        Ok(meta)
    }

    async fn health(&self) -> Result<(), ApiError> {
        self.record(ApiCall::Health)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test_timeout::tokio_timeout_test]
    async fn upsert_creates_rows_after_seeded_ids() {
        let api = InMemoryDatasetApi::new();
        let id = api.seed(
            "people",
            Schema::from_keys(["A"]),
            vec![Row::new(4).with("A", "x")],
        );

        let mut fields = RowFields::new();
        fields.insert("A".into(), json!(""));
        let result = api.upsert_rows(id, vec![fields]).await.unwrap();
        assert_eq!(result.created, 1);

        let ids: Vec<RowId> = api.rows_of(id).iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn failing_operation_is_recorded_and_rejected() {
        let api = InMemoryDatasetApi::new();
        let id = api.seed("t", Schema::default(), Vec::new());
        api.fail_operation("add_column");

        let err = api.add_column(id, "New").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            api.calls(),
            vec![ApiCall::AddColumn {
                dataset: id,
                key: "New".into()
            }]
        );
        assert!(api.schema_of(id).unwrap().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn csv_export_quotes_special_fields() {
        let api = InMemoryDatasetApi::new();
        let id = api.seed(
            "t",
            Schema::from_keys(["A", "B"]),
            vec![Row::new(1).with("A", "x,y").with("B", 3)],
        );
        let payload = api.export(id, ExportFormat::Csv).await.unwrap();
        assert_eq!(payload.filename.as_deref(), Some("t.csv"));
        assert_eq!(payload.content, json!("A,B\r\n\"x,y\",3\r\n"));
    }
}
