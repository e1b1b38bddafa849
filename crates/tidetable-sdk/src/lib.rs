//! Asynchronous client for the tidetable dataset API.
//!
//! The realtime core consumes this crate through the [`DatasetApi`] trait so
//! that edits, refetches, and exports can be exercised against
//! [`InMemoryDatasetApi`] in tests and against [`HttpDatasetApi`] in
//! production.

mod client;
mod memory;
pub mod model;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use client::HttpDatasetApi;
pub use memory::{ApiCall, InMemoryDatasetApi};
pub use model::{
    CellPatch, Column, CreateDataset, DatasetId, DatasetMeta, DatasetSummary, ExportFormat,
    ExportPayload, Row, RowFields, RowId, RowsPage, Schema, UpsertResult,
};

const FALLBACK_MESSAGE: &str = "Network error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("api unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        match self {
            ApiError::UnexpectedStatus { status, .. } => Some(*status),
            ApiError::Http(err) => err.status(),
            _ => None,
        }
    }

    /// Text suitable for a user-facing notification.
    ///
    /// Prefers the server's `detail`, then `message`, then the error's own
    /// description.
    pub fn user_message(&self) -> String {
        if let ApiError::UnexpectedStatus { status, body } = self {
            if let Some(message) = body_message(body) {
                return message;
            }
            return format!("Request failed with status code {}", status.as_u16());
        }
        let text = self.to_string();
        if text.trim().is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            text
        }
    }
}

fn body_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["detail", "message"].iter().find_map(|field| {
        match value.get(*field)? {
            Value::Null => None,
            Value::String(text) if text.is_empty() => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    })
}

/// Request/response surface of the dataset service.
#[async_trait]
pub trait DatasetApi: Send + Sync {
    /// Dataset metadata including its schema.
    async fn dataset(&self, dataset: DatasetId) -> Result<DatasetMeta, ApiError>;

    /// Rows of a dataset, server-filtered by `query` when present.
    async fn rows(&self, dataset: DatasetId, query: Option<&str>) -> Result<RowsPage, ApiError>;

    async fn patch_cell(&self, dataset: DatasetId, patch: &CellPatch) -> Result<(), ApiError>;

    async fn upsert_rows(
        &self,
        dataset: DatasetId,
        rows: Vec<RowFields>,
    ) -> Result<UpsertResult, ApiError>;

    async fn add_column(&self, dataset: DatasetId, key: &str) -> Result<Schema, ApiError>;

    /// Returns the number of rows the server archived.
    async fn delete_rows(&self, dataset: DatasetId, ids: &[RowId]) -> Result<u64, ApiError>;

    async fn export(
        &self,
        dataset: DatasetId,
        format: ExportFormat,
    ) -> Result<ExportPayload, ApiError>;

    async fn list_all(&self) -> Result<Vec<DatasetSummary>, ApiError>;

    async fn list_mine(&self, client_id: &str) -> Result<Vec<DatasetSummary>, ApiError>;

    async fn create_dataset(&self, request: &CreateDataset) -> Result<DatasetMeta, ApiError>;

    async fn health(&self) -> Result<(), ApiError>;
}
