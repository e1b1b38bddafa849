//! Wire data model shared by the HTTP client and the realtime core.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server-assigned dataset identifier.
pub type DatasetId = i64;

/// Server-assigned row identifier, unique within a dataset and immutable.
pub type RowId = i64;

/// Field map of a row without its identity, as sent for new rows.
pub type RowFields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Column {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

/// Ordered column list. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: keys.into_iter().map(Column::new).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.columns.iter().any(|column| column.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A dataset row: a mandatory `id` plus arbitrary scalar fields.
///
/// Fields may name columns that are not (yet) in the schema, and may omit
/// columns that are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    #[serde(flatten)]
    pub fields: RowFields,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Overwrite colliding keys with `incoming`, keeping everything else.
    pub fn merge_fields(&mut self, incoming: RowFields) {
        for (key, value) in incoming {
            self.fields.insert(key, value);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub id: DatasetId,
    pub name: String,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub id: DatasetId,
    pub name: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowsPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellPatch {
    pub id: RowId,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    #[serde(default)]
    pub created: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDataset {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by_client: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }
}

/// Export response: a suggested filename and the exported content.
///
/// JSON exports carry the row array as `content`; CSV exports carry the
/// rendered text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content: Value,
}

impl ExportPayload {
    pub fn file_name(&self, format: ExportFormat) -> String {
        self.filename
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("dataset.{}", format.as_str()))
    }

    /// Render the content the way it is written to disk.
    pub fn file_contents(&self, format: ExportFormat) -> Result<String, serde_json::Error> {
        match (format, &self.content) {
            (ExportFormat::Json, content) => serde_json::to_string_pretty(content),
            (ExportFormat::Csv, Value::String(text)) => Ok(text.clone()),
            (ExportFormat::Csv, Value::Null) => Ok(String::new()),
            (ExportFormat::Csv, other) => Ok(other.to_string()),
        }
    }
}
