//! Change events pushed over the dataset transport, and their decoder.
//!
//! Inbound payloads are untrusted JSON objects with a `type` discriminator:
//!
//! ```text
//! {"type":"cell","row_id":1,"key":"A","value":"y"}
//! {"type":"rows_upsert","rows":[{"id":5,"A":"p"}]}
//! {"type":"column_add","key":"B"}
//! {"type":"delete_rows","ids":[2,4]}
//! {"type":"rows_reset","rows":[...]}
//! ```
//!
//! [`decode`] validates the shape for each tag and never panics; callers log
//! and drop a [`DecodeError`] without touching the connection.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{Row, RowId};

pub const CELL: &str = "cell";
pub const ROWS_UPSERT: &str = "rows_upsert";
pub const COLUMN_ADD: &str = "column_add";
pub const DELETE_ROWS: &str = "delete_rows";
pub const ROWS_RESET: &str = "rows_reset";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// One scalar at (`row_id`, `key`) is now `value`.
    Cell {
        row_id: RowId,
        key: String,
        value: Value,
    },
    /// Merge each row by id; unseen ids are appended in order.
    RowsUpsert { rows: Vec<Row> },
    /// A column exists; no effect when the key is already present.
    ColumnAdd { key: String },
    /// Remove rows by id; unknown ids are ignored.
    DeleteRows { ids: Vec<RowId> },
    /// Replace every row with an authoritative snapshot.
    RowsReset { rows: Vec<Row> },
}

impl ChangeEvent {
    pub fn cell(row_id: RowId, key: impl Into<String>, value: impl Into<Value>) -> Self {
        ChangeEvent::Cell {
            row_id,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn column_add(key: impl Into<String>) -> Self {
        ChangeEvent::ColumnAdd { key: key.into() }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ChangeEvent::Cell { .. } => CELL,
            ChangeEvent::RowsUpsert { .. } => ROWS_UPSERT,
            ChangeEvent::ColumnAdd { .. } => COLUMN_ADD,
            ChangeEvent::DeleteRows { .. } => DELETE_ROWS,
            ChangeEvent::RowsReset { .. } => ROWS_RESET,
        }
    }

    /// Serialize to the wire shape.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no string `type` discriminator")]
    MissingType,
    #[error("unrecognized change event type `{0}`")]
    UnknownType(String),
    #[error("invalid `{tag}` payload: {source}")]
    InvalidPayload {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{tag}` payload has an empty key")]
    EmptyKey { tag: &'static str },
}

#[derive(Deserialize)]
struct CellPayload {
    row_id: RowId,
    key: String,
    value: Value,
}

#[derive(Deserialize)]
struct RowsPayload {
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct ColumnPayload {
    key: String,
}

#[derive(Deserialize)]
struct IdsPayload {
    ids: Vec<RowId>,
}

fn payload<T: DeserializeOwned>(tag: &'static str, object: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(object))
        .map_err(|source| DecodeError::InvalidPayload { tag, source })
}

fn non_empty(tag: &'static str, key: String) -> Result<String, DecodeError> {
    if key.is_empty() {
        Err(DecodeError::EmptyKey { tag })
    } else {
        Ok(key)
    }
}

/// Decode one inbound transport payload.
pub fn decode(raw: &[u8]) -> Result<ChangeEvent, DecodeError> {
    let value: Value = serde_json::from_slice(raw).map_err(DecodeError::Malformed)?;
    decode_value(value)
}

pub fn decode_str(raw: &str) -> Result<ChangeEvent, DecodeError> {
    decode(raw.as_bytes())
}

pub fn decode_value(value: Value) -> Result<ChangeEvent, DecodeError> {
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let tag = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    match tag {
        CELL => {
            let CellPayload { row_id, key, value } = payload(CELL, object)?;
            Ok(ChangeEvent::Cell {
                row_id,
                key: non_empty(CELL, key)?,
                value,
            })
        }
        ROWS_UPSERT => {
            let RowsPayload { rows } = payload(ROWS_UPSERT, object)?;
            Ok(ChangeEvent::RowsUpsert { rows })
        }
        COLUMN_ADD => {
            let ColumnPayload { key } = payload(COLUMN_ADD, object)?;
            Ok(ChangeEvent::ColumnAdd {
                key: non_empty(COLUMN_ADD, key)?,
            })
        }
        DELETE_ROWS => {
            let IdsPayload { ids } = payload(DELETE_ROWS, object)?;
            Ok(ChangeEvent::DeleteRows { ids })
        }
        ROWS_RESET => {
            let RowsPayload { rows } = payload(ROWS_RESET, object)?;
            Ok(ChangeEvent::RowsReset { rows })
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}
