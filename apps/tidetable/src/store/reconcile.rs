//! Merge algorithm: (prior state, change event) -> next state.
//!
//! Last-write-wins per cell with no version comparison; whichever event is
//! applied last wins.

use std::collections::HashSet;

use crate::model::{Column, DatasetState, Row, RowId};
use crate::protocol::ChangeEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// `cell` for a row id the store has never seen.
    SkippedUnknownRow,
    /// `column_add` for a key the schema already has.
    SkippedExistingColumn,
    /// `delete_rows` naming only ids that are not present.
    NoMatchingRows,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        matches!(self, MergeOutcome::Applied)
    }
}

/// Pure form of [`merge`]: leaves `prior` untouched.
pub fn reconcile(prior: &DatasetState, event: ChangeEvent) -> DatasetState {
    let mut next = prior.clone();
    merge(&mut next, event);
    next
}

/// Apply `event` to `state`.
pub fn merge(state: &mut DatasetState, event: ChangeEvent) -> MergeOutcome {
    match event {
        ChangeEvent::Cell { row_id, key, value } => match state.rows.get_mut(&row_id) {
            // Not an implicit upsert: the row may have been filtered out or deleted.
            None => MergeOutcome::SkippedUnknownRow,
            Some(row) => {
                row.set(key, value);
                MergeOutcome::Applied
            }
        },
        ChangeEvent::RowsUpsert { rows } => {
            upsert_rows(state, rows);
            MergeOutcome::Applied
        }
        ChangeEvent::ColumnAdd { key } => {
            if state.schema.contains(&key) {
                MergeOutcome::SkippedExistingColumn
            } else {
                state.schema.columns.push(Column::new(key));
                MergeOutcome::Applied
            }
        }
        ChangeEvent::DeleteRows { ids } => {
            let doomed: HashSet<RowId> = ids.into_iter().collect();
            let before = state.rows.len();
            state.rows.retain(|id, _| !doomed.contains(id));
            if state.rows.len() == before {
                MergeOutcome::NoMatchingRows
            } else {
                MergeOutcome::Applied
            }
        }
        ChangeEvent::RowsReset { rows } => {
            state.rows.clear();
            upsert_rows(state, rows);
            MergeOutcome::Applied
        }
    }
}

fn upsert_rows(state: &mut DatasetState, rows: Vec<Row>) {
    state.rows.reserve(rows.len());
    for row in rows {
        match state.rows.get_mut(&row.id) {
            Some(existing) => existing.merge_fields(row.fields),
            None => {
                state.rows.insert(row.id, row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn state_with(ids: &[RowId]) -> DatasetState {
        DatasetState::with_rows(
            Schema::from_keys(["A"]),
            ids.iter().map(|id| Row::new(*id).with("A", format!("r{id}"))),
        )
    }

    #[test]
    fn cell_overwrites_existing_value() {
        let prior = DatasetState::with_rows(
            Schema::from_keys(["A"]),
            [Row::new(1).with("A", "x")],
        );
        let next = reconcile(&prior, ChangeEvent::cell(1, "A", "y"));
        assert_eq!(next.cell(1, "A"), Some(&json!("y")));
        assert_eq!(next.len(), 1);
        assert_eq!(prior.cell(1, "A"), Some(&json!("x")));
    }

    #[test]
    fn cell_for_unknown_row_is_dropped() {
        let mut state = state_with(&[1, 2]);
        let before = state.clone();
        let outcome = merge(&mut state, ChangeEvent::cell(99, "A", "z"));
        assert_eq!(outcome, MergeOutcome::SkippedUnknownRow);
        assert_eq!(state, before);
    }

    #[test]
    fn cell_may_target_key_outside_schema() {
        let mut state = state_with(&[1]);
        merge(&mut state, ChangeEvent::cell(1, "Hidden", 3));
        assert_eq!(state.cell(1, "Hidden"), Some(&json!(3)));
        assert!(!state.schema().contains("Hidden"));
    }

    #[test]
    fn upsert_merges_fields_of_known_rows() {
        let mut state = DatasetState::default();
        merge(
            &mut state,
            ChangeEvent::RowsUpsert {
                rows: vec![Row::new(5).with("A", "p")],
            },
        );
        merge(
            &mut state,
            ChangeEvent::RowsUpsert {
                rows: vec![Row::new(5).with("B", "q")],
            },
        );
        assert_eq!(state.len(), 1);
        assert_eq!(state.row(5), Some(&Row::new(5).with("A", "p").with("B", "q")));
    }

    #[test]
    fn upsert_appends_new_ids_in_incoming_order() {
        let mut state = state_with(&[3, 1]);
        merge(
            &mut state,
            ChangeEvent::RowsUpsert {
                rows: vec![
                    Row::new(9),
                    Row::new(1).with("A", "changed"),
                    Row::new(7),
                ],
            },
        );
        assert_eq!(state.row_ids(), vec![3, 1, 9, 7]);
        assert_eq!(state.cell(1, "A"), Some(&json!("changed")));
    }

    #[test]
    fn column_add_is_idempotent() {
        let mut state = DatasetState::default();
        assert_eq!(
            merge(&mut state, ChangeEvent::column_add("c")),
            MergeOutcome::Applied
        );
        assert_eq!(
            merge(&mut state, ChangeEvent::column_add("c")),
            MergeOutcome::SkippedExistingColumn
        );
        assert_eq!(state.schema().keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn delete_keeps_relative_order_and_ignores_unknown_ids() {
        let mut state = state_with(&[1, 2, 3]);
        merge(&mut state, ChangeEvent::DeleteRows { ids: vec![2, 4] });
        assert_eq!(state.row_ids(), vec![1, 3]);

        let before = state.clone();
        let outcome = merge(&mut state, ChangeEvent::DeleteRows { ids: vec![2, 4] });
        assert_eq!(outcome, MergeOutcome::NoMatchingRows);
        assert_eq!(state, before);
    }

    #[test]
    fn reset_replaces_rows_and_keeps_schema() {
        let mut state = state_with(&[1, 2, 3]);
        merge(
            &mut state,
            ChangeEvent::RowsReset {
                rows: vec![Row::new(8), Row::new(2)],
            },
        );
        assert_eq!(state.row_ids(), vec![8, 2]);
        assert_eq!(state.cell(2, "A"), None);
        assert!(state.schema().contains("A"));
    }

    fn upsert_batches() -> impl Strategy<Value = Vec<Vec<(RowId, String, i64)>>> {
        let key = prop::sample::select(vec!["A", "B", "C"]).prop_map(String::from);
        prop::collection::vec(
            prop::collection::vec((0i64..12, key, any::<i64>()), 0..6),
            0..12,
        )
    }

    proptest! {
        #[test]
        fn upserts_keep_one_row_per_id_with_last_written_fields(batches in upsert_batches()) {
            let mut state = DatasetState::default();
            let mut expected: HashMap<RowId, HashMap<String, i64>> = HashMap::new();
            let mut first_seen: Vec<RowId> = Vec::new();

            for batch in &batches {
                let rows = batch
                    .iter()
                    .map(|(id, key, value)| Row::new(*id).with(key.clone(), *value))
                    .collect();
                merge(&mut state, ChangeEvent::RowsUpsert { rows });
                for (id, key, value) in batch {
                    if !expected.contains_key(id) {
                        first_seen.push(*id);
                    }
                    expected.entry(*id).or_default().insert(key.clone(), *value);
                }
            }

            prop_assert_eq!(state.len(), expected.len());
            prop_assert_eq!(state.row_ids(), first_seen);
            for (id, fields) in &expected {
                let row = state.row(*id).expect("row present");
                prop_assert_eq!(row.fields.len(), fields.len());
                for (key, value) in fields {
                    prop_assert_eq!(row.get(key), Some(&Value::from(*value)));
                }
            }
        }

        #[test]
        fn delete_and_column_add_are_idempotent(ids in prop::collection::vec(0i64..20, 0..8), key in "[a-z]{1,4}") {
            let mut once = state_with(&[1, 2, 3, 5, 8, 13]);
            merge(&mut once, ChangeEvent::DeleteRows { ids: ids.clone() });
            merge(&mut once, ChangeEvent::column_add(key.clone()));

            let mut twice = once.clone();
            merge(&mut twice, ChangeEvent::DeleteRows { ids });
            merge(&mut twice, ChangeEvent::column_add(key));
            prop_assert_eq!(once, twice);
        }
    }
}
