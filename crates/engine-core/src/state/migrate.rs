//! Upgrades persisted state documents from retired layouts.
//!
//! Version 2 and earlier wrote `ordered_column` documents with
//! `ordered_col` / `ordered_col_val` keys; version 3 renamed the shape
//! to `primary_key`. Cursor documents kept their layout across
//! versions and only need the tag bumped.

use tracing::warn;

use crate::error::ExtractError;
use crate::state::{LEGACY_STATE_VERSION, OpaqueState, StateDocument, StateType};

/// Turns a raw wire document into a checkpoint, migrating legacy
/// shapes in place. `Ok(None)` means the document is not a usable
/// checkpoint and the stream starts over from scratch.
pub(crate) fn interpret(doc: StateDocument) -> Result<Option<OpaqueState>, ExtractError> {
    let version = doc.version.unwrap_or(0);
    if version > LEGACY_STATE_VERSION {
        return current(doc);
    }
    legacy(doc)
}

fn current(doc: StateDocument) -> Result<Option<OpaqueState>, ExtractError> {
    match doc.state_type {
        Some(StateType::PrimaryKey) => {
            let incremental = match doc.incremental_state {
                Some(inner) => interpret(*inner)?.map(Box::new),
                None => None,
            };
            Ok(Some(OpaqueState::PrimaryKey {
                pk_name: doc.pk_name,
                pk_val: doc.pk_val,
                incremental,
            }))
        }
        Some(StateType::CursorBased) => Ok(Some(OpaqueState::CursorBased {
            cursor_field: doc.cursor_field,
            cursor: doc.cursor,
            pk_name: doc.pk_name,
            pk_val: doc.pk_val,
        })),
        other => Err(ExtractError::StateParse(format!(
            "unrecognized state_type {other:?} in version {} document",
            doc.version.unwrap_or(0),
        ))),
    }
}

fn legacy(doc: StateDocument) -> Result<Option<OpaqueState>, ExtractError> {
    match doc.state_type {
        // Pre-v3 snapshot checkpoints, including untagged documents
        // from before the state_type field existed.
        Some(StateType::OrderedColumn) | None => {
            if doc.state_type.is_none() && doc.ordered_col.is_none() && doc.cursor.is_none() {
                warn!("legacy state document has no recognizable checkpoint; starting over");
                return Ok(None);
            }
            let incremental = match doc.incremental_state {
                Some(inner) => interpret(*inner)?.map(Box::new),
                None => None,
            };
            Ok(Some(OpaqueState::PrimaryKey {
                pk_name: doc.ordered_col,
                pk_val: doc.ordered_col_val,
                incremental,
            }))
        }
        Some(StateType::CursorBased) => Ok(Some(OpaqueState::CursorBased {
            cursor_field: doc.cursor_field,
            cursor: doc.cursor,
            pk_name: doc.pk_name,
            pk_val: doc.pk_val,
        })),
        Some(StateType::PrimaryKey) => {
            // A v3 shape carrying a legacy version tag. Trust the shape.
            current(doc)
        }
    }
}
