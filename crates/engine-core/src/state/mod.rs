pub mod migrate;
pub mod store;

use model::core::value::Value;
use model::stream::Field;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Version tag written into every persisted stream state document.
pub const STATE_VERSION: u64 = 3;

/// Highest version that still uses the retired document shapes and
/// must run through [`migrate`] before it can be interpreted.
pub const LEGACY_STATE_VERSION: u64 = 2;

/// A per-stream checkpoint.
///
/// Consumers treat the persisted form as an opaque blob; only this
/// module knows the document layout. Scalar checkpoint values are kept
/// in their portable string form and re-typed against the stream's
/// field definitions when a partition is rebuilt from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpaqueState {
    /// A snapshot scan over a primary-key range. `pk_name == None`
    /// marks the snapshot as finished. For snapshot-then-cursor syncs
    /// the pending cursor handoff rides along in `incremental`.
    PrimaryKey {
        pk_name: Option<String>,
        pk_val: Option<String>,
        incremental: Option<Box<OpaqueState>>,
    },
    /// A cursor-incremental checkpoint. While the initial snapshot is
    /// still running, `pk_name`/`pk_val` carry the scan position and
    /// `cursor` holds the upper bound frozen at snapshot start.
    CursorBased {
        cursor_field: Vec<String>,
        cursor: Option<String>,
        pk_name: Option<String>,
        pk_val: Option<String>,
    },
}

impl OpaqueState {
    /// Marker for a snapshot that ran to the end of the table.
    pub fn snapshot_completed() -> Self {
        OpaqueState::PrimaryKey { pk_name: None, pk_val: None, incremental: None }
    }

    /// Mid-snapshot checkpoint at `value` on the scan key.
    pub fn snapshot_checkpoint(pk: &Field, value: &Value) -> Self {
        OpaqueState::PrimaryKey {
            pk_name: Some(pk.name.clone()),
            pk_val: value.to_state_string(),
            incremental: None,
        }
    }

    /// Completed snapshot with a cursor handoff still pending.
    pub fn snapshot_completed_with_cursor(cursor: &Field, upper_bound: &Value) -> Self {
        OpaqueState::PrimaryKey {
            pk_name: None,
            pk_val: None,
            incremental: Some(Box::new(OpaqueState::CursorBased {
                cursor_field: vec![cursor.name.clone()],
                cursor: upper_bound.to_state_string(),
                pk_name: None,
                pk_val: None,
            })),
        }
    }

    /// Mid-snapshot checkpoint for a stream that will switch to cursor
    /// reads once the scan finishes. Carries the cursor upper bound
    /// frozen at snapshot start so a resumed run does not widen the
    /// window.
    pub fn snapshot_with_cursor_checkpoint(
        pk: &Field,
        pk_value: &Value,
        cursor: &Field,
        cursor_upper_bound: &Value,
    ) -> Self {
        OpaqueState::PrimaryKey {
            pk_name: Some(pk.name.clone()),
            pk_val: pk_value.to_state_string(),
            incremental: Some(Box::new(OpaqueState::CursorBased {
                cursor_field: vec![cursor.name.clone()],
                cursor: cursor_upper_bound.to_state_string(),
                pk_name: None,
                pk_val: None,
            })),
        }
    }

    /// Checkpoint after reading up to `value` on the cursor field.
    pub fn cursor_checkpoint(cursor: &Field, value: &Value) -> Self {
        OpaqueState::CursorBased {
            cursor_field: vec![cursor.name.clone()],
            cursor: value.to_state_string(),
            pk_name: None,
            pk_val: None,
        }
    }

    pub fn is_snapshot_completed(&self) -> bool {
        matches!(
            self,
            OpaqueState::PrimaryKey { pk_name: None, incremental: None, .. }
        )
    }

    /// Serializes into the version-tagged wire document.
    pub fn to_document(&self) -> serde_json::Value {
        let doc = self.to_wire();
        // StateDocument has no map keys or non-string-serializable
        // values, so this cannot fail.
        serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
    }

    /// Parses a wire document, migrating legacy shapes as needed.
    /// `Ok(None)` means the document carried no usable checkpoint and
    /// the stream should start over.
    pub fn from_document(doc: &serde_json::Value) -> Result<Option<Self>, ExtractError> {
        if doc.is_null() {
            return Ok(None);
        }
        let wire: StateDocument = serde_json::from_value(doc.clone())?;
        migrate::interpret(wire)
    }

    fn to_wire(&self) -> StateDocument {
        match self {
            OpaqueState::PrimaryKey { pk_name, pk_val, incremental } => StateDocument {
                version: Some(STATE_VERSION),
                state_type: Some(StateType::PrimaryKey),
                pk_name: pk_name.clone(),
                pk_val: pk_val.clone(),
                cursor_field: Vec::new(),
                cursor: None,
                incremental_state: incremental
                    .as_ref()
                    .map(|inner| Box::new(inner.to_wire())),
                ordered_col: None,
                ordered_col_val: None,
            },
            OpaqueState::CursorBased { cursor_field, cursor, pk_name, pk_val } => {
                StateDocument {
                    version: Some(STATE_VERSION),
                    state_type: Some(StateType::CursorBased),
                    pk_name: pk_name.clone(),
                    pk_val: pk_val.clone(),
                    cursor_field: cursor_field.clone(),
                    cursor: cursor.clone(),
                    incremental_state: None,
                    ordered_col: None,
                    ordered_col_val: None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum StateType {
    PrimaryKey,
    CursorBased,
    /// Retired in version 3; migrated to `PrimaryKey`.
    OrderedColumn,
}

/// Raw wire shape, shared by the current and legacy layouts so the
/// migration path can inspect both without reparsing.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StateDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_type: Option<StateType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pk_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pk_val: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cursor_field: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_state: Option<Box<StateDocument>>,
    // Version <= 2 fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered_col: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered_col_val: Option<String>,
}
