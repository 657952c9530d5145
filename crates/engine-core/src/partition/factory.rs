use std::sync::Arc;

use model::core::value::Value;
use model::stream::{Field, Stream, SyncMode};
use query::dialect::Dialect;
use tracing::warn;

use crate::error::ExtractError;
use crate::partition::Partition;
use crate::partition::cursor::{
    CursorIncrementalPartition, NonResumableSnapshotWithCursorPartition,
    SnapshotWithCursorPartition,
};
use crate::partition::snapshot::{NonResumableSnapshotPartition, PkRangeSnapshotPartition};
use crate::source::BoundQuerier;
use crate::state::OpaqueState;

/// Decides, from a stream's sync mode and its last persisted
/// checkpoint, what to read next. Returns `None` when the stream has
/// nothing left to read in this phase.
pub struct PartitionFactory {
    dialect: Arc<dyn Dialect>,
    querier: Arc<dyn BoundQuerier>,
}

impl PartitionFactory {
    pub fn new(dialect: Arc<dyn Dialect>, querier: Arc<dyn BoundQuerier>) -> Self {
        PartitionFactory { dialect, querier }
    }

    pub async fn create(
        &self,
        stream: &Stream,
        last: Option<&OpaqueState>,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        match stream.sync_mode {
            SyncMode::FullRefresh => self.full_refresh(stream, last).await,
            SyncMode::Cdc => self.cdc_snapshot(stream, last),
            SyncMode::CursorIncremental => self.cursor_incremental(stream, last).await,
        }
    }

    async fn full_refresh(
        &self,
        stream: &Stream,
        last: Option<&OpaqueState>,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        let Some(state) = last else {
            return self.full_refresh_cold_start(stream).await;
        };
        match state {
            OpaqueState::PrimaryKey { pk_name: None, .. } => Ok(None),
            OpaqueState::PrimaryKey { pk_name: Some(name), pk_val, .. } => {
                let pk = self.checkpoint_field(stream, name)?;
                let Some(upper) = self.querier.max_value(stream, &pk).await? else {
                    // The table emptied out since the checkpoint.
                    return Ok(None);
                };
                if pk_val.as_deref() == upper.to_state_string().as_deref() {
                    return Ok(None);
                }
                let lower = self.decode_checkpoint(&pk, pk_val.as_deref())?;
                Ok(Some(Box::new(PkRangeSnapshotPartition::new(
                    Arc::clone(&self.dialect),
                    stream.clone(),
                    vec![pk],
                    lower.map(|v| vec![v]),
                    Some(vec![upper]),
                ))))
            }
            OpaqueState::CursorBased { .. } => {
                warn!(
                    stream = %stream.id(),
                    "cursor checkpoint found on a full-refresh stream; starting over"
                );
                self.full_refresh_cold_start(stream).await
            }
        }
    }

    async fn full_refresh_cold_start(
        &self,
        stream: &Stream,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        if stream.primary_key.is_empty() {
            return Ok(Some(Box::new(NonResumableSnapshotPartition::new(
                Arc::clone(&self.dialect),
                stream.clone(),
            ))));
        }
        let pk = stream.primary_key.clone();
        let upper = self.querier.max_value(stream, &pk[0]).await?;
        Ok(Some(Box::new(PkRangeSnapshotPartition::new(
            Arc::clone(&self.dialect),
            stream.clone(),
            pk,
            None,
            upper.map(|v| vec![v]),
        ))))
    }

    /// The change-capture initial load. Unbounded: the log phase picks
    /// up from an offset taken before the snapshot started, so rows
    /// written during the scan are replayed from the log.
    fn cdc_snapshot(
        &self,
        stream: &Stream,
        last: Option<&OpaqueState>,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        let lower = match last {
            None => None,
            Some(OpaqueState::PrimaryKey { pk_name: None, .. }) => return Ok(None),
            Some(OpaqueState::PrimaryKey { pk_name: Some(name), pk_val, .. }) => {
                let pk = self.checkpoint_field(stream, name)?;
                let lower = self.decode_checkpoint(&pk, pk_val.as_deref())?;
                Some((pk, lower))
            }
            Some(OpaqueState::CursorBased { .. }) => {
                warn!(
                    stream = %stream.id(),
                    "cursor checkpoint found on a change-capture stream; restarting snapshot"
                );
                None
            }
        };
        if stream.primary_key.is_empty() {
            return Ok(Some(Box::new(NonResumableSnapshotPartition::new(
                Arc::clone(&self.dialect),
                stream.clone(),
            ))));
        }
        let pk = stream.primary_key.clone();
        let lower = lower.and_then(|(_, v)| v).map(|v| vec![v]);
        Ok(Some(Box::new(PkRangeSnapshotPartition::new(
            Arc::clone(&self.dialect),
            stream.clone(),
            pk,
            lower,
            None,
        ))))
    }

    async fn cursor_incremental(
        &self,
        stream: &Stream,
        last: Option<&OpaqueState>,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        let cursor = stream.cursor.clone().ok_or_else(|| {
            ExtractError::Config(format!(
                "stream `{}` is cursor-incremental but has no cursor field",
                stream.id()
            ))
        })?;

        let Some(state) = last else {
            return self.cursor_cold_start(stream, &cursor).await;
        };
        match state {
            // Mid-snapshot, with the frozen cursor bound riding along.
            OpaqueState::PrimaryKey { pk_name: Some(name), pk_val, incremental } => {
                let frozen = match incremental.as_deref() {
                    Some(OpaqueState::CursorBased { cursor: Some(c), .. }) => Some(c.clone()),
                    _ => None,
                };
                self.resume_snapshot_with_cursor(stream, &cursor, name, pk_val.as_deref(), frozen)
                    .await
            }
            // Snapshot finished, cursor handoff still pending.
            OpaqueState::PrimaryKey { pk_name: None, incremental, .. } => {
                match incremental.as_deref() {
                    Some(OpaqueState::CursorBased { cursor: Some(c), .. }) => {
                        self.cursor_window(stream, &cursor, c).await
                    }
                    _ => {
                        warn!(
                            stream = %stream.id(),
                            "completed snapshot carries no cursor handoff; starting over"
                        );
                        self.cursor_cold_start(stream, &cursor).await
                    }
                }
            }
            // Retired mid-snapshot shape: cursor document with scan
            // position in the pk fields.
            OpaqueState::CursorBased { pk_name: Some(name), pk_val, cursor: frozen, .. } => {
                self.resume_snapshot_with_cursor(
                    stream,
                    &cursor,
                    name,
                    pk_val.as_deref(),
                    frozen.clone(),
                )
                .await
            }
            OpaqueState::CursorBased { pk_name: None, cursor: Some(c), .. } => {
                self.cursor_window(stream, &cursor, c).await
            }
            OpaqueState::CursorBased { pk_name: None, cursor: None, .. } => {
                self.cursor_cold_start(stream, &cursor).await
            }
        }
    }

    async fn cursor_cold_start(
        &self,
        stream: &Stream,
        cursor: &Field,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        let Some(upper) = self.querier.max_value(stream, cursor).await? else {
            // Empty table, or the cursor column is all null. There is
            // no bound to freeze yet; try again next sync.
            return Ok(None);
        };
        if !stream.primary_key.is_empty() {
            return Ok(Some(Box::new(SnapshotWithCursorPartition::new(
                Arc::clone(&self.dialect),
                stream.clone(),
                stream.primary_key.clone(),
                None,
                cursor.clone(),
                upper,
            ))));
        }
        // No scan key to snapshot on. A cursor column is not unique, so
        // slicing by cursor value would drop rows tied at a slice
        // boundary; read the whole table in one pass instead.
        Ok(Some(Box::new(NonResumableSnapshotWithCursorPartition::new(
            Arc::clone(&self.dialect),
            stream.clone(),
            cursor.clone(),
            upper,
        ))))
    }

    async fn resume_snapshot_with_cursor(
        &self,
        stream: &Stream,
        cursor: &Field,
        pk_name: &str,
        pk_val: Option<&str>,
        frozen_upper: Option<String>,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        let pk = self.checkpoint_field(stream, pk_name)?;
        let upper = match frozen_upper {
            Some(raw) => cursor.decode_state_value(&raw)?,
            None => {
                warn!(
                    stream = %stream.id(),
                    "mid-snapshot checkpoint lost its cursor bound; re-freezing from the source"
                );
                match self.querier.max_value(stream, cursor).await? {
                    Some(v) => v,
                    None => return Ok(None),
                }
            }
        };
        let lower = self.decode_checkpoint(&pk, pk_val)?;
        Ok(Some(Box::new(SnapshotWithCursorPartition::new(
            Arc::clone(&self.dialect),
            stream.clone(),
            vec![pk],
            lower.map(|v| vec![v]),
            cursor.clone(),
            upper,
        ))))
    }

    async fn cursor_window(
        &self,
        stream: &Stream,
        cursor: &Field,
        saved: &str,
    ) -> Result<Option<Box<dyn Partition>>, ExtractError> {
        let lower = cursor.decode_state_value(saved)?;
        if lower.is_null() {
            return self.cursor_cold_start(stream, cursor).await;
        }
        let Some(upper) = self.querier.max_value(stream, cursor).await? else {
            return Ok(None);
        };
        if upper.to_state_string().as_deref() == Some(saved) {
            // Caught up; no new rows past the checkpoint.
            return Ok(None);
        }
        Ok(Some(Box::new(CursorIncrementalPartition::new(
            Arc::clone(&self.dialect),
            stream.clone(),
            cursor.clone(),
            lower,
            false,
            upper,
        ))))
    }

    fn checkpoint_field(&self, stream: &Stream, name: &str) -> Result<Field, ExtractError> {
        stream.field(name).cloned().ok_or_else(|| {
            ExtractError::Config(format!(
                "checkpoint column `{name}` is not declared on stream `{}`",
                stream.id()
            ))
        })
    }

    fn decode_checkpoint(
        &self,
        field: &Field,
        raw: Option<&str>,
    ) -> Result<Option<Value>, ExtractError> {
        match raw {
            None => Ok(None),
            Some(raw) => {
                let value = field.decode_state_value(raw)?;
                Ok(if value.is_null() { None } else { Some(value) })
            }
        }
    }
}
