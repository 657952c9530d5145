use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use engine_core::error::ExtractError;
use tracing::{info, warn};

use crate::offset::{CdcOffset, CdcState};
use crate::position::Lsn;

/// Source-side log metadata lookups the manager needs.
#[async_trait]
pub trait LogQuerier: Send + Sync {
    /// Current end of the change log. `None` when change capture is
    /// not enabled on the source.
    async fn max_position(&self) -> Result<Option<Lsn>, ExtractError>;

    /// Oldest position still retained. `None` when the log is empty.
    async fn min_position(&self) -> Result<Option<Lsn>, ExtractError>;
}

/// What to do when the saved position has fallen out of the retained
/// log window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPositionPolicy {
    /// Abort with an actionable error; an operator must intervene.
    FailSync,
    /// Start over from a fresh cold-start offset. Changes between the
    /// stale position and the new watermark are skipped for good.
    ResetSync,
}

/// Lifecycle of the change-capture phase for one sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcPhase {
    ColdStart,
    Validating,
    Streaming,
    Aborted,
    Reset,
}

impl fmt::Display for CdcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CdcPhase::ColdStart => "cold_start",
            CdcPhase::Validating => "validating",
            CdcPhase::Streaming => "streaming",
            CdcPhase::Aborted => "aborted",
            CdcPhase::Reset => "reset",
        };
        write!(f, "{name}")
    }
}

/// How the log engine should be launched for this sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    /// No prior offset; snapshot first, then tail from the watermark.
    Snapshot,
    /// Valid prior offset; resume tailing where it left off.
    Resume,
    /// Prior offset was stale and the reset policy applied.
    Resync,
}

/// A validated change-capture checkpoint plus how to launch from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdcLaunch {
    pub state: CdcState,
    pub kind: LaunchKind,
}

/// Owns log-position bookkeeping for one source database: cold-start
/// construction, warm-start validation against retention, and the
/// pre-persist sanitization pass.
pub struct OffsetManager {
    querier: Arc<dyn LogQuerier>,
    database: String,
    policy: InvalidPositionPolicy,
}

impl OffsetManager {
    pub fn new(
        querier: Arc<dyn LogQuerier>,
        database: impl Into<String>,
        policy: InvalidPositionPolicy,
    ) -> Self {
        OffsetManager { querier, database: database.into(), policy }
    }

    /// Resolves the saved offset document into a launchable state,
    /// walking cold start or warm-start validation as appropriate.
    pub async fn acquire(
        &self,
        saved: Option<&serde_json::Value>,
    ) -> Result<CdcLaunch, ExtractError> {
        let Some(doc) = saved else {
            info!(database = %self.database, phase = %CdcPhase::ColdStart, "no saved offset");
            let state = self.cold_start().await?;
            return Ok(CdcLaunch { state, kind: LaunchKind::Snapshot });
        };

        info!(database = %self.database, phase = %CdcPhase::Validating, "validating saved offset");
        let mut state = CdcState::from_document(doc)?;
        state.offset.retain_greatest()?;
        let position = state.offset.position()?;

        let retained_min = self.querier.min_position().await?;
        let stale = match retained_min {
            Some(min) => position < min,
            // An empty log cannot contain the saved position.
            None => true,
        };
        if !stale {
            info!(
                database = %self.database,
                position = %position,
                phase = %CdcPhase::Streaming,
                "saved offset is inside the retained window"
            );
            return Ok(CdcLaunch { state, kind: LaunchKind::Resume });
        }

        match self.policy {
            InvalidPositionPolicy::FailSync => {
                info!(database = %self.database, phase = %CdcPhase::Aborted, "stale offset");
                Err(ExtractError::StaleCheckpoint {
                    stream: self.database.clone(),
                    position: position.to_hex(),
                })
            }
            InvalidPositionPolicy::ResetSync => {
                warn!(
                    database = %self.database,
                    stale_position = %position,
                    phase = %CdcPhase::Reset,
                    "saved offset fell out of the retained log window; resetting. \
                     Changes between the stale position and the new watermark are lost"
                );
                let state = self.cold_start().await?;
                Ok(CdcLaunch { state, kind: LaunchKind::Resync })
            }
        }
    }

    /// Builds a fresh offset at the source's current watermark.
    pub async fn cold_start(&self) -> Result<CdcState, ExtractError> {
        let position = self.querier.max_position().await?.ok_or_else(|| {
            ExtractError::Config(format!(
                "change capture is not enabled on database `{}`",
                self.database
            ))
        })?;
        info!(database = %self.database, watermark = %position, "constructed cold-start offset");
        Ok(CdcState {
            offset: CdcOffset::cold_start(&self.database, position),
            history: None,
        })
    }

    /// Repairs heartbeat-corrupted offsets immediately before they are
    /// persisted. A heartbeat can emit an offset whose position is
    /// still exactly the start-of-run position but whose
    /// `event_serial_no` and `change_lsn` fields have reverted to
    /// empty sentinels; persisting that would re-emit events on the
    /// next run. Repair applies only when the position is unchanged:
    /// a position that moved, in either direction, is not a heartbeat
    /// echo of the start offset and is passed through as-is.
    pub fn sanitize(
        &self,
        start: &CdcOffset,
        mut candidate: CdcOffset,
    ) -> Result<CdcOffset, ExtractError> {
        let start_position = start.position()?;
        let candidate_position = candidate.position()?;
        if candidate_position != start_position {
            return Ok(candidate);
        }

        let Some((start_key, start_value)) = start.entries.iter().next() else {
            return Ok(candidate);
        };
        let start_parsed: serde_json::Value = serde_json::from_str(start_value)?;

        let mut repaired = false;
        for (key, value) in candidate.entries.iter_mut() {
            if key != start_key {
                continue;
            }
            let mut parsed: serde_json::Value = serde_json::from_str(value)?;
            for aux in ["event_serial_no", "change_lsn"] {
                let missing = parsed.get(aux).is_none_or(serde_json::Value::is_null);
                if missing {
                    if let Some(original) = start_parsed.get(aux) {
                        parsed[aux] = original.clone();
                        repaired = true;
                    }
                }
            }
            if repaired {
                *value = parsed.to_string();
            }
        }
        if repaired {
            warn!(
                database = %self.database,
                position = %candidate_position,
                "restored auxiliary offset fields dropped by a heartbeat"
            );
        }
        Ok(candidate)
    }

    /// Flat property map for launching the log engine with no history.
    pub fn cold_start_properties(&self, state: &CdcState) -> Result<BTreeMap<String, String>, ExtractError> {
        let mut props = self.common_properties();
        props.insert("snapshot.mode".into(), "initial".into());
        props.insert("offset.position".into(), state.offset.position()?.to_hex());
        Ok(props)
    }

    /// Flat property map for resuming from a validated offset.
    pub fn warm_start_properties(&self, state: &CdcState) -> Result<BTreeMap<String, String>, ExtractError> {
        let mut props = self.common_properties();
        props.insert("snapshot.mode".into(), "recovery".into());
        props.insert("offset.position".into(), state.offset.position()?.to_hex());
        if let Some(history) = &state.history {
            props.insert(
                "schema.history.record.count".into(),
                history.records.len().to_string(),
            );
        }
        Ok(props)
    }

    fn common_properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::new();
        props.insert("database.names".into(), self.database.clone());
        props.insert("offset.flush.interval.ms".into(), "1000".into());
        props.insert("heartbeat.interval.ms".into(), "10000".into());
        props
    }
}
