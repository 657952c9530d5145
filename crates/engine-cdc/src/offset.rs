use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use engine_core::error::ExtractError;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::warn;

use crate::position::Lsn;

/// Serialized schema histories above this size are gzip-compressed
/// before being base64-encoded into the state document.
pub const MAX_UNCOMPRESSED_HISTORY: usize = 1024 * 1024;

/// The log engine's offset map: serialized identity key to serialized
/// position value, both JSON-in-a-string exactly as the engine emits
/// them. Normally a single entry; old checkpoints written before
/// database-name casing was normalized can carry several.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CdcOffset {
    pub entries: BTreeMap<String, String>,
}

impl CdcOffset {
    /// Builds a fresh offset at `position`, keyed by the source
    /// identity tuple, with the snapshot flags set so the log engine
    /// treats history before the watermark as already captured.
    pub fn cold_start(database: &str, position: Lsn) -> Self {
        let key = serde_json::json!([database, { "server": database }]).to_string();
        let value = serde_json::json!({
            "commit_lsn": position.to_hex(),
            "snapshot": true,
            "snapshot_completed": true,
        })
        .to_string();
        let mut entries = BTreeMap::new();
        entries.insert(key, value);
        CdcOffset { entries }
    }

    /// The log position of the single live entry.
    pub fn position(&self) -> Result<Lsn, ExtractError> {
        let (_, value) = self.entries.iter().next().ok_or_else(|| {
            ExtractError::StateParse("offset document has no entries".into())
        })?;
        Self::value_position(value)
    }

    /// Collapses a multi-entry offset to the entry with the greatest
    /// position. Returns true when entries were dropped.
    pub fn retain_greatest(&mut self) -> Result<bool, ExtractError> {
        if self.entries.len() <= 1 {
            return Ok(false);
        }
        let mut best: Option<(String, String, Lsn)> = None;
        for (key, value) in &self.entries {
            let pos = Self::value_position(value)?;
            if best.as_ref().is_none_or(|(_, _, p)| pos > *p) {
                best = Some((key.clone(), value.clone(), pos));
            }
        }
        let (key, value, pos) = best.ok_or_else(|| {
            ExtractError::StateParse("offset document has no entries".into())
        })?;
        warn!(
            kept = %pos,
            dropped = self.entries.len() - 1,
            "offset document carried multiple entries; keeping the greatest position"
        );
        self.entries.clear();
        self.entries.insert(key, value);
        Ok(true)
    }

    fn value_position(value: &str) -> Result<Lsn, ExtractError> {
        let parsed: serde_json::Value = serde_json::from_str(value)?;
        let raw = parsed
            .get("commit_lsn")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ExtractError::StateParse(format!("offset value `{value}` has no commit_lsn"))
            })?;
        Lsn::from_hex(raw)
    }
}

/// Ordered structural-change records the log engine needs to
/// interpret historical events. One serialized document per line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaHistory {
    pub records: Vec<String>,
}

impl SchemaHistory {
    fn serialize(&self) -> Result<(String, bool), ExtractError> {
        let joined = self.records.join("\n");
        if joined.len() <= MAX_UNCOMPRESSED_HISTORY {
            return Ok((joined, false));
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(joined.as_bytes())
            .and_then(|_| encoder.finish())
            .map(|compressed| (BASE64.encode(compressed), true))
            .map_err(|e| ExtractError::StateParse(format!("schema history compression: {e}")))
    }

    fn deserialize(raw: &str, compressed: bool) -> Result<Self, ExtractError> {
        let joined = if compressed {
            let bytes = BASE64.decode(raw).map_err(|e| {
                ExtractError::StateParse(format!("schema history base64: {e}"))
            })?;
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut out = String::new();
            decoder.read_to_string(&mut out).map_err(|e| {
                ExtractError::StateParse(format!("schema history decompression: {e}"))
            })?;
            out
        } else {
            raw.to_string()
        };
        let records = joined
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(SchemaHistory { records })
    }
}

/// The durable change-capture checkpoint: offset plus, when the log
/// engine tracks schema evolution, its history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdcState {
    pub offset: CdcOffset,
    pub history: Option<SchemaHistory>,
}

impl CdcState {
    pub fn to_document(&self) -> Result<serde_json::Value, ExtractError> {
        let offset: serde_json::Map<String, serde_json::Value> = self
            .offset
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let mut state = serde_json::Map::new();
        state.insert("cdc_offset".into(), serde_json::Value::Object(offset));
        if let Some(history) = &self.history {
            let (raw, compressed) = history.serialize()?;
            state.insert("db_history".into(), serde_json::Value::String(raw));
            state.insert("is_compressed".into(), serde_json::Value::Bool(compressed));
        }
        Ok(serde_json::json!({ "state": state }))
    }

    pub fn from_document(doc: &serde_json::Value) -> Result<Self, ExtractError> {
        let state = doc.get("state").and_then(|s| s.as_object()).ok_or_else(|| {
            ExtractError::StateParse("change-capture document has no `state` object".into())
        })?;
        let raw_offset = state
            .get("cdc_offset")
            .and_then(|o| o.as_object())
            .ok_or_else(|| {
                ExtractError::StateParse("change-capture document has no `cdc_offset`".into())
            })?;
        let mut entries = BTreeMap::new();
        for (key, value) in raw_offset {
            let value = value.as_str().ok_or_else(|| {
                ExtractError::StateParse(format!("offset entry `{key}` is not a string"))
            })?;
            entries.insert(key.clone(), value.to_string());
        }
        let history = match state.get("db_history").and_then(|h| h.as_str()) {
            Some(raw) => {
                let compressed = state
                    .get("is_compressed")
                    .and_then(|c| c.as_bool())
                    .unwrap_or(false);
                Some(SchemaHistory::deserialize(raw, compressed)?)
            }
            None => None,
        };
        Ok(CdcState { offset: CdcOffset { entries }, history })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lsn(raw: &str) -> Lsn {
        Lsn::from_hex(raw).unwrap()
    }

    #[test]
    fn cold_start_offset_carries_snapshot_flags() {
        let offset = CdcOffset::cold_start("inventory", lsn("00000020:000000f8:0003"));
        assert_eq!(offset.entries.len(), 1);
        let (key, value) = offset.entries.iter().next().unwrap();
        assert_eq!(key, r#"["inventory",{"server":"inventory"}]"#);
        let value: serde_json::Value = serde_json::from_str(value).unwrap();
        assert_eq!(value["commit_lsn"], "00000020:000000f8:0003");
        assert_eq!(value["snapshot"], true);
        assert_eq!(value["snapshot_completed"], true);
        assert_eq!(offset.position().unwrap(), lsn("00000020:000000f8:0003"));
    }

    #[test]
    fn multi_entry_offset_keeps_the_greatest_position() {
        let mut offset = CdcOffset::cold_start("INVENTORY", lsn("00000030:00000000:0000"));
        offset.entries.extend(
            CdcOffset::cold_start("inventory", lsn("00000020:00000000:0000")).entries,
        );
        assert_eq!(offset.entries.len(), 2);
        assert!(offset.retain_greatest().unwrap());
        assert_eq!(offset.position().unwrap(), lsn("00000030:00000000:0000"));
    }

    #[test]
    fn state_round_trips_with_plain_history() {
        let state = CdcState {
            offset: CdcOffset::cold_start("inventory", lsn("00000020:000000f8:0003")),
            history: Some(SchemaHistory {
                records: vec![r#"{"ddl":"CREATE TABLE t"}"#.into(), r#"{"ddl":"ALTER TABLE t"}"#.into()],
            }),
        };
        let doc = state.to_document().unwrap();
        assert_eq!(doc["state"]["is_compressed"], false);
        assert_eq!(CdcState::from_document(&doc).unwrap(), state);
    }

    #[test]
    fn oversized_history_is_compressed_and_round_trips() {
        let big = "x".repeat(4096);
        let records: Vec<String> = (0..512).map(|i| format!("{{\"n\":{i},\"pad\":\"{big}\"}}")).collect();
        let state = CdcState {
            offset: CdcOffset::cold_start("inventory", lsn("00000020:000000f8:0003")),
            history: Some(SchemaHistory { records }),
        };
        let doc = state.to_document().unwrap();
        assert_eq!(doc["state"]["is_compressed"], true);
        assert_eq!(CdcState::from_document(&doc).unwrap(), state);
    }

    #[test]
    fn state_without_history_round_trips() {
        let state = CdcState {
            offset: CdcOffset::cold_start("inventory", lsn("00000020:000000f8:0003")),
            history: None,
        };
        let doc = state.to_document().unwrap();
        assert!(doc["state"].get("db_history").is_none());
        assert_eq!(CdcState::from_document(&doc).unwrap(), state);
    }
}
