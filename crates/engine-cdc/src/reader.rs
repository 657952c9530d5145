use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use engine_core::error::ExtractError;
use engine_core::source::RowSink;
use model::core::value::Value;
use model::records::row::Row;
use model::stream::Stream;
use tracing::{debug, info};

use crate::position::Lsn;

/// Transaction time of the change, from the event envelope.
pub const META_UPDATED_AT: &str = "_cdc_updated_at";
/// Set only for deletes, to the same transaction time.
pub const META_DELETED_AT: &str = "_cdc_deleted_at";
/// Commit position of the change in the source log.
pub const META_LSN: &str = "_cdc_lsn";
/// Synthetic strictly increasing sequence number. Two changes can
/// share a commit position and would otherwise be unorderable.
pub const META_SEQ: &str = "_cdc_seq";

/// Decodes raw log events into typed rows for the declared streams.
pub struct CdcRecordDecoder {
    streams: HashMap<(String, String), Stream>,
    sequence: AtomicU64,
}

impl CdcRecordDecoder {
    pub fn new(streams: impl IntoIterator<Item = Stream>) -> Self {
        let streams = streams
            .into_iter()
            .map(|s| ((s.namespace.clone().unwrap_or_default(), s.name.clone()), s))
            .collect();
        CdcRecordDecoder { streams, sequence: AtomicU64::new(0) }
    }

    /// Decodes one event. `None` for heartbeats and events on tables
    /// outside the catalog.
    pub fn decode(&self, event: &serde_json::Value) -> Result<Option<(&Stream, Row)>, ExtractError> {
        let source = match event.get("source") {
            Some(s) if s.is_object() => s,
            // Heartbeats carry no source block.
            _ => return Ok(None),
        };
        let table = source.get("table").and_then(|t| t.as_str()).unwrap_or_default();
        let schema = source.get("schema").and_then(|s| s.as_str()).unwrap_or_default();
        let Some(stream) = self.streams.get(&(schema.to_string(), table.to_string())) else {
            debug!(schema, table, "skipping event for undeclared table");
            return Ok(None);
        };

        // Deletes carry a null after-image; emit the before-image.
        let after = event.get("after").filter(|v| !v.is_null());
        let deleted = after.is_none();
        let image = match after.or_else(|| event.get("before").filter(|v| !v.is_null())) {
            Some(image) => image,
            None => {
                return Err(ExtractError::StateParse(format!(
                    "event for `{schema}.{table}` has neither a before nor an after image"
                )));
            }
        };

        let mut row = Row::default();
        for field in &stream.fields {
            let raw = image.get(&field.name).cloned().unwrap_or(serde_json::Value::Null);
            row.push(&field.name, field.decode_log_value(&raw));
        }

        let ts = event
            .get("ts_ms")
            .and_then(|t| t.as_i64())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Value::Timestamp)
            .unwrap_or(Value::Null);
        row.push(META_UPDATED_AT, ts.clone());
        row.push(META_DELETED_AT, if deleted { ts } else { Value::Null });
        let lsn = source
            .get("commit_lsn")
            .and_then(|l| l.as_str())
            .map(|l| Value::String(l.to_string()))
            .unwrap_or(Value::Null);
        row.push(META_LSN, lsn);
        row.push(
            META_SEQ,
            Value::Uint(self.sequence.fetch_add(1, Ordering::Relaxed) + 1),
        );
        Ok(Some((stream, row)))
    }
}

/// Outcome of feeding one raw event to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcReadOutcome {
    Emitted,
    Skipped,
    /// The event lies past the watermark; the bounded read is done.
    ReachedWatermark,
}

/// Consumes raw log events up to a watermark frozen at sync start and
/// forwards decoded rows to the sink. The log has one global order,
/// so there is exactly one reader per sync.
pub struct CdcPartitionReader {
    decoder: CdcRecordDecoder,
    sink: Arc<dyn RowSink>,
    watermark: Lsn,
    emitted: AtomicU64,
}

impl CdcPartitionReader {
    pub fn new(decoder: CdcRecordDecoder, sink: Arc<dyn RowSink>, watermark: Lsn) -> Self {
        CdcPartitionReader { decoder, sink, watermark, emitted: AtomicU64::new(0) }
    }

    pub async fn process(&self, event: &serde_json::Value) -> Result<CdcReadOutcome, ExtractError> {
        if let Some(position) = Self::event_position(event)? {
            if position > self.watermark {
                info!(
                    position = %position,
                    watermark = %self.watermark,
                    emitted = self.emitted.load(Ordering::Relaxed),
                    "reached the watermark"
                );
                return Ok(CdcReadOutcome::ReachedWatermark);
            }
        }
        let Some((stream, row)) = self.decoder.decode(event)? else {
            return Ok(CdcReadOutcome::Skipped);
        };
        self.sink.accept(stream, row).await?;
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(CdcReadOutcome::Emitted)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    fn event_position(event: &serde_json::Value) -> Result<Option<Lsn>, ExtractError> {
        match event
            .get("source")
            .and_then(|s| s.get("commit_lsn"))
            .and_then(|l| l.as_str())
        {
            Some(raw) => Lsn::from_hex(raw).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use model::core::data_type::DataType;
    use model::stream::{Field, SyncMode};
    use std::sync::Mutex;

    use super::*;

    fn users_stream() -> Stream {
        Stream {
            name: "users".into(),
            namespace: Some("dbo".into()),
            fields: vec![
                Field::new("id", DataType::BigInt),
                Field::new("name", DataType::VarChar),
            ],
            primary_key: vec![Field::new("id", DataType::BigInt)],
            cursor: None,
            sync_mode: SyncMode::Cdc,
        }
    }

    fn update_event(id: i64, lsn: &str) -> serde_json::Value {
        serde_json::json!({
            "op": "u",
            "ts_ms": 1717243200000i64,
            "before": { "id": id, "name": "old" },
            "after": { "id": id, "name": "new" },
            "source": { "schema": "dbo", "table": "users", "commit_lsn": lsn },
        })
    }

    #[test]
    fn meta_fields_keep_their_wire_names() {
        // Downstream consumers key on these literal column names.
        assert_eq!(META_UPDATED_AT, "_cdc_updated_at");
        assert_eq!(META_DELETED_AT, "_cdc_deleted_at");
        assert_eq!(META_LSN, "_cdc_lsn");
        assert_eq!(META_SEQ, "_cdc_seq");
    }

    #[test]
    fn update_uses_the_after_image() {
        let decoder = CdcRecordDecoder::new([users_stream()]);
        let (_, row) = decoder
            .decode(&update_event(7, "00000020:00000000:0001"))
            .unwrap()
            .unwrap();
        assert_eq!(row.get_value("id"), Value::Int(7));
        assert_eq!(row.get_value("name"), Value::String("new".into()));
        assert_eq!(row.get_value(META_DELETED_AT), Value::Null);
        match row.get_value(META_UPDATED_AT) {
            Value::Timestamp(ts) => assert_eq!(ts.timestamp_millis(), 1717243200000),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn delete_uses_the_before_image_and_sets_deleted_at() {
        let decoder = CdcRecordDecoder::new([users_stream()]);
        let event = serde_json::json!({
            "op": "d",
            "ts_ms": 1717243200000i64,
            "before": { "id": 7, "name": "gone" },
            "after": null,
            "source": { "schema": "dbo", "table": "users", "commit_lsn": "00000020:00000000:0002" },
        });
        let (_, row) = decoder.decode(&event).unwrap().unwrap();
        assert_eq!(row.get_value("name"), Value::String("gone".into()));
        assert_ne!(row.get_value(META_DELETED_AT), Value::Null);
    }

    #[test]
    fn stringified_numbers_decode_and_sequence_increases() {
        let decoder = CdcRecordDecoder::new([users_stream()]);
        let event = serde_json::json!({
            "op": "c",
            "ts_ms": 1717243200000i64,
            "after": { "id": "42", "name": "s" },
            "source": { "schema": "dbo", "table": "users", "commit_lsn": "00000020:00000000:0003" },
        });
        let (_, first) = decoder.decode(&event).unwrap().unwrap();
        let (_, second) = decoder.decode(&event).unwrap().unwrap();
        assert_eq!(first.get_value("id"), Value::Int(42));
        assert_eq!(first.get_value(META_SEQ), Value::Uint(1));
        assert_eq!(second.get_value(META_SEQ), Value::Uint(2));
    }

    #[test]
    fn heartbeats_and_undeclared_tables_are_skipped() {
        let decoder = CdcRecordDecoder::new([users_stream()]);
        assert!(decoder.decode(&serde_json::json!({ "op": "m" })).unwrap().is_none());
        let foreign = serde_json::json!({
            "op": "c",
            "after": { "x": 1 },
            "source": { "schema": "dbo", "table": "audit_log", "commit_lsn": "00000020:00000000:0004" },
        });
        assert!(decoder.decode(&foreign).unwrap().is_none());
    }

    struct CollectingSink {
        rows: Mutex<Vec<Row>>,
    }

    #[async_trait]
    impl RowSink for CollectingSink {
        async fn accept(&self, _stream: &Stream, row: Row) -> Result<(), ExtractError> {
            self.rows.lock().unwrap().push(row);
            Ok(())
        }
    }

    #[tokio::test]
    async fn reader_stops_at_the_watermark() {
        let sink = Arc::new(CollectingSink { rows: Mutex::new(Vec::new()) });
        let reader = CdcPartitionReader::new(
            CdcRecordDecoder::new([users_stream()]),
            sink.clone(),
            Lsn::from_hex("00000020:00000000:0002").unwrap(),
        );

        let inside = reader.process(&update_event(1, "00000020:00000000:0001")).await.unwrap();
        assert_eq!(inside, CdcReadOutcome::Emitted);
        let at = reader.process(&update_event(2, "00000020:00000000:0002")).await.unwrap();
        assert_eq!(at, CdcReadOutcome::Emitted);
        let past = reader.process(&update_event(3, "00000020:00000000:0003")).await.unwrap();
        assert_eq!(past, CdcReadOutcome::ReachedWatermark);

        assert_eq!(reader.emitted(), 2);
        assert_eq!(sink.rows.lock().unwrap().len(), 2);
    }
}
