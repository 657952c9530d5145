use std::sync::Arc;

use model::core::value::Value;
use model::records::row::Row;
use model::stream::{Field, Stream};
use query::ast::select::{From, Projection, Select};
use query::dialect::Dialect;
use query::{SelectQuery, generate};

use crate::error::ExtractError;
use crate::partition::{Partition, bound_predicate, row_bound};
use crate::state::OpaqueState;

/// Initial snapshot of a cursor-incremental stream, scanned by primary
/// key. The cursor upper bound is frozen at snapshot start; when the
/// scan finishes the stream hands off to cursor reads from that bound.
pub struct SnapshotWithCursorPartition {
    dialect: Arc<dyn Dialect>,
    stream: Stream,
    pk: Vec<Field>,
    lower: Option<Vec<Value>>,
    cursor: Field,
    cursor_upper_bound: Value,
}

impl SnapshotWithCursorPartition {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        stream: Stream,
        pk: Vec<Field>,
        lower: Option<Vec<Value>>,
        cursor: Field,
        cursor_upper_bound: Value,
    ) -> Self {
        SnapshotWithCursorPartition { dialect, stream, pk, lower, cursor, cursor_upper_bound }
    }

    fn base_select(&self) -> Select {
        Select::new(
            Projection::Columns(self.stream.fields.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref()),
        )
        .with_where(bound_predicate(&self.pk, self.lower.as_deref(), false, None))
        .with_order_by(self.pk.clone())
    }
}

impl Partition for SnapshotWithCursorPartition {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn full_query(&self) -> SelectQuery {
        generate(&self.base_select().optimize(), self.dialect.as_ref())
    }

    fn resumable_query(&self, limit: u64) -> Option<SelectQuery> {
        Some(generate(
            &self.base_select().with_limit(limit).optimize(),
            self.dialect.as_ref(),
        ))
    }

    fn sampling_query(&self, rate_inv_pow2: u32, sample_size: u64) -> SelectQuery {
        let select = Select::new(
            Projection::Columns(self.pk.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref())
                .with_sample(rate_inv_pow2),
        )
        .with_order_by(self.pk.clone())
        .with_limit(sample_size);
        generate(&select.optimize(), self.dialect.as_ref())
    }

    fn complete_state(&self) -> OpaqueState {
        OpaqueState::cursor_checkpoint(&self.cursor, &self.cursor_upper_bound)
    }

    fn incomplete_state(&self, last_row: &Row) -> Result<Option<OpaqueState>, ExtractError> {
        let bound = row_bound(last_row, &self.pk)?;
        Ok(Some(OpaqueState::snapshot_with_cursor_checkpoint(
            &self.pk[0],
            &bound[0],
            &self.cursor,
            &self.cursor_upper_bound,
        )))
    }
}

/// Initial snapshot of a cursor-incremental stream with no usable scan
/// key. Cursor columns are not unique, so slicing the table by cursor
/// value could drop rows that tie at a slice boundary; the whole table
/// is read in one pass instead. Cannot checkpoint mid-way; a restart
/// re-reads everything. The handoff bound is still frozen at snapshot
/// start.
pub struct NonResumableSnapshotWithCursorPartition {
    dialect: Arc<dyn Dialect>,
    stream: Stream,
    cursor: Field,
    cursor_upper_bound: Value,
}

impl NonResumableSnapshotWithCursorPartition {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        stream: Stream,
        cursor: Field,
        cursor_upper_bound: Value,
    ) -> Self {
        NonResumableSnapshotWithCursorPartition { dialect, stream, cursor, cursor_upper_bound }
    }
}

impl Partition for NonResumableSnapshotWithCursorPartition {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn full_query(&self) -> SelectQuery {
        let select = Select::new(
            Projection::Columns(self.stream.fields.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref()),
        );
        generate(&select, self.dialect.as_ref())
    }

    fn resumable_query(&self, _limit: u64) -> Option<SelectQuery> {
        None
    }

    fn sampling_query(&self, rate_inv_pow2: u32, sample_size: u64) -> SelectQuery {
        let select = Select::new(
            Projection::Columns(self.stream.fields.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref())
                .with_sample(rate_inv_pow2),
        )
        .with_limit(sample_size);
        generate(&select, self.dialect.as_ref())
    }

    fn complete_state(&self) -> OpaqueState {
        OpaqueState::cursor_checkpoint(&self.cursor, &self.cursor_upper_bound)
    }

    fn incomplete_state(&self, _last_row: &Row) -> Result<Option<OpaqueState>, ExtractError> {
        Ok(None)
    }
}

/// Incremental read of the cursor window `(lower, upper]`. The lower
/// bound is inclusive only for the very first partition of a stream,
/// where it is the global cursor minimum.
pub struct CursorIncrementalPartition {
    dialect: Arc<dyn Dialect>,
    stream: Stream,
    cursor: Field,
    lower: Value,
    include_lower: bool,
    upper: Value,
}

impl CursorIncrementalPartition {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        stream: Stream,
        cursor: Field,
        lower: Value,
        include_lower: bool,
        upper: Value,
    ) -> Self {
        CursorIncrementalPartition { dialect, stream, cursor, lower, include_lower, upper }
    }

    fn base_select(&self) -> Select {
        let cursor_cols = std::slice::from_ref(&self.cursor);
        Select::new(
            Projection::Columns(self.stream.fields.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref()),
        )
        .with_where(bound_predicate(
            cursor_cols,
            Some(std::slice::from_ref(&self.lower)),
            self.include_lower,
            Some(std::slice::from_ref(&self.upper)),
        ))
        .with_order_by(vec![self.cursor.clone()])
    }
}

impl Partition for CursorIncrementalPartition {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn full_query(&self) -> SelectQuery {
        generate(&self.base_select().optimize(), self.dialect.as_ref())
    }

    fn resumable_query(&self, limit: u64) -> Option<SelectQuery> {
        Some(generate(
            &self.base_select().with_limit(limit).optimize(),
            self.dialect.as_ref(),
        ))
    }

    fn sampling_query(&self, rate_inv_pow2: u32, sample_size: u64) -> SelectQuery {
        let select = Select::new(
            Projection::Columns(vec![self.cursor.clone()]),
            From::new(&self.stream.name, self.stream.namespace.as_deref())
                .with_sample(rate_inv_pow2),
        )
        .with_order_by(vec![self.cursor.clone()])
        .with_limit(sample_size);
        generate(&select.optimize(), self.dialect.as_ref())
    }

    fn complete_state(&self) -> OpaqueState {
        OpaqueState::cursor_checkpoint(&self.cursor, &self.upper)
    }

    fn incomplete_state(&self, last_row: &Row) -> Result<Option<OpaqueState>, ExtractError> {
        let bound = row_bound(last_row, std::slice::from_ref(&self.cursor))?;
        Ok(Some(OpaqueState::cursor_checkpoint(&self.cursor, &bound[0])))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;
    use model::core::data_type::DataType;
    use model::stream::SyncMode;
    use query::dialect::{Postgres, SqlServer};

    use super::*;

    fn orders_stream() -> Stream {
        let id = Field::new("id", DataType::BigInt);
        let updated = Field::new("updated_at", DataType::Timestamp);
        Stream {
            name: "orders".into(),
            namespace: Some("dbo".into()),
            fields: vec![id.clone(), updated.clone()],
            primary_key: vec![id],
            cursor: Some(updated),
            sync_mode: SyncMode::CursorIncremental,
        }
    }

    fn ts(s: &str) -> Value {
        let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap();
        Value::Timestamp(naive.and_utc())
    }

    #[test]
    fn snapshot_with_cursor_completes_to_the_frozen_bound() {
        let stream = orders_stream();
        let cursor = stream.cursor.clone().unwrap();
        let pk = stream.primary_key.clone();
        let p = SnapshotWithCursorPartition::new(
            Arc::new(SqlServer),
            stream,
            pk,
            None,
            cursor.clone(),
            ts("2024-06-01T00:00:00"),
        );
        assert_eq!(
            p.complete_state(),
            OpaqueState::CursorBased {
                cursor_field: vec!["updated_at".into()],
                cursor: Some("2024-06-01T00:00:00+00:00".into()),
                pk_name: None,
                pk_val: None,
            }
        );
    }

    #[test]
    fn snapshot_with_cursor_checkpoint_keeps_the_frozen_bound() {
        let stream = orders_stream();
        let cursor = stream.cursor.clone().unwrap();
        let pk = stream.primary_key.clone();
        let p = SnapshotWithCursorPartition::new(
            Arc::new(SqlServer),
            stream,
            pk,
            None,
            cursor,
            ts("2024-06-01T00:00:00"),
        );

        let mut row = Row::default();
        row.push("id", Value::Int(500));
        row.push("updated_at", ts("2024-05-20T08:00:00"));
        let state = p.incomplete_state(&row).unwrap().unwrap();
        assert_eq!(
            state,
            OpaqueState::PrimaryKey {
                pk_name: Some("id".into()),
                pk_val: Some("500".into()),
                incremental: Some(Box::new(OpaqueState::CursorBased {
                    cursor_field: vec!["updated_at".into()],
                    cursor: Some("2024-06-01T00:00:00+00:00".into()),
                    pk_name: None,
                    pk_val: None,
                })),
            }
        );
    }

    #[test]
    fn keyless_snapshot_reads_the_whole_table_in_one_pass() {
        let mut stream = orders_stream();
        stream.primary_key.clear();
        let cursor = stream.cursor.clone().unwrap();
        let p = NonResumableSnapshotWithCursorPartition::new(
            Arc::new(Postgres),
            stream,
            cursor,
            ts("2024-06-01T00:00:00"),
        );
        assert!(p.resumable_query(1000).is_none());
        assert_eq!(
            p.full_query().sql,
            "SELECT \"id\", \"updated_at\" FROM \"dbo\".\"orders\""
        );
        let mut row = Row::default();
        row.push("id", Value::Int(7));
        row.push("updated_at", ts("2024-05-01T00:00:00"));
        assert!(p.incomplete_state(&row).unwrap().is_none());
    }

    #[test]
    fn keyless_snapshot_hands_off_at_the_frozen_bound() {
        let mut stream = orders_stream();
        stream.primary_key.clear();
        let cursor = stream.cursor.clone().unwrap();
        let p = NonResumableSnapshotWithCursorPartition::new(
            Arc::new(Postgres),
            stream,
            cursor,
            ts("2024-06-01T00:00:00"),
        );
        assert_eq!(
            p.complete_state(),
            OpaqueState::CursorBased {
                cursor_field: vec!["updated_at".into()],
                cursor: Some("2024-06-01T00:00:00+00:00".into()),
                pk_name: None,
                pk_val: None,
            }
        );
    }

    #[test]
    fn cursor_window_renders_half_open_by_default() {
        let stream = orders_stream();
        let cursor = stream.cursor.clone().unwrap();
        let p = CursorIncrementalPartition::new(
            Arc::new(Postgres),
            stream,
            cursor,
            ts("2024-01-01T00:00:00"),
            false,
            ts("2024-02-01T00:00:00"),
        );
        let q = p.resumable_query(1000).unwrap();
        assert_eq!(
            q.sql,
            "SELECT \"id\", \"updated_at\" FROM \"dbo\".\"orders\" \
             WHERE (\"updated_at\" > $1 AND \"updated_at\" <= $2) \
             ORDER BY \"updated_at\" LIMIT 1000"
        );
    }

    #[test]
    fn first_cursor_window_includes_the_minimum() {
        let stream = orders_stream();
        let cursor = stream.cursor.clone().unwrap();
        let p = CursorIncrementalPartition::new(
            Arc::new(Postgres),
            stream,
            cursor,
            ts("2024-01-01T00:00:00"),
            true,
            ts("2024-02-01T00:00:00"),
        );
        let q = p.full_query();
        assert!(q.sql.contains("\"updated_at\" >= $1"));
    }

    #[test]
    fn cursor_checkpoint_follows_the_last_row() {
        let stream = orders_stream();
        let cursor = stream.cursor.clone().unwrap();
        let p = CursorIncrementalPartition::new(
            Arc::new(Postgres),
            stream,
            cursor,
            ts("2024-01-01T00:00:00"),
            false,
            ts("2024-02-01T00:00:00"),
        );

        let mut row = Row::default();
        row.push("id", Value::Int(9));
        row.push("updated_at", ts("2024-01-15T12:00:00"));
        let state = p.incomplete_state(&row).unwrap().unwrap();
        assert_eq!(
            state,
            OpaqueState::CursorBased {
                cursor_field: vec!["updated_at".into()],
                cursor: Some("2024-01-15T12:00:00+00:00".into()),
                pk_name: None,
                pk_val: None,
            }
        );
    }
}
