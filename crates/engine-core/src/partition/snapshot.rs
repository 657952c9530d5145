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

/// Snapshot over a primary-key range, in ascending key order.
///
/// The lower bound is exclusive (it is the last checkpointed key), the
/// upper bound inclusive (it comes from a MAX lookup). An absent upper
/// bound means the scan runs to the end of the table.
#[derive(Clone)]
pub struct PkRangeSnapshotPartition {
    dialect: Arc<dyn Dialect>,
    stream: Stream,
    pk: Vec<Field>,
    lower: Option<Vec<Value>>,
    upper: Option<Vec<Value>>,
}

impl PkRangeSnapshotPartition {
    pub fn new(
        dialect: Arc<dyn Dialect>,
        stream: Stream,
        pk: Vec<Field>,
        lower: Option<Vec<Value>>,
        upper: Option<Vec<Value>>,
    ) -> Self {
        PkRangeSnapshotPartition { dialect, stream, pk, lower, upper }
    }

    fn base_select(&self) -> Select {
        Select::new(
            Projection::Columns(self.stream.fields.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref()),
        )
        .with_where(bound_predicate(
            &self.pk,
            self.lower.as_deref(),
            false,
            self.upper.as_deref(),
        ))
        .with_order_by(self.pk.clone())
    }

    /// Cuts this partition at the given interior boundary keys,
    /// producing one sub-partition per gap. Boundaries are values of
    /// the first key column, typically estimated from a sampling
    /// query. Composite keys are not split.
    pub fn split(&self, boundaries: &[Value]) -> Vec<PkRangeSnapshotPartition> {
        if boundaries.is_empty() || self.pk.len() != 1 {
            return vec![self.clone()];
        }
        let mut parts = Vec::with_capacity(boundaries.len() + 1);
        let mut lower = self.lower.clone();
        for boundary in boundaries {
            parts.push(PkRangeSnapshotPartition {
                dialect: Arc::clone(&self.dialect),
                stream: self.stream.clone(),
                pk: self.pk.clone(),
                lower: lower.take(),
                upper: Some(vec![boundary.clone()]),
            });
            lower = Some(vec![boundary.clone()]);
        }
        parts.push(PkRangeSnapshotPartition {
            dialect: Arc::clone(&self.dialect),
            stream: self.stream.clone(),
            pk: self.pk.clone(),
            lower,
            upper: self.upper.clone(),
        });
        parts
    }
}

impl Partition for PkRangeSnapshotPartition {
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
        match &self.upper {
            Some(upper) => OpaqueState::snapshot_checkpoint(&self.pk[0], &upper[0]),
            None => OpaqueState::snapshot_completed(),
        }
    }

    fn incomplete_state(&self, last_row: &Row) -> Result<Option<OpaqueState>, ExtractError> {
        let bound = row_bound(last_row, &self.pk)?;
        Ok(Some(OpaqueState::snapshot_checkpoint(&self.pk[0], &bound[0])))
    }
}

/// Whole-table snapshot for streams with no usable scan key. Cannot
/// checkpoint mid-way; a restart re-reads everything.
pub struct NonResumableSnapshotPartition {
    dialect: Arc<dyn Dialect>,
    stream: Stream,
}

impl NonResumableSnapshotPartition {
    pub fn new(dialect: Arc<dyn Dialect>, stream: Stream) -> Self {
        NonResumableSnapshotPartition { dialect, stream }
    }

    fn base_select(&self) -> Select {
        Select::new(
            Projection::Columns(self.stream.fields.clone()),
            From::new(&self.stream.name, self.stream.namespace.as_deref()),
        )
    }
}

impl Partition for NonResumableSnapshotPartition {
    fn stream(&self) -> &Stream {
        &self.stream
    }

    fn full_query(&self) -> SelectQuery {
        generate(&self.base_select(), self.dialect.as_ref())
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
        OpaqueState::snapshot_completed()
    }

    fn incomplete_state(&self, _last_row: &Row) -> Result<Option<OpaqueState>, ExtractError> {
        Ok(None)
    }
}
