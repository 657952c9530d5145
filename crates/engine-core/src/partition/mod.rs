pub mod cursor;
pub mod factory;
pub mod snapshot;

use model::core::value::Value;
use model::records::row::Row;
use model::stream::{Field, Stream};
use query::SelectQuery;
use query::ast::expr::{CompareOp, Predicate};

use crate::error::ExtractError;
use crate::state::OpaqueState;

/// One bounded slice of a stream read.
///
/// A partition owns its bounds and knows how to render its queries and
/// how to describe its own progress as a checkpoint. The runner never
/// inspects bounds directly.
pub trait Partition: Send + Sync {
    fn stream(&self) -> &Stream;

    /// Reads the whole partition in one pass.
    fn full_query(&self) -> SelectQuery;

    /// Reads up to `limit` rows in checkpoint order, or `None` when
    /// the partition has no scan key to resume on.
    fn resumable_query(&self, limit: u64) -> Option<SelectQuery>;

    /// Samples the partition at a rate of `1 / 2^rate_inv_pow2`.
    fn sampling_query(&self, rate_inv_pow2: u32, sample_size: u64) -> SelectQuery;

    /// Checkpoint to persist once every row in the partition has been
    /// emitted.
    fn complete_state(&self) -> OpaqueState;

    /// Checkpoint to persist after emitting rows up to `last_row`, or
    /// `None` when the partition cannot checkpoint mid-way.
    fn incomplete_state(&self, last_row: &Row) -> Result<Option<OpaqueState>, ExtractError>;
}

/// Builds the range predicate for a composite scan key.
///
/// The lower bound expands to a disjunction over key prefixes: for
/// each column `i`, all earlier columns are pinned equal and column
/// `i` must be strictly greater. Only the clause on the final column
/// honors `include_lower`. The upper bound mirrors this with the final
/// column compared inclusively, since upper bounds come from MAX
/// lookups and must cover the boundary row itself.
pub(crate) fn bound_predicate(
    columns: &[Field],
    lower: Option<&[Value]>,
    include_lower: bool,
    upper: Option<&[Value]>,
) -> Option<Predicate> {
    let mut clauses = Vec::new();
    if let Some(lower) = lower {
        if let Some(p) = half_bound(columns, lower, CompareOp::Gt, CompareOp::GtEq, include_lower)
        {
            clauses.push(p);
        }
    }
    if let Some(upper) = upper {
        if let Some(p) = half_bound(columns, upper, CompareOp::Lt, CompareOp::LtEq, true) {
            clauses.push(p);
        }
    }
    Predicate::And(clauses).optimize()
}

fn half_bound(
    columns: &[Field],
    bound: &[Value],
    strict: CompareOp,
    inclusive: CompareOp,
    include_last: bool,
) -> Option<Predicate> {
    let n = columns.len().min(bound.len());
    let mut alternatives = Vec::with_capacity(n);
    for i in 0..n {
        let mut conjuncts: Vec<Predicate> = (0..i)
            .map(|j| Predicate::leaf(&columns[j], CompareOp::Eq, bound[j].clone()))
            .collect();
        let op = if i == n - 1 && include_last { inclusive } else { strict };
        conjuncts.push(Predicate::leaf(&columns[i], op, bound[i].clone()));
        alternatives.push(Predicate::And(conjuncts));
    }
    Predicate::Or(alternatives).optimize()
}

/// Pulls the checkpoint values for `columns` out of the last emitted
/// row.
pub(crate) fn row_bound(row: &Row, columns: &[Field]) -> Result<Vec<Value>, ExtractError> {
    columns
        .iter()
        .map(|col| {
            row.get(&col.name).cloned().ok_or_else(|| {
                ExtractError::Unexpected(format!(
                    "row is missing checkpoint column `{}`",
                    col.name
                ))
            })
        })
        .collect()
}
