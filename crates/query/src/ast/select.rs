//! Defines the AST for an abstract SELECT query.

use crate::ast::expr::Predicate;
use model::stream::Field;

/// Column projection: either an explicit column list or a single MAX
/// aggregate, used to compute checkpoint upper bounds without a full scan.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Columns(Vec<Field>),
    MaxValue(Field),
}

/// Pseudo-random sample restriction for statistics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    /// Sampling rate is `1 / 2^rate_inv_pow2`.
    pub rate_inv_pow2: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct From {
    pub table: String,
    pub namespace: Option<String>,
    pub sample: Option<Sample>,
}

impl From {
    pub fn new(table: &str, namespace: Option<&str>) -> Self {
        From {
            table: table.to_string(),
            namespace: namespace.map(|s| s.to_string()),
            sample: None,
        }
    }

    pub fn with_sample(mut self, rate_inv_pow2: u32) -> Self {
        self.sample = Some(Sample { rate_inv_pow2 });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub projection: Projection,
    pub from: From,
    pub where_clause: Option<Predicate>,
    pub order_by: Vec<Field>,
    pub limit: Option<u64>,
}

impl Select {
    pub fn new(projection: Projection, from: From) -> Self {
        Select {
            projection,
            from,
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn with_where(mut self, predicate: Option<Predicate>) -> Self {
        self.where_clause = predicate;
        self
    }

    pub fn with_order_by(mut self, fields: Vec<Field>) -> Self {
        self.order_by = fields;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Runs predicate optimization before rendering.
    pub fn optimize(mut self) -> Self {
        self.where_clause = self.where_clause.and_then(Predicate::optimize);
        self
    }
}
