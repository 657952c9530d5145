//! Predicate tree for WHERE clauses.

use model::core::value::Value;
use model::stream::Field;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

/// Leaf comparison of a column against a bound value. The value carries the
/// column's codec via its type, so parameter encoding matches the wire type.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: Field,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Leaf(Comparison),
}

impl Predicate {
    pub fn leaf(field: &Field, op: CompareOp, value: Value) -> Predicate {
        Predicate::Leaf(Comparison {
            field: field.clone(),
            op,
            value,
        })
    }

    /// Flattens degenerate conjunctions and disjunctions: empty nodes
    /// disappear, single-child nodes collapse into the child, and nested
    /// nodes of the same kind are merged.
    pub fn optimize(self) -> Option<Predicate> {
        match self {
            Predicate::Leaf(c) => Some(Predicate::Leaf(c)),
            Predicate::And(children) => {
                let mut flat = Vec::new();
                for child in children {
                    match child.optimize() {
                        None => {}
                        Some(Predicate::And(inner)) => flat.extend(inner),
                        Some(other) => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => None,
                    1 => flat.into_iter().next(),
                    _ => Some(Predicate::And(flat)),
                }
            }
            Predicate::Or(children) => {
                let mut flat = Vec::new();
                for child in children {
                    match child.optimize() {
                        None => {}
                        Some(Predicate::Or(inner)) => flat.extend(inner),
                        Some(other) => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => None,
                    1 => flat.into_iter().next(),
                    _ => Some(Predicate::Or(flat)),
                }
            }
        }
    }
}
