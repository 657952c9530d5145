use async_trait::async_trait;
use model::core::value::Value;
use model::records::row::Row;
use model::stream::{Field, Stream};
use query::SelectQuery;

use crate::error::ExtractError;

/// Answers the scalar boundary lookups the partition factory needs
/// before it can cut a range.
#[async_trait]
pub trait BoundQuerier: Send + Sync {
    /// `MAX(field)` over the stream. `None` when the table is empty.
    async fn max_value(
        &self,
        stream: &Stream,
        field: &Field,
    ) -> Result<Option<Value>, ExtractError>;
}

/// Executes a generated select and materializes its rows.
#[async_trait]
pub trait RowQuerier: Send + Sync {
    async fn query(&self, query: &SelectQuery) -> Result<Vec<Row>, ExtractError>;
}

/// Receives extracted rows, in partition order.
#[async_trait]
pub trait RowSink: Send + Sync {
    async fn accept(&self, stream: &Stream, row: Row) -> Result<(), ExtractError>;
}
