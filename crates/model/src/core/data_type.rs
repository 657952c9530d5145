use serde::{Deserialize, Serialize};

/// Source-agnostic column type. Each variant determines which codec is used
/// when a checkpoint string or a raw log value is turned back into a
/// [`Value`](crate::core::value::Value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Boolean,
    VarChar,
    Text,
    Date,
    Timestamp,
    TimestampTz,
    Binary,
    Json,
}

impl DataType {
    /// Whether values of this type are encoded as JSON numbers on the wire.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int
                | DataType::BigInt
                | DataType::Float
                | DataType::Double
                | DataType::Decimal
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date | DataType::Timestamp | DataType::TimestampTz
        )
    }
}
