//! Log-based change capture: offset bookkeeping, retention
//! validation, schema-history persistence, and decoding of raw log
//! events into typed rows.

pub mod manager;
pub mod offset;
pub mod position;
pub mod reader;
