//! Defines the `Dialect` trait for database-specific SQL syntax.

/// Where the row limit is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// Trailing `LIMIT n`.
    Trailing,
    /// `SELECT TOP (n)` immediately after the SELECT keyword.
    SelectTop,
}

pub trait Dialect: Send + Sync {
    /// Wraps an identifier in the correct quotation marks for the dialect.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Returns the placeholder for the zero-based parameter index.
    fn placeholder(&self, index: usize) -> String;

    /// Table suffix implementing a pseudo-random sample at rate
    /// `1 / 2^rate_inv_pow2`.
    fn sample_suffix(&self, rate_inv_pow2: u32) -> String;

    fn limit_style(&self) -> LimitStyle;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct Postgres;

impl Dialect for Postgres {
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{ident}""#)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn sample_suffix(&self, rate_inv_pow2: u32) -> String {
        let percent = 100.0 / (1u64 << rate_inv_pow2) as f64;
        format!(" TABLESAMPLE BERNOULLI ({percent})")
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::Trailing
    }

    fn name(&self) -> &'static str {
        "PostgreSQL"
    }
}

#[derive(Debug, Clone)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("[{ident}]")
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index + 1)
    }

    fn sample_suffix(&self, rate_inv_pow2: u32) -> String {
        let percent = 100.0 / (1u64 << rate_inv_pow2) as f64;
        format!(" TABLESAMPLE SYSTEM ({percent} PERCENT)")
    }

    fn limit_style(&self) -> LimitStyle {
        LimitStyle::SelectTop
    }

    fn name(&self) -> &'static str {
        "SQLServer"
    }
}
