use engine_core::error::ExtractError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read the catalog file: {0}")]
    CatalogFileRead(#[from] std::io::Error),

    #[error("Failed to parse the catalog file: {0}")]
    CatalogParse(#[from] serde_json::Error),

    #[error("{0}")]
    Engine(#[from] ExtractError),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),
}
