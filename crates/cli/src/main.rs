use std::collections::HashSet;
use std::path::Path;

use clap::Parser;
use commands::{Commands, StateCommand};
use engine_cdc::offset::CdcState;
use engine_core::state::store::{SledStateStore, StateStore};
use model::stream::{Stream, SyncMode};
use tracing::{Level, info, warn};

use crate::error::CliError;

mod commands;
mod error;

#[derive(Parser)]
#[command(name = "sluice", version = "0.1.0", about = "Incremental database extraction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { catalog } => {
            let streams = load_catalog(&catalog).await?;
            validate_catalog(&streams)?;
            info!(streams = streams.len(), "catalog is valid");
        }
        Commands::State { command } => match command {
            StateCommand::Show { dir, stream, source } => {
                let store = open_store(&dir)?;
                if let Some(stream_id) = stream {
                    match store.load(&stream_id).await? {
                        Some(state) => {
                            let doc = state.to_document();
                            println!("{}", serde_json::to_string_pretty(&doc)?);
                        }
                        None => println!("no checkpoint for stream '{stream_id}'"),
                    }
                }
                if let Some(source_id) = source {
                    match store.load_global(&source_id).await? {
                        Some(doc) => {
                            let state = CdcState::from_document(&doc)?;
                            println!("{}", serde_json::to_string_pretty(&doc)?);
                            println!("position: {}", state.offset.position()?);
                        }
                        None => println!("no change-capture offset for source '{source_id}'"),
                    }
                }
            }
            StateCommand::Reset { dir, stream, source } => {
                let store = open_store(&dir)?;
                if let Some(stream_id) = stream {
                    store.reset(&stream_id).await?;
                    info!(stream = %stream_id, "checkpoint deleted; next sync starts over");
                }
                if let Some(source_id) = source {
                    store.reset_global(&source_id).await?;
                    info!(source = %source_id, "change-capture offset deleted");
                }
            }
        },
    }

    Ok(())
}

async fn load_catalog(path: &str) -> Result<Vec<Stream>, CliError> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

fn open_store(dir: &str) -> Result<SledStateStore, CliError> {
    SledStateStore::open(Path::new(dir)).map_err(CliError::Engine)
}

fn validate_catalog(streams: &[Stream]) -> Result<(), CliError> {
    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    for stream in streams {
        let id = stream.id();
        if !seen.insert(id.clone()) {
            problems.push(format!("duplicate stream `{id}`"));
        }
        for pk in &stream.primary_key {
            if stream.field(&pk.name).is_none() {
                problems.push(format!(
                    "stream `{id}` declares primary-key column `{}` that is not a field",
                    pk.name
                ));
            }
        }
        match (&stream.sync_mode, &stream.cursor) {
            (SyncMode::CursorIncremental, None) => {
                problems.push(format!("stream `{id}` is cursor-incremental but has no cursor"));
            }
            (_, Some(cursor)) if stream.field(&cursor.name).is_none() => {
                problems.push(format!(
                    "stream `{id}` declares cursor `{}` that is not a field",
                    cursor.name
                ));
            }
            _ => {}
        }
        if stream.sync_mode == SyncMode::Cdc && stream.primary_key.is_empty() {
            warn!(
                stream = %id,
                "change-capture stream has no primary key; its snapshot cannot be resumed"
            );
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(CliError::InvalidCatalog(problems.join("; ")))
    }
}
