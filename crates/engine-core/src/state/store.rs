use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ExtractError;
use crate::state::OpaqueState;

/// Durable checkpoint storage, keyed by stream.
///
/// Global (log-position) state is stored as a raw document because its
/// layout belongs to the change-capture layer, not to this crate.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, stream_id: &str, state: &OpaqueState) -> Result<(), ExtractError>;
    async fn load(&self, stream_id: &str) -> Result<Option<OpaqueState>, ExtractError>;
    async fn reset(&self, stream_id: &str) -> Result<(), ExtractError>;

    async fn save_global(
        &self,
        source_id: &str,
        doc: &serde_json::Value,
    ) -> Result<(), ExtractError>;
    async fn load_global(&self, source_id: &str)
    -> Result<Option<serde_json::Value>, ExtractError>;
    async fn reset_global(&self, source_id: &str) -> Result<(), ExtractError>;
}

/// Embedded [`StateStore`] backed by a sled tree.
pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: &Path) -> Result<Self, ExtractError> {
        let db = sled::open(path)?;
        Ok(SledStateStore { db })
    }

    fn stream_key(stream_id: &str) -> String {
        format!("state:{stream_id}")
    }

    fn global_key(source_id: &str) -> String {
        format!("cdc:{source_id}")
    }

    fn put(&self, key: &str, doc: &serde_json::Value) -> Result<(), ExtractError> {
        let bytes = serde_json::to_vec(doc)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>, ExtractError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), ExtractError> {
        self.db.remove(key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn save(&self, stream_id: &str, state: &OpaqueState) -> Result<(), ExtractError> {
        debug!(stream = stream_id, "persisting stream checkpoint");
        self.put(&Self::stream_key(stream_id), &state.to_document())
    }

    async fn load(&self, stream_id: &str) -> Result<Option<OpaqueState>, ExtractError> {
        match self.fetch(&Self::stream_key(stream_id))? {
            Some(doc) => OpaqueState::from_document(&doc),
            None => Ok(None),
        }
    }

    async fn reset(&self, stream_id: &str) -> Result<(), ExtractError> {
        self.delete(&Self::stream_key(stream_id))
    }

    async fn save_global(
        &self,
        source_id: &str,
        doc: &serde_json::Value,
    ) -> Result<(), ExtractError> {
        debug!(source = source_id, "persisting global log position");
        self.put(&Self::global_key(source_id), doc)
    }

    async fn load_global(
        &self,
        source_id: &str,
    ) -> Result<Option<serde_json::Value>, ExtractError> {
        self.fetch(&Self::global_key(source_id))
    }

    async fn reset_global(&self, source_id: &str) -> Result<(), ExtractError> {
        self.delete(&Self::global_key(source_id))
    }
}
