use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::StoreBackend;
use crate::types::StoredEvent;

/// Snapshot persistence backed by a single JSON file.
///
/// The file holds one JSON array of stored-event records and is replaced
/// atomically on every save: the new snapshot is written to a sibling
/// temporary file and renamed over the target, so a crash mid-write never
/// leaves a half-written snapshot.
///
/// The file is exclusively owned by the store that opened it; no other
/// component reads or writes it.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn load(&self) -> Result<Vec<StoredEvent>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // Missing file is a fresh install, not corruption.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let events = serde_json::from_slice(&bytes)?;
        Ok(events)
    }

    async fn save_atomic(&self, events: &[StoredEvent]) -> Result<(), StoreError> {
        let json = serde_json::to_vec(events)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
