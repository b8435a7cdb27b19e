//! In-process record store with optional JSON snapshotting.

use super::{ContainerRecord, ContainerStatus, ContainerStore};
use crate::error::{Result, ServerError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Record store kept in memory, optionally mirrored to a JSON file.
///
/// Each mutation rewrites the snapshot through a temp file and a rename, so a
/// crash never leaves a half-written file behind.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<ContainerRecord>>,
    snapshot: Option<PathBuf>,
}

impl InMemoryStore {
    /// Empty store without a snapshot file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store mirrored to `path`, loading existing records if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or parsed.
    pub async fn with_snapshot(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if async_fs::try_exists(&path).await? {
            let content = async_fs::read_to_string(&path).await?;
            let records: Vec<ContainerRecord> = serde_json::from_str(&content)?;
            info!("Loaded {} container records from {:?}", records.len(), path);
            records
        } else {
            Vec::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            snapshot: Some(path),
        })
    }

    async fn persist(&self, records: &[ContainerRecord]) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        write_atomically(path, &serde_json::to_vec_pretty(records)?).await?;
        debug!("Wrote {} container records to {:?}", records.len(), path);
        Ok(())
    }
}

async fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        async_fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp = PathBuf::from(temp);

    async_fs::write(&temp, data).await?;
    async_fs::rename(&temp, path).await
}

#[async_trait]
impl ContainerStore for InMemoryStore {
    async fn create(&self, record: ContainerRecord) -> Result<String> {
        let mut records = self.records.write().await;

        if records.iter().any(|r| r.id == record.id) {
            return Err(ServerError::Conflict(format!(
                "container id {} already recorded",
                record.id
            )));
        }
        if records.iter().any(|r| r.name == record.name) {
            return Err(ServerError::Conflict(format!(
                "container name {} already recorded",
                record.name
            )));
        }

        let id = record.id.clone();
        let mut next = records.clone();
        next.push(record);
        self.persist(&next).await?;
        *records = next;

        info!("Container saved with id={}", id);
        Ok(id)
    }

    async fn get(&self, id_or_name: &str) -> Result<ContainerRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id_or_name || r.name == id_or_name)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(format!("container {}", id_or_name)))
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn update_status(&self, id: &str, status: ContainerStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let index = records
            .iter()
            .position(|r| r.id == id || r.name == id)
            .ok_or_else(|| ServerError::NotFound(format!("container {}", id)))?;

        match (records[index].status, status) {
            (current, next) if current == next => return Ok(()),
            (ContainerStatus::Discarded, ContainerStatus::Running) => {
                return Err(ServerError::InvalidInput(format!(
                    "container {} was discarded and cannot run again",
                    id
                )));
            }
            _ => {}
        }

        let mut next = records.clone();
        next[index].status = status;
        self.persist(&next).await?;
        *records = next;

        debug!("Container {} is now {}", id, status);
        Ok(())
    }
}
