//! Container metadata records and the narrow persistence interface the
//! orchestrator talks to.
//!
//! The orchestrator creates a record exactly once, when a container starts
//! successfully, and afterwards only ever moves it from `Running` to
//! `Discarded`. Records are never deleted by this crate.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

mod memory;

pub use memory::InMemoryStore;

/// Lifecycle state of a recorded container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Discarded,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Running => f.write_str("running"),
            ContainerStatus::Discarded => f.write_str("discarded"),
        }
    }
}

/// Persisted metadata for one container started by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Engine-assigned container identifier
    #[serde(rename = "container_id")]
    pub id: String,
    pub name: String,
    pub image: String,
    /// Creation instant, epoch milliseconds
    pub created_at: i64,
    pub environment: BTreeMap<String, String>,
    /// Container port to host port
    pub ports: BTreeMap<u16, u16>,
    pub volumes: BTreeMap<String, String>,
    pub networks: Vec<String>,
    pub status: ContainerStatus,
    /// Upper-case server type tag
    #[serde(rename = "type")]
    pub server_type: String,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Host port published for a container port, falling back to the
    /// container port itself.
    pub fn host_port(&self, container_port: u16) -> u16 {
        self.ports
            .get(&container_port)
            .copied()
            .unwrap_or(container_port)
    }
}

/// Persistence gateway for container records.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Store a new record and return its id.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the id or name is already taken.
    async fn create(&self, record: ContainerRecord) -> Result<String>;

    /// Fetch a record by engine id or container name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record matches.
    async fn get(&self, id_or_name: &str) -> Result<ContainerRecord>;

    /// Every record, in creation order.
    async fn list(&self) -> Result<Vec<ContainerRecord>>;

    /// Records whose status is `Running`.
    async fn list_running(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(ContainerRecord::is_running)
            .collect())
    }

    /// Move a record to a new status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `InvalidInput` for a
    /// `Discarded → Running` transition.
    async fn update_status(&self, id: &str, status: ContainerStatus) -> Result<()>;
}
