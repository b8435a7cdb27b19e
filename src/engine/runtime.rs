//! Starting and stopping test-server containers.

use super::{EngineCli, RunSpec};
use crate::catalog::ServerDefinition;
use crate::error::{ErrorKind, Result};
use crate::store::{ContainerRecord, ContainerStatus, ContainerStore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// One caller-requested port mapping.
///
/// The host side is kept as the raw token the caller sent; tokens that do not
/// parse as a port number are skipped during the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortOverride {
    pub host: String,
    pub container: u16,
}

impl PortOverride {
    pub fn new(host: impl Into<String>, container: u16) -> Self {
        Self {
            host: host.into(),
            container,
        }
    }
}

/// Caller input for a start request.
///
/// On the wire `ports` is a list of single-entry objects mapping a host port
/// to a container port: `{"name": "x", "ports": [{"8080": 80}], "env": {}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_overrides",
        deserialize_with = "deserialize_overrides"
    )]
    pub ports: Vec<PortOverride>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn serialize_overrides<S: Serializer>(
    overrides: &[PortOverride],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    overrides
        .iter()
        .map(|o| BTreeMap::from([(o.host.clone(), o.container)]))
        .collect::<Vec<_>>()
        .serialize(serializer)
}

fn deserialize_overrides<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<PortOverride>, D::Error> {
    let raw: Option<Vec<BTreeMap<String, u16>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .flat_map(|mapping| mapping.into_iter())
        .map(|(host, container)| PortOverride { host, container })
        .collect())
}

/// Final name, ports and environment for a container about to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedConfiguration {
    pub name: String,
    /// Container port to host port
    pub ports: BTreeMap<u16, u16>,
    pub env: BTreeMap<String, String>,
}

/// Merge caller overrides over catalog defaults. Overrides always win.
pub fn merge_configuration(
    definition: &ServerDefinition,
    config: &StartConfiguration,
    name_prefix: &str,
    sequence: u64,
) -> MergedConfiguration {
    let mut ports: BTreeMap<u16, u16> = definition.ports.iter().map(|&p| (p, p)).collect();
    let mut env = definition.env.clone();

    env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    for port in &config.ports {
        match port.host.trim().parse::<u16>() {
            Ok(host) => {
                ports.insert(port.container, host);
            }
            Err(_) => warn!(
                "Ignoring port override with invalid host port {:?}",
                port.host
            ),
        }
    }

    let name = match config.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{}-{}-{}", name_prefix, definition.name, sequence),
    };

    MergedConfiguration { name, ports, env }
}

/// Outcome of a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedContainer {
    pub id: String,
    pub name: String,
    pub ports: BTreeMap<u16, u16>,
    pub env: BTreeMap<String, String>,
}

/// Runs and removes containers and keeps their records in step.
pub struct RuntimeAdapter {
    engine: EngineCli,
    store: Arc<dyn ContainerStore>,
    name_prefix: String,
    label: String,
    sequence: AtomicU64,
}

impl RuntimeAdapter {
    pub fn new(
        engine: EngineCli,
        store: Arc<dyn ContainerStore>,
        name_prefix: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            store,
            name_prefix: name_prefix.into(),
            label: label.into(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Start a container for `definition` and record it as running.
    ///
    /// # Errors
    ///
    /// Returns `StartFailed` if `run -d` exits non-zero (nothing is
    /// recorded), or the store's error if the record cannot be created.
    pub async fn start(
        &self,
        definition: &ServerDefinition,
        config: &StartConfiguration,
    ) -> Result<StartedContainer> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let merged = merge_configuration(definition, config, &self.name_prefix, sequence);

        let spec = RunSpec {
            name: merged.name.clone(),
            image: definition.image.clone(),
            label: self.label.clone(),
            ports: merged.ports.clone(),
            env: merged.env.clone(),
        };
        let id = self.engine.run_detached(&spec).await?;

        self.store
            .create(ContainerRecord {
                id: id.clone(),
                name: merged.name.clone(),
                image: definition.image.clone(),
                created_at: chrono::Utc::now().timestamp_millis(),
                environment: merged.env.clone(),
                ports: merged.ports.clone(),
                volumes: BTreeMap::new(),
                networks: vec!["host".to_string()],
                status: ContainerStatus::Running,
                server_type: definition.kind.tag().to_string(),
            })
            .await?;

        info!(
            "Started container name={} image={} id={}",
            merged.name, definition.image, id
        );
        Ok(StartedContainer {
            id,
            name: merged.name,
            ports: merged.ports,
            env: merged.env,
        })
    }

    /// Force-remove a container and mark its record discarded.
    ///
    /// Prior state is not checked; removing an already removed container is
    /// left to the engine.
    pub async fn stop(&self, id: &str) -> Result<()> {
        self.engine.remove(&[id.to_string()]).await?;

        match self.store.update_status(id, ContainerStatus::Discarded).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Removed container {} has no record", id);
                Ok(())
            }
            other => other,
        }
    }

    /// Remove every container carrying the management label.
    ///
    /// Returns how many containers were removed; zero is not an error.
    pub async fn stop_all(&self) -> Result<usize> {
        let ids = self.engine.list_managed(&self.label).await?;
        if ids.is_empty() {
            info!("No managed containers to stop");
            return Ok(0);
        }

        self.engine.remove(&ids).await?;

        // `ps -q` prints short ids, records keep the full one.
        for record in self.store.list_running().await? {
            if ids.iter().any(|short| record.id.starts_with(short.as_str())) {
                self.store
                    .update_status(&record.id, ContainerStatus::Discarded)
                    .await?;
            }
        }

        info!("Removed {} managed containers", ids.len());
        Ok(ids.len())
    }
}
