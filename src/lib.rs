//! # Simple Test Server
//!
//! Provisions short-lived test-infrastructure containers (web, FTP, SMB,
//! mail, MQTT broker, telemetry collector) on demand and lets a caller watch
//! their startup progress and runtime logs while they run.
//!
//! ## Architecture Overview
//!
//! - **[`catalog`]**: closed set of server kinds and their image, port and environment defaults
//! - **[`engine`]**: container engine CLI adapter, image provisioning and the runtime adapter
//! - **[`progress`]**: per-request progress channels with TTL reaping and an SSE-ready feed
//! - **[`introspection`]**: directory listings, bounded log tails and live log streams
//! - **[`store`]**: container records behind the [`ContainerStore`] trait
//! - **[`orchestrator`]**: ties the above into asynchronous start, stop and bulk cleanup
//! - **`api`**: axum HTTP surface (feature `http`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sts::{HostExecutor, InMemoryStore, ProgressHub, ServerCatalog, ServerOrchestrator, ServiceConfig};
//! use sts::engine::StartConfiguration;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::default();
//!     let orchestrator = ServerOrchestrator::from_config(
//!         &config,
//!         ServerCatalog::builtin(),
//!         Arc::new(HostExecutor::new()),
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(ProgressHub::new()),
//!     );
//!
//!     let request_id = orchestrator.start_async("MAIL", StartConfiguration::default());
//!     let mut progress = orchestrator.hub().subscribe(&request_id)?;
//!     while let Some(event) = progress.recv().await {
//!         println!("{}% {}", event.percent, event.message);
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

/// Closed catalog of test-server kinds.
pub mod catalog;

/// Command line interface.
pub mod cli;

/// Service configuration and file discovery.
pub mod config;

/// Container engine adapter.
///
/// Wraps the engine CLI verbs, decides between local builds and registry
/// pulls, and turns start configurations into running, recorded containers.
pub mod engine;

/// Environment constants.
///
/// Centralizes engine conventions, timeouts and limits used throughout the
/// application for easier maintenance and consistency.
pub mod env;

pub mod error;

/// Process execution abstraction.
pub mod executor;

/// Directory listings and log reads inside running containers.
pub mod introspection;

/// MailHog HTTP API client.
pub mod mail;

pub mod orchestrator;

/// Progress broadcast hub.
pub mod progress;

/// Container record persistence.
pub mod store;

/// Upload validation and staging.
pub mod upload;

/// HTTP surface.
#[cfg(feature = "http")]
pub mod api;

pub use catalog::{ServerCatalog, ServerDefinition, ServerKind};
pub use config::{ConfigDiscovery, Environment, ServiceConfig};
pub use engine::{EngineCli, ImageProvisioner, RuntimeAdapter, StartConfiguration};
pub use error::{ErrorKind, Result, ServerError};
pub use executor::{CommandRunner, HostExecutor, ScriptedExecutor, ScriptedResponse};
pub use introspection::Introspector;
pub use orchestrator::ServerOrchestrator;
pub use progress::{ProgressEvent, ProgressHub, Subscription};
pub use store::{ContainerRecord, ContainerStatus, ContainerStore, InMemoryStore};
