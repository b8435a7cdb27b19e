//! Start and stop flows that report through the progress hub.

use crate::catalog::ServerCatalog;
use crate::config::ServiceConfig;
use crate::engine::{
    EngineCli, ImageAction, ImageProvisioner, RuntimeAdapter, StartConfiguration,
    StartedContainer,
};
use crate::env::progress::COMPLETION_GRACE;
use crate::error::Result;
use crate::executor::CommandRunner;
use crate::progress::{ProgressEvent, ProgressHub};
use crate::store::ContainerStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// Owns the start/stop workflow for test-server containers.
///
/// Cheap to clone; every clone shares the same hub, store and name counter.
#[derive(Clone)]
pub struct ServerOrchestrator {
    catalog: Arc<ServerCatalog>,
    provisioner: Arc<ImageProvisioner>,
    runtime: Arc<RuntimeAdapter>,
    hub: Arc<ProgressHub>,
    store: Arc<dyn ContainerStore>,
    completion_grace: Duration,
}

impl ServerOrchestrator {
    pub fn new(
        catalog: ServerCatalog,
        provisioner: ImageProvisioner,
        runtime: RuntimeAdapter,
        hub: Arc<ProgressHub>,
        store: Arc<dyn ContainerStore>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            provisioner: Arc::new(provisioner),
            runtime: Arc::new(runtime),
            hub,
            store,
            completion_grace: COMPLETION_GRACE,
        }
    }

    /// Wire an orchestrator from service configuration.
    pub fn from_config(
        config: &ServiceConfig,
        catalog: ServerCatalog,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ContainerStore>,
        hub: Arc<ProgressHub>,
    ) -> Self {
        let engine = EngineCli::new(runner, config.engine_program.clone());
        let provisioner = ImageProvisioner::new(engine.clone(), config.custom_images_dir.clone());
        let runtime = RuntimeAdapter::new(
            engine,
            store.clone(),
            config.name_prefix.clone(),
            config.management_label.clone(),
        );
        Self::new(catalog, provisioner, runtime, hub, store)
    }

    /// Override how long a finished channel stays readable.
    pub fn with_completion_grace(mut self, grace: Duration) -> Self {
        self.completion_grace = grace;
        self
    }

    pub fn catalog(&self) -> &ServerCatalog {
        &self.catalog
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn ContainerStore> {
        &self.store
    }

    /// Open a progress channel, run the start flow in the background and
    /// return the request id to poll.
    pub fn start_async(&self, tag: &str, config: StartConfiguration) -> String {
        let request_id = Uuid::new_v4().to_string();
        self.hub.open(&request_id);

        let orchestrator = self.clone();
        let tag = tag.to_string();
        let id = request_id.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.start_with_progress(&id, &tag, &config).await {
                error!("Start of {} failed for request {}: {}", tag, id, e);
            }
        });

        request_id
    }

    /// Resolve, provision and start `tag`, reporting each step on
    /// `request_id`'s channel.
    ///
    /// Exactly one error event is emitted on failure and no record is
    /// written. Whatever the outcome, the channel is scheduled for removal
    /// after the completion grace period.
    pub async fn start_with_progress(
        &self,
        request_id: &str,
        tag: &str,
        config: &StartConfiguration,
    ) -> Result<StartedContainer> {
        self.hub.open_if_absent(request_id);
        let result = self.run_start(request_id, tag, config).await;
        self.hub.expire_after(request_id, self.completion_grace);
        result
    }

    async fn run_start(
        &self,
        request_id: &str,
        tag: &str,
        config: &StartConfiguration,
    ) -> Result<StartedContainer> {
        let report = |event: ProgressEvent| self.hub.send(request_id, event);
        report(ProgressEvent::step(10, "starting"));

        let definition = match self.catalog.resolve(tag) {
            Ok(definition) => definition,
            Err(e) => {
                report(ProgressEvent::failed(
                    100,
                    format!("Unknown server type: {}", tag),
                ));
                return Err(e);
            }
        };

        let action = ImageProvisioner::action_for(&definition.image);
        report(ProgressEvent::step(30, action.in_progress_message()));
        if let Err(e) = self.provisioner.ensure_image(&definition.image).await {
            let verb = match action {
                ImageAction::Build => "build",
                ImageAction::Pull => "pull",
            };
            report(ProgressEvent::failed(50, format!("{} failed: {}", verb, e)));
            return Err(e);
        }
        report(ProgressEvent::step(50, action.done_message()));

        report(ProgressEvent::step(80, "Starting container"));
        let started = match self.runtime.start(definition, config).await {
            Ok(started) => started,
            Err(e) => {
                report(ProgressEvent::failed(90, format!("run failed: {}", e)));
                return Err(e);
            }
        };

        report(ProgressEvent::step(100, "Started"));
        info!(
            "Request {} started {} as {}",
            request_id, tag, started.name
        );
        Ok(started)
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.runtime.stop(id).await
    }

    pub async fn stop_all(&self) -> Result<usize> {
        self.runtime.stop_all().await
    }
}
