//! HTTP surface.
//!
//! Everything lives under `/api/v1`. Protocol routes are nested per protocol
//! (`/protocols/web`, `/protocols/mqtt`, ...) and each nested router carries
//! its [`ServerKind`] as a request extension.

use crate::catalog::ServerKind;
use crate::config::ServiceConfig;
use crate::engine::EngineCli;
use crate::introspection::Introspector;
use crate::mail::MailClient;
use crate::orchestrator::ServerOrchestrator;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod containers;
mod error;
mod progress;
mod protocols;
mod servers;
mod sockets;

pub use error::status_for;
pub use sockets::origin_allowed;

/// Headroom for multipart framing on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub orchestrator: ServerOrchestrator,
    pub introspector: Introspector,
    pub engine: EngineCli,
    pub mail: MailClient,
    /// Fired on shutdown; ends every SSE and WebSocket session
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        orchestrator: ServerOrchestrator,
        engine: EngineCli,
        mail: MailClient,
        shutdown: CancellationToken,
    ) -> Self {
        let introspector = Introspector::new(engine.clone(), orchestrator.store().clone());
        Self {
            config: Arc::new(config),
            orchestrator,
            introspector,
            engine,
            mail,
            shutdown,
        }
    }
}

fn protocol_router(kind: ServerKind, upload_limit: usize) -> Router<AppState> {
    let mut router = Router::new().route("/{id}/access-logs", get(protocols::access_logs));

    router = match kind {
        ServerKind::Otel => router.route("/{id}/logs", get(sockets::otel_logs)),
        _ => router.route("/{id}/logs", get(protocols::raw_logs)),
    };

    if kind.content_root().is_some() {
        router = router
            .route("/{id}/filetree", get(protocols::file_tree))
            .route(
                "/{id}/upload",
                post(protocols::upload).layer(DefaultBodyLimit::max(upload_limit)),
            );
    }

    router = match kind {
        ServerKind::Mail => router
            .route("/{id}/messages", get(protocols::mail_messages))
            .route("/{id}/messages/{message_id}", get(protocols::mail_message)),
        ServerKind::Mqtt => router.route("/{id}/messages", get(sockets::mqtt_messages)),
        _ => router,
    };

    router.layer(Extension(kind))
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.config.upload_max_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let mut api = Router::new()
        .route("/servers", get(servers::list))
        .route("/servers/{kind}", get(servers::show).post(servers::start))
        .route("/servers/progress/{request_id}", get(progress::stream))
        .route("/containers", get(containers::list))
        .route(
            "/containers/{id}",
            get(containers::show).delete(containers::stop),
        );

    for kind in ServerKind::ALL {
        api = api.nest(
            &format!("/protocols/{}", kind.short_name()),
            protocol_router(kind, upload_limit),
        );
    }

    Router::new().nest("/api/v1", api).with_state(state)
}
