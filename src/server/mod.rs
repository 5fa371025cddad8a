//! HTTP front end.
//!
//! Every request lands in one fallback handler. GET and HEAD requests for
//! files under `static-directory` are served directly; everything else is
//! handed to the supervisor, which forwards it to a worker.
//!
//! ```bash
//! warmpool start --port 8080 --workers 4 --static-directory public
//! curl http://localhost:8080/              # answered by a worker
//! curl http://localhost:8080/logo.png      # answered from public/
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod path_resolver;
pub mod static_files;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::settings::Settings;
use crate::supervisor::{Phase, SupervisorHandle};

pub use path_resolver::{PathRejection, resolve_request_path};

/// Shared application state.
pub struct AppState {
    pub supervisor: SupervisorHandle,
    /// Document root for the static short-circuit, if enabled.
    pub static_root: Option<PathBuf>,
    pub max_body_size: usize,
}

impl AppState {
    pub fn new(supervisor: SupervisorHandle, settings: &Settings) -> Self {
        Self {
            supervisor,
            static_root: settings.static_root().map(PathBuf::from),
            max_body_size: settings.max_body_size,
        }
    }
}

/// Constructs the HTTP router with request IDs, tracing and, when
/// `access_log` is set, one log line per request.
pub fn build_router(state: Arc<AppState>, access_log: bool) -> Router {
    let mut app = Router::new()
        .fallback(handlers::forward)
        .with_state(state);

    if access_log {
        app = app.layer(axum::middleware::from_fn(
            middleware::access_log_middleware,
        ));
    }

    app.layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serve until the supervisor starts draining, then finish open requests.
pub async fn serve(listener: TcpListener, router: Router, handle: SupervisorHandle) -> Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        handle.wait_for_phase(Phase::Draining).await;
    })
    .await?;
    Ok(())
}
