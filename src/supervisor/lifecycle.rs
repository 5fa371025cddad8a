//! Process-level wiring for `warmpool start`.
//!
//! Acquires the pidfile, binds the admin socket and the HTTP listener, runs
//! the supervisor until it stops, and cleans up the runtime files afterwards.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

use super::admin;
use super::command::SupervisorHandle;
use super::runner::Supervisor;
use super::watch::ReloadWatcher;
use crate::error::{Result, WarmpoolError};
use crate::paths;
use crate::pidfile::PidFile;
use crate::server::{self, AppState};
use crate::settings::Settings;
use crate::worker::{ProcessLauncher, WorkerLauncher};

/// How long open HTTP connections may linger after the workers are gone.
const HTTP_GRACE: Duration = Duration::from_secs(5);

/// Run a supervisor with the configured worker executable.
pub async fn run(settings: Settings) -> Result<()> {
    let launcher = Arc::new(ProcessLauncher::from_settings(&settings)?);
    run_with_launcher(settings, launcher).await
}

/// Run a supervisor until it is stopped by signal or admin request.
pub async fn run_with_launcher(
    settings: Settings,
    launcher: Arc<dyn WorkerLauncher>,
) -> Result<()> {
    settings.validate()?;
    let settings = Arc::new(settings);

    let pidfile = PidFile::acquire(&settings.pidfile)?;
    prepare_socket_dir(&settings.socket_path)?;

    let admin_path = paths::controller_socket(&settings.socket_path);
    let _ = std::fs::remove_file(&admin_path);
    let admin_listener = UnixListener::bind(&admin_path)?;

    let addr = settings.listen_addr();
    let http_listener = TcpListener::bind(&addr).await.map_err(|e| {
        std::io::Error::new(e.kind(), format!("cannot listen on {}: {}", addr, e))
    })?;
    let local_addr = http_listener.local_addr()?;

    let (supervisor, handle) = Supervisor::new(Arc::clone(&settings), launcher);
    let supervisor_task = tokio::spawn(supervisor.run());
    let signals = tokio::spawn(stop_on_signal(handle.clone()));
    let admin = tokio::spawn(admin::serve(admin_listener, handle.clone()));

    let mut http = None;
    let mut watcher = None;
    if handle.wait_until_running().await.is_ok() {
        info!(
            addr = %local_addr,
            workers = settings.workers,
            pid = std::process::id(),
            "Accepting requests"
        );
        let state = Arc::new(AppState::new(handle.clone(), &settings));
        let router = server::build_router(state, settings.logging);
        http = Some(tokio::spawn(server::serve(
            http_listener,
            router,
            handle.clone(),
        )));

        if settings.debug {
            watcher = match ReloadWatcher::spawn(&settings, handle.clone()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "Reload-on-change disabled");
                    None
                }
            };
        }
    }

    let result = supervisor_task
        .await
        .unwrap_or_else(|e| Err(WarmpoolError::Worker(format!("supervisor task failed: {}", e))));

    drop(watcher);
    signals.abort();
    admin.abort();
    if let Some(mut http) = http {
        match tokio::time::timeout(HTTP_GRACE, &mut http).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server error"),
            Err(_) => {
                warn!("HTTP connections still open, closing them");
                http.abort();
            }
            _ => {}
        }
    }

    let _ = std::fs::remove_file(&admin_path);
    drop(pidfile);
    result
}

/// Create the socket directory, private to the current user.
fn prepare_socket_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

async fn stop_on_signal(handle: SupervisorHandle) {
    match wait_for_shutdown_signal().await {
        Ok(()) => {
            info!("Shutdown signal received");
            let _ = handle.stop().await;
        }
        Err(e) => warn!(error = %e, "Failed to install signal handlers"),
    }
}

/// Resolves on SIGINT, SIGTERM or SIGQUIT.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}
