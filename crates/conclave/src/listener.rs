//! Inbound listeners.
//!
//! The router is served on a local-domain socket (always) and on a TCP
//! port (optional). axum runs one task per accepted connection; both
//! listeners drain in-flight requests when shutdown fires.

use anyhow::{Context, Result};
use axum::Router;
use std::path::PathBuf;
use tokio::sync::broadcast;

async fn wait_for_shutdown(mut shutdown: broadcast::Receiver<()>) {
    let _ = shutdown.recv().await;
}

/// Serve `app` on `0.0.0.0:port`
pub async fn serve_tcp(app: Router, port: u16, shutdown: broadcast::Receiver<()>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind TCP port {}", port))?;
    tracing::info!(port, "🚀 Listening on TCP");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("TCP server error")?;

    tracing::info!(port, "TCP listener stopped");
    Ok(())
}

/// Serve `app` on a local-domain socket open to every local process
#[cfg(unix)]
pub async fn serve_unix(app: Router, path: PathBuf, shutdown: broadcast::Receiver<()>) -> Result<()> {
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    // Clear a stale socket from a previous run, but never clobber a regular file
    if let Ok(meta) = std::fs::symlink_metadata(&path) {
        if meta.file_type().is_socket() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        } else {
            anyhow::bail!("{} exists and is not a socket", path.display());
        }
    }

    let listener = tokio::net::UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind UNIX socket {}", path.display()))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))
        .with_context(|| format!("Failed to open permissions on {}", path.display()))?;
    tracing::info!(path = %path.display(), "🚀 Listening on UNIX socket");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .context("UNIX socket server error");

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::debug!(path = %path.display(), error = %e, "Socket file already gone");
    }
    served
}

#[cfg(not(unix))]
pub async fn serve_unix(_app: Router, path: PathBuf, _shutdown: broadcast::Receiver<()>) -> Result<()> {
    anyhow::bail!("UNIX sockets are not available on this platform ({})", path.display())
}
