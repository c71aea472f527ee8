//! TCP listener: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding the device-facing TCP port.
//! 2. Accepting tracker connections.
//! 3. Handing each socket to its own [`ConnectionSupervisor`] task.
//! 4. Stopping the accept loop when the `running` flag is cleared.
//!
//! Sessions never share state with each other.  The only thing they have in
//! common is the `RecordStore`, which is required to accept concurrent
//! appends.  A session that is still running when the loop stops finishes
//! on its own.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::application::forward_records::RecordStore;
use crate::application::supervisor::{ConnectionSupervisor, SessionError, SessionSettings};

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the device-facing listener.
///
/// # Errors
///
/// Returns an error if the address is in use or the process lacks
/// permission to bind it.  This is fatal at startup.
pub async fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind device listener on {addr}"))?;
    let local = listener
        .local_addr()
        .with_context(|| format!("failed to read local address of listener on {addr}"))?;
    info!("AVL gateway listening on {local}");
    Ok(listener)
}

/// Accepts connections on `listener` until `running` is set to `false`.
///
/// Each accepted socket gets a dedicated Tokio task, so a slow or silent
/// device never delays the others.  A failed `accept` is logged and the loop
/// carries on.
///
/// # Errors
///
/// Currently never fails once the listener is bound; the `Result` keeps the
/// signature aligned with [`run_server`].
pub async fn serve(
    listener: TcpListener,
    settings: SessionSettings,
    store: Arc<dyn RecordStore>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, settings, store).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. too many open file descriptors); keep listening.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

/// Binds `addr` and runs [`serve`] on it.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(
    addr: SocketAddr,
    settings: SessionSettings,
    store: Arc<dyn RecordStore>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = bind_listener(addr).await?;
    serve(listener, settings, store, running).await
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Runs one supervisor to completion and logs how the session ended.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    settings: SessionSettings,
    store: Arc<dyn RecordStore>,
) {
    // ACKs are tiny and the device waits on each one.
    if let Err(e) = stream.set_nodelay(true) {
        debug!("could not disable Nagle for {peer_addr}: {e}");
    }

    let supervisor = ConnectionSupervisor::new(peer_addr, settings, store);
    let socket_id = supervisor.session().socket_id();
    info!(%socket_id, peer = %peer_addr, "device connected");

    match supervisor.run(stream).await {
        Ok(summary) => info!(
            %socket_id,
            peer = %peer_addr,
            acked = summary.frames_acked,
            dropped = summary.frames_dropped,
            records = summary.records_accepted,
            stored = summary.storage.stored,
            store_failures = summary.storage.failed,
            "session closed normally"
        ),
        Err(SessionError::IdleTimeout(limit)) => info!(
            %socket_id,
            peer = %peer_addr,
            "session closed after {}s without data",
            limit.as_secs()
        ),
        Err(e) => warn!(%socket_id, peer = %peer_addr, "session closed with error: {e}"),
    }
}
