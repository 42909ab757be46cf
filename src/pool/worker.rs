//! Worker: an OS thread owning one reactor and the relays assigned to it
//!
//! Each worker runs a current-thread tokio runtime. Relays are spawned with
//! `spawn_local`, so every byte of a connection is read and written on the
//! thread that accepted the handoff; nothing is shared across workers but
//! the immutable tuple table.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::LocalSet;
use tracing::{debug, error, info, trace, warn};

use crate::config::RelayTuple;
use crate::net::socket::connect_to;
use crate::relay::Relay;

use super::acceptor::{accept_loop, Dispatcher};

/// An accepted connection in flight from the acceptor to a worker.
///
/// The stream is nonblocking and detached from any reactor while it crosses
/// threads; the receiving worker re-registers it with its own reactor.
pub(crate) struct Handoff {
    pub(crate) listen_fd: RawFd,
    pub(crate) stream: std::net::TcpStream,
}

/// Extra duties of worker 0: the listeners to accept on and the wakeup
/// channels of the whole pool.
pub(crate) struct AcceptorParts {
    pub(crate) listeners: Vec<(RawFd, std::net::TcpListener)>,
    pub(crate) senders: Vec<UnboundedSender<Handoff>>,
}

/// Body of a `mux-worker-{id}` thread.
pub(crate) fn worker_main(
    id: usize,
    rx: UnboundedReceiver<Handoff>,
    table: Arc<HashMap<RawFd, RelayTuple>>,
    acceptor: Option<AcceptorParts>,
) {
    debug!(id, "Run worker");

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(err = %e, id, "Fail to build worker runtime");
            return;
        }
    };

    let local = LocalSet::new();
    local.spawn_local(intake(id, rx, table));

    if let Some(parts) = acceptor {
        let dispatcher = Rc::new(Dispatcher::new(parts.senders));
        for (listen_fd, listener) in parts.listeners {
            let dispatcher = Rc::clone(&dispatcher);
            local.spawn_local(async move {
                match tokio::net::TcpListener::from_std(listener) {
                    Ok(listener) => accept_loop(listener, listen_fd, dispatcher).await,
                    Err(e) => error!(err = %e, fd = listen_fd, "Fail to attach listener"),
                }
            });
        }

        local.spawn_local(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
                std::process::exit(0);
            }
        });
    }

    rt.block_on(local);
}

/// Drain the wakeup channel, building one relay per handed-off connection.
async fn intake(
    id: usize,
    mut rx: UnboundedReceiver<Handoff>,
    table: Arc<HashMap<RawFd, RelayTuple>>,
) {
    while let Some(handoff) = rx.recv().await {
        let tuple = match table.get(&handoff.listen_fd) {
            Some(tuple) => tuple.clone(),
            None => {
                warn!(listen_fd = handoff.listen_fd, "Not found relay addr tuple");
                continue;
            }
        };

        // Setup (including the upstream connect) runs in its own task so a
        // slow connect never stalls the other relays on this worker.
        tokio::task::spawn_local(async move {
            if let Some(relay) = setup(handoff, tuple).await {
                relay.run().await;
            }
        });
    }

    trace!(id, "Worker intake closed");
}

/// Per-connection setup: register the client with this worker's reactor,
/// connect upstream, and assemble the relay.
///
/// Any failure closes the client (and the half-open server socket, when one
/// exists) and yields no relay; the error never outlives this connection.
async fn setup(handoff: Handoff, tuple: RelayTuple) -> Option<Relay> {
    let client = match TcpStream::from_std(handoff.stream) {
        Ok(stream) => stream,
        Err(e) => {
            error!(err = %e, "Fail to register client conn");
            return None;
        }
    };

    let client_raddr = match client.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(err = %e, "Fail to get remote addr");
            return None;
        }
    };
    info!(from = %client_raddr, "New conn");

    let client_laddr = match client.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(err = %e, from = %client_raddr, "Fail to get local addr");
            return None;
        }
    };

    if let Err(e) = client.set_nodelay(true) {
        trace!(err = %e, from = %client_raddr, "Fail to set nodelay");
    }

    let server = match connect_to(tuple.src, tuple.dst).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(
                err = %e,
                saddr = ?tuple.src,
                daddr = %tuple.dst,
                "Fail to connect"
            );
            return None;
        }
    };

    let server_laddr = match server.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(err = %e, daddr = %tuple.dst, "Fail to get local addr");
            return None;
        }
    };

    debug!(
        from = %client_raddr,
        laddr = %server_laddr,
        raddr = %tuple.dst,
        "Connected server"
    );

    Some(Relay::new(
        client,
        client_laddr,
        client_raddr,
        server,
        server_laddr,
        tuple.dst,
    ))
}
