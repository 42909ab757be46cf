//! Worker pool: listener registry, pool construction, and the run loop
//!
//! The flow mirrors the process lifecycle:
//!
//! ```text
//! Registry::install(tuples)   bind one listener per tuple, fail whole on any error
//! Pool::build(n, registry)    create workers + wakeup channels, replicate the table
//! Pool::run()                 one OS thread per worker; worker 0 also accepts
//! ```
//!
//! All accept events land on worker 0; accepted connections are spread over
//! the pool round-robin (skipping worker 0 when there is a choice). After
//! the handoff a connection never touches another worker again.

mod acceptor;
mod worker;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::RelayTuple;
use crate::error::Result;
use crate::net::bind_listener;

use self::worker::{worker_main, AcceptorParts, Handoff};

/// Immutable table of listening sockets and their relay tuples.
pub struct Registry {
    listeners: Vec<(std::net::TcpListener, RelayTuple)>,
    addrs: Vec<SocketAddr>,
}

impl Registry {
    /// Create one listening socket per tuple. Any single failure fails the
    /// whole installation.
    pub fn install(tuples: &[RelayTuple]) -> Result<Self> {
        let mut listeners = Vec::with_capacity(tuples.len());
        let mut addrs = Vec::with_capacity(tuples.len());

        for tuple in tuples {
            tuple.validate()?;
            let listener = bind_listener(tuple.listen)?;
            let addr = listener.local_addr()?;
            info!(addr = %addr, dst = %tuple.dst, "Listen on");
            listeners.push((listener, tuple.clone()));
            addrs.push(addr);
        }

        Ok(Self { listeners, addrs })
    }

    /// Addresses actually bound, in tuple order. Differs from the requested
    /// addresses when a tuple asked for port 0.
    pub fn listen_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }
}

struct WorkerSlot {
    id: usize,
    sender: mpsc::UnboundedSender<Handoff>,
    receiver: mpsc::UnboundedReceiver<Handoff>,
}

/// The set of workers serving every relay tuple.
pub struct Pool {
    workers: Vec<WorkerSlot>,
    registry: Registry,
    table: Arc<HashMap<RawFd, RelayTuple>>,
}

impl Pool {
    /// Create `max(1, n)` workers and replicate the listen-fd table to all
    /// of them. Nothing runs until [`Pool::run`].
    pub fn build(n: usize, registry: Registry) -> Self {
        let size = n.max(1);
        debug!(size, "Create worker pool");

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let (sender, receiver) = mpsc::unbounded_channel();
            workers.push(WorkerSlot {
                id,
                sender,
                receiver,
            });
        }

        let table: HashMap<RawFd, RelayTuple> = registry
            .listeners
            .iter()
            .map(|(listener, tuple)| (listener.as_raw_fd(), tuple.clone()))
            .collect();

        Self {
            workers,
            registry,
            table: Arc::new(table),
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Bound listen addresses, in tuple order.
    pub fn listen_addrs(&self) -> &[SocketAddr] {
        self.registry.listen_addrs()
    }

    /// Start every worker on its own OS thread and block until all exit.
    /// Worker 0 additionally runs the acceptor for every listener.
    pub fn run(self) -> Result<()> {
        let senders: Vec<_> = self.workers.iter().map(|w| w.sender.clone()).collect();
        let mut acceptor = Some(AcceptorParts {
            listeners: self
                .registry
                .listeners
                .into_iter()
                .map(|(listener, _)| (listener.as_raw_fd(), listener))
                .collect(),
            senders,
        });

        let mut handles = Vec::with_capacity(self.workers.len());
        for slot in self.workers {
            let WorkerSlot { id, sender, receiver } = slot;
            // Worker 0's dispatcher holds the only long-lived senders.
            drop(sender);

            let table = Arc::clone(&self.table);
            let parts = acceptor.take();
            let handle = thread::Builder::new()
                .name(format!("mux-worker-{}", id))
                .spawn(move || worker_main(id, receiver, table, parts))?;
            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.join();
        }

        Ok(())
    }
}
