//! Acceptor: accept loops on worker 0 and the round-robin dispatch policy

use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, trace};

use super::worker::Handoff;

/// Round-robin dispatcher over the worker wakeup channels.
///
/// Lives on worker 0 and is shared by every accept task on that thread. The
/// cursor is plain `Cell` state: dispatch never leaves the acceptor thread.
pub(crate) struct Dispatcher {
    senders: Vec<UnboundedSender<Handoff>>,
    cursor: Cell<u64>,
}

impl Dispatcher {
    pub(crate) fn new(senders: Vec<UnboundedSender<Handoff>>) -> Self {
        Self {
            senders,
            cursor: Cell::new(0),
        }
    }

    /// Pick the next worker, skipping worker 0 when the pool has more than
    /// one worker so the accept path stays lightly loaded.
    fn next_worker(&self) -> usize {
        let size = self.senders.len() as u64;
        self.cursor.set(self.cursor.get().wrapping_add(1));
        let mut target = (self.cursor.get() % size) as usize;
        if size > 1 && target == 0 {
            self.cursor.set(self.cursor.get().wrapping_add(1));
            target = (self.cursor.get() % size) as usize;
        }
        target
    }

    /// Hand an accepted connection to a worker. Fire-and-forget: when the
    /// target channel is gone the handoff is dropped here, which closes the
    /// client socket.
    pub(crate) fn dispatch(&self, listen_fd: RawFd, stream: std::net::TcpStream) {
        let target = self.next_worker();
        trace!(id = target, "Notify worker");
        if self.senders[target].send(Handoff { listen_fd, stream }).is_err() {
            error!(id = target, "Fail to notify worker");
        }
    }
}

/// Accept until the listener dies. Per-connection errors are logged and
/// skipped; they never tear the listener down.
pub(crate) async fn accept_loop(listener: TcpListener, listen_fd: RawFd, dispatcher: Rc<Dispatcher>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                // Detach from this reactor; the target worker re-registers
                // the fd with its own.
                match stream.into_std() {
                    Ok(stream) => dispatcher.dispatch(listen_fd, stream),
                    Err(e) => error!(err = %e, fd = listen_fd, "Fail to detach accepted conn"),
                }
            }
            Err(e) => error!(err = %e, fd = listen_fd, "Fail to accept"),
        }
    }
}
