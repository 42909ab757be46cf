//! Directional pump: one half of a relay
//!
//! Each half reads from one socket into a bounded FIFO and drains the FIFO
//! into the opposite socket. Reads stay armed only while the FIFO is at or
//! below [`MAX_PENDING`], so a fast producer is throttled through the TCP
//! receive window once a slow consumer falls behind.

use std::cell::Cell;
use std::io::ErrorKind;
use std::net::SocketAddr;

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, error};

/// Buffered bytes per direction above which reads are parked.
pub const MAX_PENDING: usize = 1024 * 1024;

/// Largest single read; one read never appends more than this to the FIFO.
pub const READ_CHUNK: usize = 64 * 1024;

/// Byte counters for one direction, shared with the owning relay.
///
/// Plain `Cell`s: both halves of a relay run inside one task on one worker
/// thread.
#[derive(Debug, Default)]
pub(crate) struct HalfStat {
    pub(crate) bytes_read: Cell<u64>,
    pub(crate) bytes_written: Cell<u64>,
}

/// Socket endpoints of one direction, for error and half-close logs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HalfCtx {
    pub(crate) read_laddr: SocketAddr,
    pub(crate) read_raddr: SocketAddr,
    pub(crate) write_laddr: SocketAddr,
    pub(crate) write_raddr: SocketAddr,
}

/// Reads are armed while EOF has not been seen and the FIFO has room.
fn read_armed(read_done: bool, pending: usize) -> bool {
    !read_done && pending <= MAX_PENDING
}

/// `EAGAIN`/`EINTR`: readiness was speculative, wait for the next event.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Forward bytes from `rd` to `wr` until EOF has been seen and the FIFO has
/// drained, then shut down the write side so the peer observes the FIN only
/// after every buffered byte.
///
/// A permanent error on either socket aborts the pump with `Err`; the
/// caller tears the whole relay down.
pub(crate) async fn pump(
    rd: OwnedReadHalf,
    mut wr: OwnedWriteHalf,
    ctx: HalfCtx,
    stat: &HalfStat,
) -> std::io::Result<()> {
    let mut pending = BytesMut::with_capacity(READ_CHUNK);
    let mut read_done = false;

    loop {
        if read_done && pending.is_empty() {
            wr.shutdown().await?;
            return Ok(());
        }

        tokio::select! {
            ready = rd.readable(), if read_armed(read_done, pending.len()) => {
                ready?;
                match rd.try_read_buf(&mut (&mut pending).limit(READ_CHUNK)) {
                    Ok(0) => {
                        debug!(
                            read_remote = %ctx.read_raddr,
                            write_remote = %ctx.write_raddr,
                            "Close half conn"
                        );
                        read_done = true;
                    }
                    Ok(n) => stat.bytes_read.set(stat.bytes_read.get() + n as u64),
                    Err(e) if is_transient(&e) => {}
                    Err(e) => {
                        error!(
                            err = %e,
                            laddr = %ctx.read_laddr,
                            raddr = %ctx.read_raddr,
                            "Fail to read"
                        );
                        return Err(e);
                    }
                }
            }
            ready = wr.writable(), if !pending.is_empty() => {
                ready?;
                match wr.try_write(&pending) {
                    Ok(n) => {
                        stat.bytes_written.set(stat.bytes_written.get() + n as u64);
                        pending.advance(n);
                    }
                    Err(e) if is_transient(&e) => {}
                    Err(e) => {
                        error!(
                            err = %e,
                            laddr = %ctx.write_laddr,
                            raddr = %ctx.write_raddr,
                            "Fail to write"
                        );
                        return Err(e);
                    }
                }
            }
        }
    }
}
