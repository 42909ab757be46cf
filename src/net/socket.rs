//! Socket construction: listening sockets and outbound connections

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};

use crate::error::{Error, Result};

/// Listen backlog for every relay listener.
const LISTEN_BACKLOG: i32 = 1024;

/// Create a nonblocking listening socket bound to `addr`.
///
/// The socket carries `SO_REUSEADDR` and close-on-exec, ready to be handed
/// to a worker reactor. Port 0 asks the OS for an ephemeral port.
pub fn bind_listener(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let bind_err = |source| Error::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    Ok(socket.into())
}

/// Open an outbound connection to `dst`, optionally binding the local side
/// to `src` first. A `src` with port 0 gets an ephemeral port from the OS.
pub async fn connect_to(src: Option<SocketAddr>, dst: SocketAddr) -> std::io::Result<TcpStream> {
    let socket = if dst.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    if let Some(src) = src {
        socket.bind(src)?;
    }

    let stream = socket.connect(dst).await?;

    // Disable Nagle's algorithm for lower latency
    stream.set_nodelay(true)?;

    Ok(stream)
}
