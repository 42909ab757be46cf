//! Relay - a single client-to-server pairing managed end to end
//!
//! A relay owns the two sockets of one proxied connection and two
//! directional halves, each an independent pump with its own bounded
//! buffer. The relay retires when both halves have seen EOF and drained,
//! or immediately when either half hits a permanent socket error.
//!
//! All state is worker-local: a relay lives and dies on the one thread
//! that owns it.

mod half;

pub use half::{MAX_PENDING, READ_CHUNK};

use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::TcpStream;
use tracing::{debug, info, trace};

use self::half::{pump, HalfCtx, HalfStat};

/// A live client/server connection pairing.
pub struct Relay {
    client: TcpStream,
    server: TcpStream,
    client_laddr: SocketAddr,
    client_raddr: SocketAddr,
    server_laddr: SocketAddr,
    server_raddr: SocketAddr,
    started_at: Instant,
}

impl Relay {
    pub fn new(
        client: TcpStream,
        client_laddr: SocketAddr,
        client_raddr: SocketAddr,
        server: TcpStream,
        server_laddr: SocketAddr,
        server_raddr: SocketAddr,
    ) -> Self {
        trace!(
            from_remote = %client_raddr,
            from_local = %client_laddr,
            to_local = %server_laddr,
            to_remote = %server_raddr,
            "Open relay"
        );

        Self {
            client,
            server,
            client_laddr,
            client_raddr,
            server_laddr,
            server_raddr,
            started_at: Instant::now(),
        }
    }

    /// Pump both directions to completion, then log the final accounting.
    ///
    /// Orderly close: each half drains its buffer after EOF and propagates
    /// the FIN via shutdown, and the relay ends once both have. Permanent
    /// error in either half: the sibling pump is dropped mid-flight, both
    /// sockets close, and undelivered bytes are discarded.
    pub async fn run(self) {
        let upload = HalfStat::default();
        let download = HalfStat::default();

        let up_ctx = HalfCtx {
            read_laddr: self.client_laddr,
            read_raddr: self.client_raddr,
            write_laddr: self.server_laddr,
            write_raddr: self.server_raddr,
        };
        let down_ctx = HalfCtx {
            read_laddr: self.server_laddr,
            read_raddr: self.server_raddr,
            write_laddr: self.client_laddr,
            write_raddr: self.client_raddr,
        };

        let (client_rd, client_wr) = self.client.into_split();
        let (server_rd, server_wr) = self.server.into_split();

        // Errors are logged inside the failing pump; here only the outcome
        // matters for the close log.
        let result = tokio::try_join!(
            pump(client_rd, server_wr, up_ctx, &upload),
            pump(server_rd, client_wr, down_ctx, &download),
        );

        debug!(
            from = %self.client_raddr,
            to = %self.server_raddr,
            orderly = result.is_ok(),
            "Close relay"
        );

        info!(
            from = %self.client_raddr,
            to = %self.server_raddr,
            in_bytes = upload.bytes_read.get(),
            out_bytes = download.bytes_read.get(),
            dur_sec = self.started_at.elapsed().as_secs_f64(),
            "Close conn"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) =
            tokio::join!(TcpStream::connect(addr), listener.accept());
        (connected.unwrap(), accepted.unwrap().0)
    }

    fn relay_over(client: TcpStream, server: TcpStream) -> Relay {
        let client_laddr = client.local_addr().unwrap();
        let client_raddr = client.peer_addr().unwrap();
        let server_laddr = server.local_addr().unwrap();
        let server_raddr = server.peer_addr().unwrap();
        Relay::new(client, client_laddr, client_raddr, server, server_laddr, server_raddr)
    }

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (mut client_peer, client_mux) = pair().await;
        let (server_mux, mut server_peer) = pair().await;

        let relay = relay_over(client_mux, server_mux);

        let peers = async {
            client_peer.write_all(b"hello").await.unwrap();
            client_peer.shutdown().await.unwrap();

            let mut upstream = Vec::new();
            server_peer.read_to_end(&mut upstream).await.unwrap();
            assert_eq!(upstream, b"hello");

            server_peer.write_all(b"world").await.unwrap();
            server_peer.shutdown().await.unwrap();

            let mut downstream = Vec::new();
            client_peer.read_to_end(&mut downstream).await.unwrap();
            assert_eq!(downstream, b"world");
        };

        tokio::join!(relay.run(), peers);
    }

    #[tokio::test]
    async fn test_relay_survives_simultaneous_close() {
        let (client_peer, client_mux) = pair().await;
        let (server_mux, server_peer) = pair().await;

        let relay = relay_over(client_mux, server_mux);

        drop(client_peer);
        drop(server_peer);

        // Both halves see EOF with empty buffers; the relay must still
        // retire cleanly.
        relay.run().await;
    }
}
