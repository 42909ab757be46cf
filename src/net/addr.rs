//! Address-string grammar for listen/src/dst arguments
//!
//! Accepted forms:
//! - bare port `8080` (implies `0.0.0.0:8080`)
//! - bare IP `10.0.0.1`, `::1` or `[::1]` (port 0)
//! - `HOST:PORT` with a numeric host, including bracketed IPv6 `[::1]:8080`
//!
//! Hostnames are rejected: the relay performs no name resolution.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::{Error, Result};

/// Parse one address argument into a socket address.
pub fn parse_addr(s: &str) -> Result<SocketAddr> {
    // Full socket address first: covers "1.2.3.4:80" and "[::1]:80".
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }

    // Bare port shorthand for a wildcard IPv4 listen.
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        let port: u16 = s.parse().map_err(|_| Error::InvalidAddress(s.to_string()))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    // Bare IP, optionally bracketed, with port 0.
    let ip_text = s
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(s);
    if let Ok(ip) = ip_text.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }

    Err(Error::InvalidAddress(s.to_string()))
}
