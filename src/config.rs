//! Relay configuration: tuples, the relay-list grammar, and validation

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::net::parse_addr;

/// One relay policy: accept on `listen`, connect to `dst`, optionally
/// binding the outbound socket to `src`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTuple {
    /// Local address to accept clients on. Port 0 means OS-assigned.
    pub listen: SocketAddr,

    /// Source address for outbound connections, if administratively pinned.
    pub src: Option<SocketAddr>,

    /// Upstream to forward every accepted connection to.
    pub dst: SocketAddr,
}

impl RelayTuple {
    pub fn new(listen: SocketAddr, src: Option<SocketAddr>, dst: SocketAddr) -> Self {
        Self { listen, src, dst }
    }

    /// Check the boundary contract: `dst` must name a concrete peer.
    pub fn validate(&self) -> Result<()> {
        if self.dst.port() == 0 {
            return Err(Error::Config(format!(
                "dst port must not be 0: {}",
                self.dst
            )));
        }
        if self.dst.ip().is_unspecified() {
            return Err(Error::Config(format!(
                "dst address must not be a wildcard: {}",
                self.dst
            )));
        }
        Ok(())
    }
}

/// Parse a relay list: `/`-separated tuples, each a `listen,src,dst` triple
/// or a `listen,dst` pair.
pub fn parse_relay_list(s: &str) -> Result<Vec<RelayTuple>> {
    let mut tuples = Vec::new();

    for part in s.split('/').filter(|p| !p.is_empty()) {
        let fields: Vec<&str> = part.split(',').collect();
        let tuple = match *fields.as_slice() {
            [listen, dst] => RelayTuple::new(parse_addr(listen)?, None, parse_addr(dst)?),
            [listen, src, dst] => {
                RelayTuple::new(parse_addr(listen)?, Some(parse_addr(src)?), parse_addr(dst)?)
            }
            _ => {
                return Err(Error::Config(format!("invalid relay tuple: '{}'", part)));
            }
        };
        tuples.push(tuple);
    }

    if tuples.is_empty() {
        return Err(Error::Config(format!("empty relay list: '{}'", s)));
    }

    Ok(tuples)
}

/// Fully validated process configuration, handed to the pool.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay tuples to serve concurrently.
    pub tuples: Vec<RelayTuple>,

    /// I/O worker count; clamped to at least 1 by the pool.
    pub workers: usize,

    /// Rotating log file path; stderr when absent.
    pub log_file: Option<PathBuf>,

    /// Enable trace logging.
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.tuples.is_empty() {
            return Err(Error::Config("no relay tuple configured".to_string()));
        }
        for tuple in &self.tuples {
            tuple.validate()?;
        }
        Ok(())
    }
}
