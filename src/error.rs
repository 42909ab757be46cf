//! Error types for tcpmux

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for tcpmux
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for tcpmux
pub type Result<T> = std::result::Result<T, Error>;
