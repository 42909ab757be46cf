//! tcpmux - A multi-tenant, multi-threaded TCP relay
//!
//! # Architecture
//!
//! ```text
//! Listener (one per relay tuple)
//! → Acceptor on worker 0
//! → round-robin dispatch over per-worker wakeup channels
//! → Worker (one OS thread + one reactor each)
//! → Relay (two directional halves, each with a bounded buffer)
//! ```
//!
//! ## Core Principles
//!
//! - Bytes never cross workers: a relay lives and dies on the one thread
//!   that owns it
//! - Backpressure via a bounded per-direction buffer, not unbounded queues
//! - Errors in one relay never touch another relay or worker; only
//!   configuration and listener setup can fail the process
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── config.rs  # Relay tuples, list grammar, validation
//! ├── net/       # Address grammar, socket construction
//! ├── pool/      # Registry, worker pool, acceptor, dispatch policy
//! └── relay/     # Per-connection state machine
//! ```

pub mod config;
pub mod error;
pub mod net;
pub mod pool;
pub mod relay;

// Re-exports for convenience
pub use config::{Config, RelayTuple};
pub use error::{Error, Result};
pub use pool::{Pool, Registry};
pub use relay::Relay;
