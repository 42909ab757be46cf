//! Network primitives
//!
//! - addr: the address-string grammar accepted on the command line
//! - socket: listener construction and outbound connect

pub mod addr;
pub mod socket;

pub use addr::parse_addr;
pub use socket::{bind_listener, connect_to};
