//! TarangIO - network interface daemon for a USB-attached oscilloscope
//!
//! This library exposes the scope to a single remote client: a framed
//! request/reply control protocol plus a bulk acquisition stream over a
//! second TCP socket, with the server advertised via mDNS until a client
//! claims it.
//!
//! ## Features
//!
//! The "mock" device type runs the full network stack against a simulated
//! scope, no hardware required.

pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod scope;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use server::{InterfaceServer, State};
