//! Error types for TarangIO
//!
//! # Error Recovery Strategies
//!
//! Different error types require different recovery approaches:
//!
//! ## Session-Scoped Errors (Server Returns to `Stopped`)
//!
//! - **`Io`**: A socket operation (`bind`, `accept`, `recv`, `send`) failed
//!   outside of a deliberate shutdown. The active session is torn down and
//!   the server returns to `Stopped`; a later `start()` re-runs the full
//!   session setup with fresh sockets, threads, and buffers.
//!
//! - **`Protocol`**: The client sent an unknown command, an undersized
//!   payload, or an inline data request while the bulk data socket is
//!   streaming. The session is terminated without a reply.
//!
//! - **`Advertiser`**: The zeroconf daemon rejected a registration. Fatal
//!   to the session start; surfaces exactly like a socket setup failure.
//!
//! ## Device Errors (Server Goes to `Destroyed`)
//!
//! - **`Scope`**: The scope driver raised a USB I/O failure. The device is
//!   presumed unhealthy, so the server escalates past `Stopped` straight to
//!   the absorbing `Destroyed` state. Restart requires a new server around
//!   a fresh driver handle.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: Configuration file missing or invalid.
//! - **`UnknownDevice`**: Device type not recognized. Check the config.

use thiserror::Error;

/// Errors that can occur in TarangIO
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scope I/O error: {0}")]
    Scope(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Advertiser error: {0}")]
    Advertiser(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown device type: {0}")]
    UnknownDevice(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
