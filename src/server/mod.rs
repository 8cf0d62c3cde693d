//! Network-facing interface server.
//!
//! Couples three things: the lifecycle state machine spanning the worker
//! threads, the framed control protocol demultiplexed out of the control
//! socket, and the dual-socket data path where acquisitions flow either
//! inline on the control connection or on a dedicated bulk socket,
//! mutually exclusive per session.

mod control;
mod data;
mod lifecycle;
mod net;
mod state;

pub use lifecycle::InterfaceServer;
pub use state::State;

use crate::error::{Error, Result};
use state::Shared;
use std::sync::atomic::Ordering;

/// Map a finished session body onto a lifecycle request.
///
/// Scope failures mean the device is unhealthy and destroy the server;
/// network and protocol failures stop it. Errors observed while a
/// disconnect is already tearing the session down are the expected wakeup
/// of a parked socket call and must not escalate.
pub(crate) fn finish_session(shared: &Shared, which: &str, result: Result<()>) {
    match result {
        Ok(()) => log::debug!("{} session finished", which),
        Err(e) if shared.disconnect_called.load(Ordering::SeqCst) => {
            log::debug!("{} session unblocked during shutdown: {}", which, e);
        }
        Err(Error::Scope(msg)) => {
            log::warn!("Scope failure in {} session, destroying server: {}", which, msg);
            shared.request(State::Destroyed);
        }
        Err(e) => {
            log::info!("{} session error, stopping server: {}", which, e);
            shared.request(State::Stopped);
        }
    }
}
