//! Server state machine vocabulary and the cross-thread cell block.
//!
//! # Single-writer discipline
//!
//! - `state` is written only by the lifecycle manager thread (enforced by
//!   a thread-identity check) and read by everyone.
//! - `requested` is written by the facade and by session threads asking
//!   for a transition; the manager only reads it.
//! - `connected` and `disconnect_called` are written by the manager
//!   (`disconnect`) and, for `connected`, once by the control session on
//!   accept.
//! - The socket and thread handle cells are written by the session
//!   threads while a session is being set up and drained by the manager
//!   during disconnect; the mutex covers the handoff, never a blocking
//!   call. Sessions keep their own socket (a dup'd handle) and park in
//!   `accept`/`recv` on it, so shutting down the cell's handle unblocks
//!   them without any lock being held across the block.

use crate::discovery::Advertiser;
use crate::scope::ScopeDriver;
use parking_lot::Mutex;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle, ThreadId};

/// Server lifecycle state.
///
/// The `*ing` states are transient and only ever set by the lifecycle
/// manager mid-transition. `Destroyed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Uninitialized = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
    Destroying = 5,
    Destroyed = 6,
}

impl State {
    fn from_u8(value: u8) -> State {
        match value {
            0 => State::Uninitialized,
            1 => State::Starting,
            2 => State::Started,
            3 => State::Stopping,
            4 => State::Stopped,
            5 => State::Destroying,
            _ => State::Destroyed,
        }
    }
}

/// Socket handles shared between the session threads and the manager.
///
/// Each cell holds a dup of the socket the owning session is actually
/// blocked on; shutting a dup down unblocks the original.
#[derive(Default)]
pub(crate) struct SocketCells {
    pub ctrl_listener: Option<TcpListener>,
    pub ctrl_stream: Option<TcpStream>,
    pub data_listener: Option<TcpListener>,
    pub data_stream: Option<TcpStream>,
}

type StateCallback = Box<dyn Fn(State) + Send>;

/// Everything the four threads share.
pub(crate) struct Shared {
    state: AtomicU8,
    requested: AtomicU8,
    pub connected: AtomicBool,
    pub disconnect_called: AtomicBool,
    /// True from `DATA_PORT` until the next disconnect; gates the inline
    /// data commands.
    pub data_session: AtomicBool,
    pub control_port: AtomicU16,
    pub data_port: AtomicU16,
    pub scope: Mutex<Box<dyn ScopeDriver>>,
    pub advertiser: Mutex<Box<dyn Advertiser>>,
    pub sockets: Mutex<SocketCells>,
    pub data_thread: Mutex<Option<JoinHandle<()>>>,
    state_callback: Mutex<Option<StateCallback>>,
    manager_thread: OnceLock<ThreadId>,
    pub service_name: String,
    pub service_type: String,
}

impl Shared {
    pub fn new(
        scope: Box<dyn ScopeDriver>,
        advertiser: Box<dyn Advertiser>,
        service_name: String,
        service_type: String,
    ) -> Self {
        Shared {
            state: AtomicU8::new(State::Uninitialized as u8),
            requested: AtomicU8::new(State::Stopped as u8),
            connected: AtomicBool::new(false),
            disconnect_called: AtomicBool::new(false),
            data_session: AtomicBool::new(false),
            control_port: AtomicU16::new(0),
            data_port: AtomicU16::new(0),
            scope: Mutex::new(scope),
            advertiser: Mutex::new(advertiser),
            sockets: Mutex::new(SocketCells::default()),
            data_thread: Mutex::new(None),
            state_callback: Mutex::new(None),
            manager_thread: OnceLock::new(),
            service_name,
            service_type,
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn requested(&self) -> State {
        State::from_u8(self.requested.load(Ordering::SeqCst))
    }

    /// Ask the lifecycle manager for a transition. Non-blocking; the
    /// manager picks the request up on its next tick.
    pub fn request(&self, state: State) {
        self.requested.store(state as u8, Ordering::SeqCst);
    }

    /// Record the calling thread as the lifecycle manager. Called once,
    /// first thing, on the manager thread itself.
    pub fn adopt_manager_thread(&self) {
        let _ = self.manager_thread.set(thread::current().id());
    }

    /// Abort if called from any thread but the lifecycle manager. The
    /// state machine is compromised if this ever fires.
    pub fn assert_manager_thread(&self, what: &str) {
        if self.manager_thread.get().copied() != Some(thread::current().id()) {
            log::error!("{} attempted from outside the state manager thread", what);
            panic!("{} attempted from outside the state manager thread", what);
        }
    }

    /// Publish a new state and fire the state-changed callback.
    /// Manager thread only.
    pub fn set_state(&self, state: State) {
        self.assert_manager_thread("state change");
        self.state.store(state as u8, Ordering::SeqCst);
        log::debug!("server state -> {:?}", state);
        if let Some(callback) = self.state_callback.lock().as_ref() {
            callback(state);
        }
    }

    pub fn set_state_callback(&self, callback: StateCallback) {
        *self.state_callback.lock() = Some(callback);
    }

    /// Reset the per-session cells before a fresh start. Dropping the
    /// socket cells here also releases any handle a session thread stored
    /// after the previous disconnect had already drained them.
    pub fn reset_session_cells(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnect_called.store(false, Ordering::SeqCst);
        self.data_session.store(false, Ordering::SeqCst);
        self.control_port.store(0, Ordering::SeqCst);
        self.data_port.store(0, Ordering::SeqCst);
        *self.sockets.lock() = SocketCells::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            State::Uninitialized,
            State::Starting,
            State::Started,
            State::Stopping,
            State::Stopped,
            State::Destroying,
            State::Destroyed,
        ] {
            assert_eq!(State::from_u8(state as u8), state);
        }
    }
}
