//! Server facade and the lifecycle state manager.
//!
//! The manager thread is the single authority over the `state` cell. It
//! polls the requested state on a 100 ms tick and performs transitions:
//!
//! ```text
//! Stopped ──Starting──▶ Started ──Stopping──▶ Stopped
//!    any  ──Destroying─▶ Destroyed (absorbing)
//! ```
//!
//! Teardown unblocks session threads by shutting their sockets down, then
//! joins them with a bounded wait. The facade methods only write the
//! requested-state cell and return immediately; callers observe progress
//! through [`InterfaceServer::state`] or the state-changed callback.

use crate::config::NetworkConfig;
use crate::discovery::Advertiser;
use crate::error::Result;
use crate::scope::ScopeDriver;
use crate::server::state::{Shared, State};
use crate::server::{control, net};
use crossbeam_channel::bounded;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle manager poll tick.
const TICK: Duration = Duration::from_millis(100);

/// How long the manager waits for the control session to bind its
/// listeners before declaring the start failed.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Soft timeout when joining a session thread after its sockets are shut.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Network-facing interface server for one scope device.
///
/// Accepts a single remote client over TCP, advertises itself via mDNS
/// until the scope is claimed, and relays the framed control protocol
/// plus the bulk acquisition stream between client and scope.
///
/// # Examples
///
/// ```no_run
/// use tarang_io::config::NetworkConfig;
/// use tarang_io::discovery::MdnsAdvertiser;
/// use tarang_io::scope::MockScope;
/// use tarang_io::server::{InterfaceServer, State};
///
/// # fn main() -> tarang_io::Result<()> {
/// let advertiser = MdnsAdvertiser::new(Default::default())?;
/// let server = InterfaceServer::new(
///     Box::new(MockScope::new()),
///     Box::new(advertiser),
///     NetworkConfig::default(),
/// )?;
/// server.set_state_callback(|state| log::info!("server is now {:?}", state));
/// server.start();
/// while server.state() != State::Started {
///     std::thread::sleep(std::time::Duration::from_millis(50));
/// }
/// # Ok(())
/// # }
/// ```
pub struct InterfaceServer {
    shared: Arc<Shared>,
    manager: Option<JoinHandle<()>>,
}

impl InterfaceServer {
    /// Create the server and spawn its lifecycle manager thread. The
    /// server starts `Uninitialized` and settles in `Stopped` on the
    /// first manager tick; call [`start`](Self::start) to go live.
    pub fn new(
        scope: Box<dyn ScopeDriver>,
        advertiser: Box<dyn Advertiser>,
        network: NetworkConfig,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(
            scope,
            advertiser,
            network.service_name,
            network.service_type,
        ));

        let manager_shared = Arc::clone(&shared);
        let manager = thread::Builder::new()
            .name("tarang.server.state-manager".to_string())
            .spawn(move || {
                StateManager::new(manager_shared).run();
            })?;

        Ok(InterfaceServer {
            shared,
            manager: Some(manager),
        })
    }

    /// Request the `Started` state. Non-blocking.
    pub fn start(&self) {
        self.shared.request(State::Started);
    }

    /// Request the `Stopped` state. Non-blocking.
    pub fn stop(&self) {
        self.shared.request(State::Stopped);
    }

    /// Request the `Destroyed` state. Non-blocking and irreversible.
    pub fn destroy(&self) {
        self.shared.request(State::Destroyed);
    }

    /// Last state published by the lifecycle manager. May lag a request
    /// by up to one manager tick.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Port of the control listener, once a session has bound it.
    pub fn control_port(&self) -> Option<u16> {
        match self.shared.control_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    /// Port of the data listener, once a session has bound it. Changes on
    /// every restart; clients learn it through the `DATA_PORT` command.
    pub fn data_port(&self) -> Option<u16> {
        match self.shared.data_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    /// Install the state-changed callback. Fired from the lifecycle
    /// manager thread with the newly published state.
    pub fn set_state_callback(&self, callback: impl Fn(State) + Send + 'static) {
        self.shared.set_state_callback(Box::new(callback));
    }
}

impl Drop for InterfaceServer {
    fn drop(&mut self) {
        while self.shared.state() != State::Destroyed {
            self.shared.request(State::Destroyed);
            if self.manager.as_ref().map_or(true, |m| m.is_finished()) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        if let Some(manager) = self.manager.take() {
            let _ = manager.join();
        }
    }
}

/// The lifecycle manager: sole writer of the `state` cell.
struct StateManager {
    shared: Arc<Shared>,
    control_thread: Option<JoinHandle<()>>,
}

impl StateManager {
    fn new(shared: Arc<Shared>) -> Self {
        StateManager {
            shared,
            control_thread: None,
        }
    }

    fn run(mut self) {
        self.shared.adopt_manager_thread();

        while self.shared.state() != State::Destroyed {
            thread::sleep(TICK);

            let current = self.shared.state();
            if matches!(
                current,
                State::Starting | State::Stopping | State::Destroying
            ) {
                // transient states never survive a tick; seeing one here
                // means another thread wrote the state cell
                panic!("server state transitioning outside of the state manager thread");
            }

            let next = self.shared.requested();
            if next == current {
                continue;
            }

            match next {
                State::Started => {
                    log::debug!("=== Starting server =====");
                    self.start_server();
                }
                State::Stopped => {
                    log::debug!("=== Stopping server =====");
                    self.shared.set_state(State::Stopping);
                    self.disconnect();
                    self.shared.set_state(State::Stopped);
                    log::debug!("===== Stopped ===");
                }
                State::Destroyed => {
                    log::debug!("=== Destroying server ===");
                    self.shared.set_state(State::Destroying);
                    self.disconnect();
                    self.shared.set_state(State::Destroyed);
                    log::debug!("===== Destroyed ===");
                }
                other => {
                    // facade and sessions only ever request the three
                    // stable states; anything else is a programming error
                    panic!("illegal target state requested: {:?}", other);
                }
            }
        }
    }

    /// `Stopped → Starting → Started`: spawn the control session and wait
    /// for it to bind both listeners.
    fn start_server(&mut self) {
        self.shared.set_state(State::Starting);
        self.shared.reset_session_cells();

        let (ready_tx, ready_rx) = bounded(1);
        match control::spawn(Arc::clone(&self.shared), ready_tx) {
            Ok(handle) => self.control_thread = Some(handle),
            Err(e) => {
                log::error!("Failed to start server: {}", e);
                self.abort_start();
                return;
            }
        }

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(data_port) => {
                log::debug!("Data listener ready on port {}", data_port);
                self.shared.set_state(State::Started);
                log::debug!("===== Started ===");
            }
            Err(_) => {
                log::error!("Failed to start server: control session never bound its listeners");
                self.abort_start();
            }
        }
    }

    /// Unwind a failed start and settle back in `Stopped`.
    fn abort_start(&mut self) {
        self.disconnect();
        self.shared.set_state(State::Stopped);
        self.shared.request(State::Stopped);
    }

    /// Tear the sessions down: unregister the advertiser, then clean the
    /// control pair and the data pair. Idempotent per session; a second
    /// call while a client is still connected is a correctness failure.
    fn disconnect(&mut self) {
        self.shared.assert_manager_thread("disconnect");

        if self.shared.disconnect_called.swap(true, Ordering::SeqCst) {
            if self.shared.connected.load(Ordering::SeqCst) {
                log::error!("Disconnect called twice while a client is connected");
            }
            return;
        }
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Err(e) = self.shared.advertiser.lock().unregister() {
            log::warn!("Failed to unregister service: {}", e);
        }

        log::debug!("Closing control thread/socket");
        let (listener, stream) = {
            let mut cells = self.shared.sockets.lock();
            (cells.ctrl_listener.take(), cells.ctrl_stream.take())
        };
        clean_socket_thread("control", self.control_thread.take(), listener, stream);

        log::debug!("Closing data thread/socket");
        let (listener, stream) = {
            let mut cells = self.shared.sockets.lock();
            (cells.data_listener.take(), cells.data_stream.take())
        };
        let data_thread = self.shared.data_thread.lock().take();
        clean_socket_thread("data", data_thread, listener, stream);

        self.shared.data_session.store(false, Ordering::SeqCst);
    }
}

/// Shut the socket pair down, then join the worker. The shutdowns are
/// what unblock a thread parked in `accept`/`recv`/`send`; the join has a
/// soft timeout because a thread stuck inside a scope transfer cannot be
/// interrupted from here.
fn clean_socket_thread(
    which: &str,
    thread: Option<JoinHandle<()>>,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
) {
    if let Some(listener) = listener {
        if let Err(e) = net::shutdown_listener(&listener) {
            log::debug!("{} listener shutdown: {}", which, e);
        }
    }
    if let Some(stream) = stream {
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            log::debug!("{} socket shutdown: {}", which, e);
        }
    }

    let Some(thread) = thread else {
        log::debug!("No {} thread to join", which);
        return;
    };
    if join_within(&thread, JOIN_TIMEOUT) {
        let _ = thread.join();
        return;
    }
    log::warn!(
        "{} thread did not exit within {:?}; its sockets are shut, waiting once more",
        which,
        JOIN_TIMEOUT
    );
    if join_within(&thread, JOIN_TIMEOUT) {
        let _ = thread.join();
        return;
    }
    log::error!("{} thread failed to exit; abandoning it", which);
}

fn join_within(thread: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if thread.is_finished() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    thread.is_finished()
}
