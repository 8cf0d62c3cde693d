//! ScopeDriver trait - the abstraction over the USB-attached oscilloscope.
//!
//! To support new scope hardware, implement this trait and register it in
//! [`create_scope`]. See [`mock::MockScope`] for a complete implementation
//! example.

pub mod mock;

pub use mock::MockScope;

use crate::config::Config;
use crate::error::{Error, Result};

/// Hardware abstraction trait for the scope device.
///
/// # Lifecycle
/// 1. Created via [`create_scope`] based on config
/// 2. Handed to the interface server, which serialises all access
/// 3. `Drop` releases the USB handle when the daemon shuts down
///
/// # Threading
/// All operations are synchronous and may block on USB transfers;
/// [`get_acquisition`](Self::get_acquisition) in particular blocks until
/// the scope produces a buffer. The server calls the driver from its
/// session threads under a single lock, so implementations need `Send`
/// but not `Sync`.
///
/// # Errors
/// Device-level I/O failures must surface as [`Error::Scope`]; the server
/// treats them as evidence the hardware is unhealthy and destroys the
/// session rather than merely stopping it.
pub trait ScopeDriver: Send {
    /// Read the device serial number. May be empty on factory-fresh units.
    fn serial(&mut self) -> Result<String>;

    /// Read the PIC firmware version word.
    fn pic_firmware_version(&mut self) -> Result<u32>;

    /// Discard any samples buffered in the device data pipe.
    fn flush_data_pipe(&mut self) -> Result<()>;

    /// Load an FPGA bitstream into the device.
    fn flash_fpga(&mut self, firmware: &[u8]) -> Result<()>;

    /// Read up to `out.len()` bytes of sample data. Returns the byte
    /// count actually produced.
    fn get_data(&mut self, out: &mut [u8]) -> Result<usize>;

    /// Block until the scope produces an acquisition, filling `out` with
    /// up to `out.len()` bytes. May return 0 between triggers.
    fn get_acquisition(&mut self, out: &mut [u8]) -> Result<usize>;

    /// Write `data` to a controller register.
    fn set_controller_register(&mut self, ctrl: u8, addr: u16, data: &[u8]) -> Result<()>;

    /// Read `out.len()` bytes from a controller register.
    fn get_controller_register(&mut self, ctrl: u8, addr: u16, out: &mut [u8]) -> Result<()>;
}

/// Create a scope driver based on configuration.
pub fn create_scope(config: &Config) -> Result<Box<dyn ScopeDriver>> {
    match config.device.device_type.as_str() {
        "mock" => {
            let sim = config.device.simulation.clone().unwrap_or_default();
            Ok(Box::new(MockScope::from_config(&sim)))
        }
        other => Err(Error::UnknownDevice(other.to_string())),
    }
}
