//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [device]
//! type = "mock"
//! name = "SmartScope simulator"
//!
//! [device.simulation]
//! serial = ""              # empty = use the interface server's fallback
//! pic_firmware_version = 1024
//! amplitude = 0.8          # waveform amplitude, 0.0..=1.0
//! noise = 0.02             # uniform noise amplitude
//! seed = 7                 # 0 = random entropy
//! frame_interval_ms = 5    # pacing of simulated acquisitions
//!
//! [network]
//! service_name = "SmartScope []"
//! service_type = "_sstcp._tcp.local."
//!
//! [network.txt]
//! # free-form TXT record properties
//! ```
//!
//! See `tarangio.toml` for a complete example.
//!
//! The bracket content of `service_name` identifies the bench the scope is
//! attached to (e.g. `"SmartScope [lab-2]"`); clients display it verbatim.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Device configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device type identifier. Valid values: "mock".
    #[serde(rename = "type")]
    pub device_type: String,

    /// Human-readable device name (used for logging only)
    pub name: String,

    /// Simulation parameters, used by the "mock" device type
    #[serde(default)]
    pub simulation: Option<SimulationConfig>,
}

/// Simulated scope parameters
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Device serial number. Empty mimics a factory-fresh unit and makes
    /// the server answer with its fallback serial.
    #[serde(default)]
    pub serial: String,

    /// PIC firmware version word
    #[serde(default = "default_pic_version")]
    pub pic_firmware_version: u32,

    /// Waveform amplitude as a fraction of full scale (0.0..=1.0)
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,

    /// Uniform noise amplitude added to each sample
    #[serde(default = "default_noise")]
    pub noise: f32,

    /// RNG seed; 0 uses random entropy
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Milliseconds between simulated acquisitions
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

fn default_pic_version() -> u32 {
    0x0400
}
fn default_amplitude() -> f32 {
    0.8
}
fn default_noise() -> f32 {
    0.02
}
fn default_seed() -> u64 {
    7
}
fn default_frame_interval_ms() -> u64 {
    5
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            serial: String::new(),
            pic_firmware_version: default_pic_version(),
            amplitude: default_amplitude(),
            noise: default_noise(),
            seed: default_seed(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// Network configuration for service advertisement
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Advertised instance name. The bracket content is free-form.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// DNS-SD service type the client browses for
    #[serde(default = "default_service_type")]
    pub service_type: String,

    /// TXT record properties published with the service
    #[serde(default)]
    pub txt: HashMap<String, String>,
}

fn default_service_name() -> String {
    "SmartScope []".to_string()
}
fn default_service_type() -> String {
    "_sstcp._tcp.local.".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            service_name: default_service_name(),
            service_type: default_service_type(),
            txt: HashMap::new(),
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Validation
    ///
    /// For the "mock" device:
    /// - `amplitude` must be within 0.0..=1.0
    /// - `noise` must be non-negative
    /// - `frame_interval_ms` must be non-zero (a zero interval turns the
    ///   data path into a busy loop)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        match config.device.device_type.as_str() {
            "mock" => {
                let sim = config.device.simulation.clone().unwrap_or_default();
                if !(0.0..=1.0).contains(&sim.amplitude) {
                    return Err(Error::Config(format!(
                        "amplitude must be within 0.0..=1.0 (got {})",
                        sim.amplitude
                    )));
                }
                if sim.noise < 0.0 {
                    return Err(Error::Config("noise must be non-negative".to_string()));
                }
                if sim.frame_interval_ms == 0 {
                    return Err(Error::Config(
                        "frame_interval_ms must be non-zero".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::UnknownDevice(other.to_string()));
            }
        }

        Ok(config)
    }
}
