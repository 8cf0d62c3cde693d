//! Mock scope for testing and hardware-free operation.
//!
//! Produces a synthetic sine waveform with configurable amplitude and
//! uniform noise, paced at a configurable frame interval so the data path
//! behaves like a real device instead of a busy loop. Handles are `Clone`;
//! tests keep a clone to inject failures and inspect register traffic.

use super::ScopeDriver;
use crate::config::SimulationConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

/// Samples per full waveform period.
const WAVE_PERIOD: f32 = 512.0;

/// Mock scope device
#[derive(Clone)]
pub struct MockScope {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    serial: String,
    pic_firmware_version: u32,
    amplitude: f32,
    noise: f32,
    frame_interval: Duration,
    rng: SmallRng,
    phase: f32,
    registers: BTreeMap<(u8, u16), u8>,
    register_writes: Vec<(u8, u16, Vec<u8>)>,
    flush_count: u32,
    flashed_bytes: Option<usize>,
    fail_acquisition: bool,
    fail_data: bool,
}

impl MockScope {
    /// Create a mock scope from simulation config.
    ///
    /// A seed of 0 uses random entropy; any other value is reproducible.
    pub fn from_config(sim: &SimulationConfig) -> Self {
        let rng = if sim.seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(sim.seed)
        };
        MockScope {
            inner: Arc::new(Mutex::new(Inner {
                serial: sim.serial.clone(),
                pic_firmware_version: sim.pic_firmware_version,
                amplitude: sim.amplitude,
                noise: sim.noise,
                frame_interval: Duration::from_millis(sim.frame_interval_ms),
                rng,
                phase: 0.0,
                registers: BTreeMap::new(),
                register_writes: Vec::new(),
                flush_count: 0,
                flashed_bytes: None,
                fail_acquisition: false,
                fail_data: false,
            })),
        }
    }

    pub fn new() -> Self {
        Self::from_config(&SimulationConfig::default())
    }

    /// Make the next acquisition calls fail with a scope I/O error.
    pub fn set_acquisition_failure(&self, fail: bool) {
        self.inner.lock().fail_acquisition = fail;
    }

    /// Make the next inline data reads fail with a scope I/O error.
    pub fn set_data_failure(&self, fail: bool) {
        self.inner.lock().fail_data = fail;
    }

    /// Register writes observed so far, as `(ctrl, addr, data)` tuples.
    pub fn register_writes(&self) -> Vec<(u8, u16, Vec<u8>)> {
        self.inner.lock().register_writes.clone()
    }

    /// How many times the data pipe was flushed.
    pub fn flush_count(&self) -> u32 {
        self.inner.lock().flush_count
    }

    /// Byte count of the last flashed firmware image, if any.
    pub fn flashed_bytes(&self) -> Option<usize> {
        self.inner.lock().flashed_bytes
    }
}

impl Default for MockScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Fill `out` with the next slice of the simulated waveform.
    fn fill_waveform(&mut self, out: &mut [u8]) {
        let step = TAU / WAVE_PERIOD;
        for sample in out.iter_mut() {
            let clean = self.amplitude * self.phase.sin();
            let noisy = clean + self.noise * (self.rng.gen::<f32>() * 2.0 - 1.0);
            *sample = (128.0 + 127.0 * noisy.clamp(-1.0, 1.0)) as u8;
            self.phase = (self.phase + step) % TAU;
        }
    }
}

impl ScopeDriver for MockScope {
    fn serial(&mut self) -> Result<String> {
        Ok(self.inner.lock().serial.clone())
    }

    fn pic_firmware_version(&mut self) -> Result<u32> {
        Ok(self.inner.lock().pic_firmware_version)
    }

    fn flush_data_pipe(&mut self) -> Result<()> {
        self.inner.lock().flush_count += 1;
        Ok(())
    }

    fn flash_fpga(&mut self, firmware: &[u8]) -> Result<()> {
        self.inner.lock().flashed_bytes = Some(firmware.len());
        Ok(())
    }

    fn get_data(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.fail_data {
            return Err(Error::Scope("simulated USB failure".to_string()));
        }
        inner.fill_waveform(out);
        Ok(out.len())
    }

    fn get_acquisition(&mut self, out: &mut [u8]) -> Result<usize> {
        let interval = {
            let inner = self.inner.lock();
            if inner.fail_acquisition {
                return Err(Error::Scope("simulated USB failure".to_string()));
            }
            inner.frame_interval
        };
        // pace like real hardware; lock released while "acquiring"
        std::thread::sleep(interval);
        let mut inner = self.inner.lock();
        if inner.fail_acquisition {
            return Err(Error::Scope("simulated USB failure".to_string()));
        }
        inner.fill_waveform(out);
        Ok(out.len())
    }

    fn set_controller_register(&mut self, ctrl: u8, addr: u16, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        for (i, &byte) in data.iter().enumerate() {
            inner.registers.insert((ctrl, addr.wrapping_add(i as u16)), byte);
        }
        inner.register_writes.push((ctrl, addr, data.to_vec()));
        Ok(())
    }

    fn get_controller_register(&mut self, ctrl: u8, addr: u16, out: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock();
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = inner
                .registers
                .get(&(ctrl, addr.wrapping_add(i as u16)))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_round_trip() {
        let mut scope = MockScope::new();
        scope
            .set_controller_register(2, 0x0100, &[0xDE, 0xAD])
            .unwrap();

        let mut out = [0u8; 2];
        scope.get_controller_register(2, 0x0100, &mut out).unwrap();
        assert_eq!(out, [0xDE, 0xAD]);

        // unwritten registers read back as zero
        let mut out = [0xFFu8; 2];
        scope.get_controller_register(3, 0x0100, &mut out).unwrap();
        assert_eq!(out, [0, 0]);
    }

    #[test]
    fn test_register_writes_recorded() {
        let mut scope = MockScope::new();
        let probe = scope.clone();
        scope.set_controller_register(1, 0x10, &[7]).unwrap();
        scope.set_controller_register(1, 0x11, &[8, 9]).unwrap();

        let writes = probe.register_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], (1, 0x11, vec![8, 9]));
    }

    #[test]
    fn test_acquisition_produces_samples() {
        let mut scope = MockScope::new();
        let mut buf = [0u8; 1024];
        let n = scope.get_acquisition(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        // a sine wave is not a flat line
        assert!(buf.iter().any(|&s| s != buf[0]));
    }

    #[test]
    fn test_acquisition_failure_injection() {
        let mut scope = MockScope::new();
        let probe = scope.clone();
        probe.set_acquisition_failure(true);

        let mut buf = [0u8; 64];
        let err = scope.get_acquisition(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Scope(_)));

        probe.set_acquisition_failure(false);
        assert!(scope.get_acquisition(&mut buf).is_ok());
    }

    #[test]
    fn test_flush_and_flash_accounting() {
        let mut scope = MockScope::new();
        let probe = scope.clone();
        scope.flush_data_pipe().unwrap();
        scope.flush_data_pipe().unwrap();
        scope.flash_fpga(&[0u8; 512]).unwrap();

        assert_eq!(probe.flush_count(), 2);
        assert_eq!(probe.flashed_bytes(), Some(512));
    }
}
