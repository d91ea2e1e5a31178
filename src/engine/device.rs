//! Device Model
//!
//! Simulated FPGA partial-reconfiguration region: programming with latency,
//! CRC read-back, self-test, and telemetry synthesis.

use crate::engine::bitstream::Bitstream;
use crate::engine::telemetry::{TelemetrySample, METRIC_CPU, METRIC_ERRORS, METRIC_PACKET_RATE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Identifier markers that bias telemetry synthesis.
const STRESS_MARKERS: &[&str] = &["stress"];
const FAULT_MARKERS: &[&str] = &["faulty", "bad"];

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("bitstream not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Simulated reconfigurable device.
///
/// All mutations go through [`FpgaDevice::program`]; callers share the device
/// behind a mutex and must hold it across a program/self-test sequence.
pub struct FpgaDevice {
    region: String,
    loaded_image: Option<Bitstream>,
    program_count: u64,
    rng: StdRng,
    latency_base: Duration,
    latency_jitter: Duration,
    /// Transient self-test failure odds, numerator/denominator.
    transient_failure: (u32, u32),
}

impl FpgaDevice {
    /// Device with OS entropy and the reference latency profile
    /// (1.0 s base + up to 0.8 s jitter per programming operation).
    pub fn new(region: impl Into<String>) -> Self {
        Self::with_rng(region, StdRng::from_entropy())
    }

    /// Deterministic device for tests.
    pub fn with_seed(region: impl Into<String>, seed: u64) -> Self {
        Self::with_rng(region, StdRng::seed_from_u64(seed))
    }

    fn with_rng(region: impl Into<String>, rng: StdRng) -> Self {
        Self {
            region: region.into(),
            loaded_image: None,
            program_count: 0,
            rng,
            latency_base: Duration::from_millis(1000),
            latency_jitter: Duration::from_millis(800),
            transient_failure: (1, 50),
        }
    }

    /// Override the simulated programming latency. Tests set both to zero.
    pub fn set_latency(&mut self, base: Duration, jitter: Duration) {
        self.latency_base = base;
        self.latency_jitter = jitter;
    }

    /// Override the transient self-test failure odds. `(0, n)` disables the
    /// transient branch entirely.
    pub fn set_transient_failure(&mut self, numerator: u32, denominator: u32) {
        self.transient_failure = (numerator, denominator);
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn loaded_image(&self) -> Option<&Bitstream> {
        self.loaded_image.as_ref()
    }

    /// Successful programming operations so far, rollbacks included.
    pub fn program_count(&self) -> u64 {
        self.program_count
    }

    /// Program an image into the region. Blocks for the simulated
    /// programming latency; the caller must treat this as a long operation.
    pub fn program(&mut self, image: &Bitstream) -> Result<(), DeviceError> {
        if !image.exists() {
            return Err(DeviceError::ImageNotFound(image.path().to_path_buf()));
        }

        tracing::debug!(region = %self.region, image = %image.path().display(), "programming");
        let jitter_ms = self.latency_jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(self.rng.gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let latency = self.latency_base + jitter;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        self.loaded_image = Some(image.clone());
        self.program_count += 1;
        Ok(())
    }

    /// CRC-32 of the loaded image, re-read from backing storage.
    /// `None` when nothing is loaded.
    pub fn readback_checksum(&self) -> Result<Option<u32>, DeviceError> {
        match &self.loaded_image {
            Some(image) => Ok(Some(image.checksum()?)),
            None => Ok(None),
        }
    }

    /// Post-programming self-test.
    ///
    /// Fails when no image is loaded, deterministically when the content
    /// CRC is divisible by 17, and sporadically at the configured transient
    /// odds on any image.
    pub fn self_test(&mut self) -> Result<bool, DeviceError> {
        let Some(crc) = self.readback_checksum()? else {
            tracing::warn!(region = %self.region, "self-test with no image loaded");
            return Ok(false);
        };

        if crc % 17 == 0 {
            tracing::warn!(region = %self.region, crc, "self-test: content-dependent failure");
            return Ok(false);
        }

        let (num, den) = self.transient_failure;
        if num > 0 && self.rng.gen_ratio(num, den) {
            tracing::warn!(region = %self.region, "self-test: transient failure");
            return Ok(false);
        }

        tracing::debug!(region = %self.region, crc, "self-test passed");
        Ok(true)
    }

    /// Synthesize one telemetry sample for the loaded image.
    ///
    /// Images tagged with a stress marker bias packet rate upward; images
    /// tagged with a fault marker bias errors and CPU load upward and packet
    /// rate downward. The fault profile is statistically distinguishable so
    /// a trained baseline can flag it.
    pub fn telemetry(&mut self) -> TelemetrySample {
        let identifier = self
            .loaded_image
            .as_ref()
            .map(Bitstream::identifier)
            .unwrap_or_default();

        let mut base: i64 = 1000;
        if STRESS_MARKERS.iter().any(|m| identifier.contains(m)) {
            base += self.rng.gen_range(0..=300);
        }

        let (packet_rate, errors, cpu) = if FAULT_MARKERS.iter().any(|m| identifier.contains(m)) {
            (
                base / 4,
                self.rng.gen_range(10..=60),
                self.rng.gen_range(50..=95),
            )
        } else {
            (
                base + self.rng.gen_range(-10..=10),
                self.rng.gen_range(0..=2),
                self.rng.gen_range(5..=30),
            )
        };

        let mut sample = TelemetrySample::new();
        sample.set(METRIC_PACKET_RATE, packet_rate as f64);
        sample.set(METRIC_ERRORS, errors as f64);
        sample.set(METRIC_CPU, cpu as f64);
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::bitstream::crc32;
    use std::fs;
    use tempfile::tempdir;

    fn quiet_device(seed: u64) -> FpgaDevice {
        let mut device = FpgaDevice::with_seed("PR0", seed);
        device.set_latency(Duration::ZERO, Duration::ZERO);
        device.set_transient_failure(0, 50);
        device
    }

    /// Bytes whose CRC-32 is divisible by 17, for the deterministic branch.
    fn failing_payload() -> Vec<u8> {
        let mut payload = b"bitstream-fixture".to_vec();
        for counter in 0u32.. {
            let mut candidate = payload.clone();
            candidate.extend_from_slice(&counter.to_le_bytes());
            if crc32(&candidate) % 17 == 0 {
                payload = candidate;
                break;
            }
        }
        payload
    }

    /// Bytes whose CRC-32 is not divisible by 17.
    fn passing_payload() -> Vec<u8> {
        let mut payload = b"bitstream-fixture".to_vec();
        for counter in 0u32.. {
            let mut candidate = payload.clone();
            candidate.extend_from_slice(&counter.to_le_bytes());
            if crc32(&candidate) % 17 != 0 {
                payload = candidate;
                break;
            }
        }
        payload
    }

    #[test]
    fn test_program_missing_image() {
        let mut device = quiet_device(1);
        let result = device.program(&Bitstream::new("/nonexistent/image.bit"));
        assert!(matches!(result, Err(DeviceError::ImageNotFound(_))));
        assert_eq!(device.program_count(), 0);
        assert!(device.loaded_image().is_none());
    }

    #[test]
    fn test_program_updates_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("module.bit");
        fs::write(&path, passing_payload()).unwrap();

        let mut device = quiet_device(2);
        device.program(&Bitstream::new(&path)).unwrap();
        assert_eq!(device.program_count(), 1);
        assert_eq!(device.loaded_image().unwrap().path(), path);
    }

    #[test]
    fn test_readback_none_without_image() {
        let device = quiet_device(3);
        assert_eq!(device.readback_checksum().unwrap(), None);
    }

    #[test]
    fn test_self_test_fails_without_image() {
        let mut device = quiet_device(4);
        assert!(!device.self_test().unwrap());
    }

    #[test]
    fn test_self_test_deterministic_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("defective.bit");
        fs::write(&path, failing_payload()).unwrap();

        // Independent of the transient draw: force the transient branch on
        // and the content-dependent failure still decides first.
        let mut device = FpgaDevice::with_seed("PR0", 5);
        device.set_latency(Duration::ZERO, Duration::ZERO);
        device.set_transient_failure(1, 1);
        device.program(&Bitstream::new(&path)).unwrap();
        for _ in 0..10 {
            assert!(!device.self_test().unwrap());
        }
    }

    #[test]
    fn test_self_test_passes_clean_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clean.bit");
        fs::write(&path, passing_payload()).unwrap();

        let mut device = quiet_device(6);
        device.program(&Bitstream::new(&path)).unwrap();
        for _ in 0..10 {
            assert!(device.self_test().unwrap());
        }
    }

    #[test]
    fn test_self_test_transient_failure_forced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clean.bit");
        fs::write(&path, passing_payload()).unwrap();

        let mut device = FpgaDevice::with_seed("PR0", 7);
        device.set_latency(Duration::ZERO, Duration::ZERO);
        device.set_transient_failure(1, 1);
        device.program(&Bitstream::new(&path)).unwrap();
        assert!(!device.self_test().unwrap());
    }

    #[test]
    fn test_telemetry_schema_is_stable() {
        let mut device = quiet_device(8);
        let a = device.telemetry();
        let b = device.telemetry();
        assert!(a.same_schema(&b));
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn test_telemetry_fault_profile_is_distinguishable() {
        let dir = tempdir().unwrap();
        let safe = dir.path().join("safe_module.bit");
        let faulty = dir.path().join("faulty_module.bit");
        fs::write(&safe, passing_payload()).unwrap();
        fs::write(&faulty, passing_payload()).unwrap();

        let mut device = quiet_device(9);
        device.program(&Bitstream::new(&safe)).unwrap();
        let normal = device.telemetry();
        assert!(normal.get(METRIC_PACKET_RATE).unwrap() >= 990.0);
        assert!(normal.get(METRIC_ERRORS).unwrap() <= 2.0);

        device.program(&Bitstream::new(&faulty)).unwrap();
        let degraded = device.telemetry();
        assert_eq!(degraded.get(METRIC_PACKET_RATE).unwrap(), 250.0);
        assert!(degraded.get(METRIC_ERRORS).unwrap() >= 10.0);
        assert!(degraded.get(METRIC_CPU).unwrap() >= 50.0);
    }

    #[test]
    fn test_telemetry_stress_profile_raises_packet_rate() {
        let dir = tempdir().unwrap();
        let stress = dir.path().join("stress_filter.bit");
        fs::write(&stress, passing_payload()).unwrap();

        let mut device = quiet_device(10);
        device.program(&Bitstream::new(&stress)).unwrap();
        for _ in 0..20 {
            let sample = device.telemetry();
            assert!(sample.get(METRIC_PACKET_RATE).unwrap() >= 990.0);
            assert!(sample.get(METRIC_ERRORS).unwrap() <= 2.0);
        }
    }
}
