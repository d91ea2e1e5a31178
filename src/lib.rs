//! BitGuard - Secure FPGA partial-reconfiguration controller
//!
//! Signed bitstreams are verified before programming, self-tested after,
//! and the device reverts to a known-good image when a self-test fails or
//! background telemetry monitoring confirms an anomaly.

pub mod engine;

pub use engine::anomaly::{AnomalyClassifier, ClassifierBackend, Verdict};
pub use engine::bitstream::Bitstream;
pub use engine::controller::{InstallOutcome, ReconfigController, RollbackError, RunState};
pub use engine::device::FpgaDevice;
pub use engine::monitor::{MonitorPolicy, TelemetryMonitor};
pub use engine::telemetry::TelemetrySample;
