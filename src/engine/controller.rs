//! Reconfiguration Controller
//!
//! The installation state machine and the rollback safety net: the single
//! place that decides whether a new image is trusted and safe to keep
//! running. Owns the last-known-safe image reference.

use crate::engine::bitstream::Bitstream;
use crate::engine::device::{DeviceError, FpgaDevice};
use crate::engine::logsink::{LogEvent, LogSink};
use crate::engine::metrics::ControllerMetrics;
use crate::engine::verify::SignatureVerifier;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Observable controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Installing,
    SelfTesting,
    RollingBack,
    Monitoring,
}

/// Structured result of one install attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Verified, programmed, and (unless disabled) self-tested clean.
    Installed,
    /// Signature rejected; the device was not touched.
    Rejected(String),
    /// Programming failed; device state is whatever programming left.
    ProgramFailed(String),
    /// Self-test failed and the safe image was restored.
    RolledBack,
    /// Self-test failed and the rollback also failed. Degraded; operator
    /// intervention required.
    RollbackFailed(String),
}

impl InstallOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Rejected(_) => "rejected",
            Self::ProgramFailed(_) => "program_failed",
            Self::RolledBack => "rolled_back",
            Self::RollbackFailed(_) => "rollback_failed",
        }
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

#[derive(Error, Debug)]
pub enum RollbackError {
    #[error("no safe image available for rollback: {0}")]
    NoSafeImage(PathBuf),

    #[error("safe image failed self-test")]
    SelfTestFailed,

    #[error("device error during rollback: {0}")]
    Device(#[from] DeviceError),
}

/// Orchestrates verify -> program -> self-test -> rollback-on-failure.
///
/// One install-or-rollback sequence runs at a time; the device mutex is held
/// across each program/self-test sequence so background telemetry sampling
/// can never interleave with device mutations.
pub struct ReconfigController {
    device: Arc<Mutex<FpgaDevice>>,
    verifier: Box<dyn SignatureVerifier>,
    safe_image: Bitstream,
    settle_delay: Duration,
    log: LogSink,
    sequence: Mutex<()>,
    state: Mutex<RunState>,
    monitor_active: AtomicBool,
    metrics: Mutex<ControllerMetrics>,
}

impl ReconfigController {
    pub fn new(
        device: Arc<Mutex<FpgaDevice>>,
        verifier: Box<dyn SignatureVerifier>,
        safe_image: Bitstream,
        log: LogSink,
    ) -> Self {
        Self {
            device,
            verifier,
            safe_image,
            settle_delay: Duration::from_millis(500),
            log,
            sequence: Mutex::new(()),
            state: Mutex::new(RunState::Idle),
            monitor_active: AtomicBool::new(false),
            metrics: Mutex::new(ControllerMetrics::default()),
        }
    }

    /// Override the post-programming settle delay. Tests set zero.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn device_handle(&self) -> Arc<Mutex<FpgaDevice>> {
        Arc::clone(&self.device)
    }

    pub fn safe_image(&self) -> &Bitstream {
        &self.safe_image
    }

    pub fn run_state(&self) -> RunState {
        let state = *self.state.lock().unwrap();
        if state == RunState::Idle && self.monitor_active.load(Ordering::SeqCst) {
            RunState::Monitoring
        } else {
            state
        }
    }

    pub fn metrics(&self) -> ControllerMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Called by the telemetry monitor around its loop lifetime.
    pub fn monitor_started(&self) {
        self.monitor_active.store(true, Ordering::SeqCst);
    }

    pub fn monitor_stopped(&self) {
        self.monitor_active.store(false, Ordering::SeqCst);
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().unwrap() = state;
    }

    fn with_metrics(&self, f: impl FnOnce(&mut ControllerMetrics)) {
        f(&mut self.metrics.lock().unwrap());
    }

    /// Install a new image: verify its signature, program it, self-test it,
    /// and roll back to the safe image if the self-test fails.
    ///
    /// `signature` defaults to the `.sig` convention next to the image.
    /// Structured failures come back as [`InstallOutcome`]; only device I/O
    /// faults surface as errors.
    pub fn install_and_validate(
        &self,
        image: &Bitstream,
        signature: Option<&Path>,
        run_self_test: bool,
    ) -> Result<InstallOutcome, InstallError> {
        let _sequence = self.sequence.lock().unwrap();
        let result = self.install_inner(image, signature, run_self_test);
        self.set_state(RunState::Idle);
        if let Ok(outcome) = &result {
            self.with_metrics(|m| m.record_outcome(outcome.label()));
        }
        result
    }

    fn install_inner(
        &self,
        image: &Bitstream,
        signature: Option<&Path>,
        run_self_test: bool,
    ) -> Result<InstallOutcome, InstallError> {
        self.set_state(RunState::Installing);
        self.with_metrics(ControllerMetrics::record_install_attempt);

        let sig_path = signature
            .map(Path::to_path_buf)
            .unwrap_or_else(|| image.signature_path());
        let verdict = self.verifier.verify(image.path(), &sig_path);
        self.log.emit(LogEvent::VerificationResult {
            image: image.path().display().to_string(),
            valid: verdict.valid,
            reason: verdict.reason.clone(),
        });
        if !verdict.valid {
            tracing::warn!(image = %image.path().display(), reason = %verdict.reason, "install rejected");
            self.with_metrics(ControllerMetrics::record_rejection);
            return Ok(InstallOutcome::Rejected(verdict.reason));
        }

        let mut device = self.device.lock().unwrap();
        self.log.emit(LogEvent::ProgrammingStarted {
            image: image.path().display().to_string(),
            region: device.region().to_string(),
        });
        if let Err(e) = device.program(image) {
            match e {
                DeviceError::ImageNotFound(_) => {
                    self.log.emit(LogEvent::ProgrammingFailed {
                        image: image.path().display().to_string(),
                        reason: e.to_string(),
                    });
                    self.with_metrics(ControllerMetrics::record_program_failure);
                    return Ok(InstallOutcome::ProgramFailed(e.to_string()));
                }
                other => return Err(other.into()),
            }
        }
        self.log.emit(LogEvent::ProgrammingComplete {
            image: image.path().display().to_string(),
            program_count: device.program_count(),
        });

        if run_self_test {
            self.set_state(RunState::SelfTesting);
            std::thread::sleep(self.settle_delay);
            let passed = device.self_test()?;
            let checksum = device.readback_checksum()?;
            self.log.emit(LogEvent::SelfTestResult { passed, checksum });

            if !passed {
                tracing::warn!(image = %image.path().display(), "self-test failed, rolling back");
                self.with_metrics(ControllerMetrics::record_self_test_failure);
                self.set_state(RunState::RollingBack);
                return match self.rollback_locked(&mut device) {
                    Ok(()) => Ok(InstallOutcome::RolledBack),
                    Err(e) => Ok(InstallOutcome::RollbackFailed(e.to_string())),
                };
            }
        }

        self.with_metrics(ControllerMetrics::record_install_success);
        Ok(InstallOutcome::Installed)
    }

    /// Revert the device to the configured safe image and self-test it.
    ///
    /// Only a failed post-install self-test or a confirmed telemetry anomaly
    /// should reach this. Failure is terminal for the session: the error
    /// propagates to the operator and is never retried automatically.
    pub fn rollback(&self) -> Result<(), RollbackError> {
        let _sequence = self.sequence.lock().unwrap();
        self.set_state(RunState::RollingBack);
        let mut device = self.device.lock().unwrap();
        let result = self.rollback_locked(&mut device);
        drop(device);
        self.set_state(RunState::Idle);
        result
    }

    fn rollback_locked(&self, device: &mut FpgaDevice) -> Result<(), RollbackError> {
        self.with_metrics(ControllerMetrics::record_rollback_attempt);

        if !self.safe_image.exists() {
            let path = self.safe_image.path().to_path_buf();
            self.log.emit(LogEvent::RollbackResult {
                success: false,
                reason: Some(format!("no safe image available: {}", path.display())),
            });
            tracing::error!(safe_image = %path.display(), "rollback impossible: safe image missing");
            return Err(RollbackError::NoSafeImage(path));
        }

        self.log.emit(LogEvent::RollbackStarted {
            safe_image: self.safe_image.path().display().to_string(),
        });
        self.log.emit(LogEvent::ProgrammingStarted {
            image: self.safe_image.path().display().to_string(),
            region: device.region().to_string(),
        });
        if let Err(e) = device.program(&self.safe_image) {
            self.log.emit(LogEvent::RollbackResult {
                success: false,
                reason: Some(e.to_string()),
            });
            return Err(e.into());
        }
        self.log.emit(LogEvent::ProgrammingComplete {
            image: self.safe_image.path().display().to_string(),
            program_count: device.program_count(),
        });

        std::thread::sleep(self.settle_delay);
        let passed = device.self_test()?;
        let checksum = device.readback_checksum()?;
        self.log.emit(LogEvent::SelfTestResult { passed, checksum });

        if passed {
            self.with_metrics(ControllerMetrics::record_rollback_success);
            self.log.emit(LogEvent::RollbackResult {
                success: true,
                reason: None,
            });
            Ok(())
        } else {
            self.log.emit(LogEvent::RollbackResult {
                success: false,
                reason: Some("safe image failed self-test".to_string()),
            });
            tracing::error!("rollback self-test failed; device degraded");
            Err(RollbackError::SelfTestFailed)
        }
    }
}
