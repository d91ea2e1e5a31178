//! Telemetry Monitor Loop
//!
//! Continuous background safety monitoring independent of explicit
//! installs: samples the device, scores each sample against the trained
//! baseline, and escalates to the controller's rollback on a confirmed
//! anomaly.

use crate::engine::anomaly::{AnomalyClassifier, AnomalyError, Verdict};
use crate::engine::controller::ReconfigController;
use crate::engine::device::FpgaDevice;
use crate::engine::logsink::{LogEvent, LogSink};
use crate::engine::telemetry::TelemetrySample;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// What the loop does after a rollback it triggered succeeds.
///
/// The reference behavior is a single-shot safety response; resuming on the
/// restored safe image is available as a policy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPolicy {
    #[default]
    StopAfterRollback,
    ResumeAfterRollback,
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("baseline not trained")]
    Untrained,

    #[error(transparent)]
    Classifier(AnomalyError),
}

impl From<AnomalyError> for MonitorError {
    fn from(e: AnomalyError) -> Self {
        match e {
            AnomalyError::Untrained => Self::Untrained,
            other => Self::Classifier(other),
        }
    }
}

/// Background telemetry watcher bound to one controller and its device.
pub struct TelemetryMonitor {
    device: Arc<Mutex<FpgaDevice>>,
    controller: Arc<ReconfigController>,
    classifier: Box<dyn AnomalyClassifier + Send>,
    log: LogSink,
    policy: MonitorPolicy,
    trained: bool,
}

impl TelemetryMonitor {
    pub fn new(
        controller: Arc<ReconfigController>,
        classifier: Box<dyn AnomalyClassifier + Send>,
        log: LogSink,
    ) -> Self {
        let device = controller.device_handle();
        Self {
            device,
            controller,
            classifier,
            log,
            policy: MonitorPolicy::default(),
            trained: false,
        }
    }

    pub fn with_policy(mut self, policy: MonitorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sample the device `count` times for baseline training. Call after a
    /// known-good image has been programmed.
    pub fn collect_baseline(&self, count: usize) -> Vec<TelemetrySample> {
        (0..count)
            .map(|_| self.device.lock().unwrap().telemetry())
            .collect()
    }

    /// Train the classifier baseline. Must precede any detection.
    pub fn train_baseline(&mut self, samples: &[TelemetrySample]) -> Result<(), MonitorError> {
        self.classifier.train(samples)?;
        self.trained = true;
        tracing::info!(samples = samples.len(), "telemetry baseline trained");
        Ok(())
    }

    /// Score one sample. Pure query; detection before training is an error.
    pub fn tick(&self, sample: &TelemetrySample) -> Result<Verdict, MonitorError> {
        if !self.trained {
            return Err(MonitorError::Untrained);
        }
        Ok(self.classifier.classify(sample)?)
    }

    /// Run the loop on the calling thread until shut down. Cancellation is
    /// observed at iteration boundaries, within one poll interval.
    pub fn run(self, poll_interval: Duration, shutdown: Receiver<()>) -> Result<(), MonitorError> {
        if !self.trained {
            return Err(MonitorError::Untrained);
        }
        self.run_loop(poll_interval, shutdown);
        Ok(())
    }

    /// Run the loop on a dedicated thread.
    pub fn spawn(self, poll_interval: Duration) -> Result<MonitorHandle, MonitorError> {
        if !self.trained {
            return Err(MonitorError::Untrained);
        }
        let (tx, rx) = mpsc::channel();
        let thread = thread::spawn(move || self.run_loop(poll_interval, rx));
        Ok(MonitorHandle {
            shutdown: tx,
            thread,
        })
    }

    fn run_loop(self, poll_interval: Duration, shutdown: Receiver<()>) {
        self.controller.monitor_started();
        self.log.emit(LogEvent::MonitorStarted);

        let reason = loop {
            // Blocking wait doubles as the poll sleep: shutdown latency is
            // bounded by one interval and never preempts a device sequence.
            match shutdown.recv_timeout(poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break "shutdown requested",
                Err(RecvTimeoutError::Timeout) => {}
            }

            let sample = self.device.lock().unwrap().telemetry();
            match self.tick(&sample) {
                Ok(Verdict::Normal) => {
                    tracing::debug!(values = ?sample.values(), "telemetry normal");
                }
                Ok(Verdict::Anomalous) => {
                    self.log.emit(LogEvent::AnomalyDetected {
                        sample: sample.clone(),
                    });
                    tracing::warn!(values = ?sample.values(), "telemetry anomaly confirmed, invoking rollback");
                    match self.controller.rollback() {
                        Ok(()) => {
                            if self.policy == MonitorPolicy::StopAfterRollback {
                                break "stopped after rollback";
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "anomaly rollback failed; operator intervention required");
                            break "rollback failed";
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "monitor tick failed");
                    break "tick failed";
                }
            }
        };

        self.log.emit(LogEvent::MonitorStopped {
            reason: reason.to_string(),
        });
        self.controller.monitor_stopped();
    }
}

/// Handle to a spawned monitor loop.
pub struct MonitorHandle {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Request shutdown and wait for the loop to exit.
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.thread.join();
    }

    /// Wait for the loop to exit on its own.
    pub fn join(self) {
        let _ = self.thread.join();
    }
}
