//! Log Sink
//!
//! Ordered, append-only stream of status events. Producers emit without
//! blocking over an unbounded channel; a separate consumer drains records
//! in FIFO order and renders one line per event.

use crate::engine::telemetry::TelemetrySample;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver, Sender};

/// One significant event in the reconfiguration lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    VerificationResult {
        image: String,
        valid: bool,
        reason: String,
    },
    ProgrammingStarted {
        image: String,
        region: String,
    },
    ProgrammingComplete {
        image: String,
        program_count: u64,
    },
    ProgrammingFailed {
        image: String,
        reason: String,
    },
    SelfTestResult {
        passed: bool,
        checksum: Option<u32>,
    },
    RollbackStarted {
        safe_image: String,
    },
    RollbackResult {
        success: bool,
        reason: Option<String>,
    },
    AnomalyDetected {
        sample: TelemetrySample,
    },
    MonitorStarted,
    MonitorStopped {
        reason: String,
    },
}

/// A timestamped event as it entered the stream.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LogEvent,
}

impl LogRecord {
    /// Human-readable status line for presentation layers.
    pub fn render(&self) -> String {
        match &self.event {
            LogEvent::VerificationResult { image, valid, reason } => {
                let status = if *valid { "OK" } else { "REJECTED" };
                format!("[verify] {image}: {status} ({reason})")
            }
            LogEvent::ProgrammingStarted { image, region } => {
                format!("[device] programming {image} into region {region} ...")
            }
            LogEvent::ProgrammingComplete { image, program_count } => {
                format!("[device] programming complete: {image} (count={program_count})")
            }
            LogEvent::ProgrammingFailed { image, reason } => {
                format!("[device] programming failed: {image}: {reason}")
            }
            LogEvent::SelfTestResult { passed, checksum } => match (passed, checksum) {
                (true, Some(crc)) => format!("[device] self-test: PASS (crc=0x{crc:08x})"),
                (false, Some(crc)) => format!("[device] self-test: FAIL (crc=0x{crc:08x})"),
                (passed, None) => format!(
                    "[device] self-test: {} (no image loaded)",
                    if *passed { "PASS" } else { "FAIL" }
                ),
            },
            LogEvent::RollbackStarted { safe_image } => {
                format!("[controller] rolling back to safe image {safe_image}")
            }
            LogEvent::RollbackResult { success: true, .. } => {
                "[controller] rollback succeeded".to_string()
            }
            LogEvent::RollbackResult { success: false, reason } => format!(
                "[controller] ROLLBACK FAILED: {}",
                reason.as_deref().unwrap_or("unknown")
            ),
            LogEvent::AnomalyDetected { sample } => {
                format!("[monitor] ANOMALY detected: {:?}", sample.values())
            }
            LogEvent::MonitorStarted => "[monitor] telemetry monitoring started".to_string(),
            LogEvent::MonitorStopped { reason } => {
                format!("[monitor] telemetry monitoring stopped: {reason}")
            }
        }
    }
}

/// Producer handle. Cloneable; `emit` never blocks and never fails the
/// producer, even after the drain is gone.
#[derive(Clone)]
pub struct LogSink {
    tx: Sender<LogRecord>,
}

impl LogSink {
    pub fn emit(&self, event: LogEvent) {
        let record = LogRecord {
            timestamp: Utc::now(),
            event,
        };
        // Fire-and-forget: a departed consumer must not stall the producer.
        let _ = self.tx.send(record);
    }
}

/// Consumer end of the stream.
pub struct LogDrain {
    rx: Receiver<LogRecord>,
}

impl LogDrain {
    /// Block until the next record, or `None` once all sinks are dropped.
    pub fn recv(&self) -> Option<LogRecord> {
        self.rx.recv().ok()
    }

    /// Collect everything currently queued without blocking.
    pub fn drain_available(&self) -> Vec<LogRecord> {
        let mut records = Vec::new();
        while let Ok(record) = self.rx.try_recv() {
            records.push(record);
        }
        records
    }
}

/// Create a connected sink/drain pair.
pub fn channel() -> (LogSink, LogDrain) {
    let (tx, rx) = mpsc::channel();
    (LogSink { tx }, LogDrain { rx })
}
