//! Controller Metrics
//!
//! Counters over install and rollback activity. Observability only; never
//! consulted for control flow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerMetrics {
    pub installs_attempted: u64,
    pub installs_succeeded: u64,
    pub installs_rejected: u64,
    pub program_failures: u64,
    pub self_test_failures: u64,
    pub rollbacks_attempted: u64,
    pub rollbacks_succeeded: u64,
    pub last_outcome: Option<String>,
    pub last_install: Option<DateTime<Utc>>,
}

impl ControllerMetrics {
    pub fn record_install_attempt(&mut self) {
        self.installs_attempted += 1;
        self.last_install = Some(Utc::now());
    }

    pub fn record_outcome(&mut self, outcome: &str) {
        self.last_outcome = Some(outcome.to_string());
    }

    pub fn record_install_success(&mut self) {
        self.installs_succeeded += 1;
    }

    pub fn record_rejection(&mut self) {
        self.installs_rejected += 1;
    }

    pub fn record_program_failure(&mut self) {
        self.program_failures += 1;
    }

    pub fn record_self_test_failure(&mut self) {
        self.self_test_failures += 1;
    }

    pub fn record_rollback_attempt(&mut self) {
        self.rollbacks_attempted += 1;
    }

    pub fn record_rollback_success(&mut self) {
        self.rollbacks_succeeded += 1;
    }
}
