//! BitGuard Engine
//!
//! The secure reconfiguration core: device model, signature verification,
//! install/rollback controller, telemetry monitoring, and their shared
//! types. Binaries and front ends are thin layers over this module.

pub mod anomaly;
pub mod bitstream;
pub mod cli;
pub mod config;
pub mod controller;
pub mod device;
pub mod logsink;
pub mod metrics;
pub mod monitor;
pub mod telemetry;
pub mod verify;
