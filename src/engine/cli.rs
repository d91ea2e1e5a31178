//! BitGuard CLI Module
//! Command-line interface for BitGuard operations

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bitguard")]
#[command(author = "BitGuard Team")]
#[command(version)]
#[command(about = "Secure FPGA partial-reconfiguration controller with anomaly-triggered rollback", long_about = None)]
pub struct Cli {
    /// Project directory holding bitguard.config.json and key material
    /// (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an Ed25519 signing keypair for bitstream fixtures
    Keygen {
        /// Output directory for private.key / public.key
        #[arg(short, long, default_value = "data")]
        out_dir: PathBuf,
    },

    /// Sign a bitstream, writing the detached signature next to it
    Sign {
        /// Bitstream file to sign
        image: PathBuf,

        /// Private key file
        #[arg(short, long, default_value = "data/private.key")]
        key: PathBuf,
    },

    /// Verify, program, and self-test a bitstream
    Install {
        /// Bitstream file to install
        image: PathBuf,

        /// Detached signature (defaults to `<image>.sig`)
        #[arg(short, long)]
        signature: Option<PathBuf>,

        /// Skip the post-programming self-test
        #[arg(long)]
        no_self_test: bool,
    },

    /// Revert the device to the configured safe image
    Rollback,

    /// Program the safe image, train a telemetry baseline, and watch for
    /// anomalies
    Monitor {
        /// How long to monitor before shutting down, in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,

        /// Keep monitoring after a successful anomaly-triggered rollback
        #[arg(long)]
        resume_after_rollback: bool,
    },
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}
