//! BitGuard CLI - Main entry point for CLI binary
//!
//! This binary provides the `bitguard` CLI tool: keypair and signature
//! fixture tooling, signed installs, manual rollback, and the telemetry
//! monitor. All real logic lives in the engine.

use anyhow::{anyhow, bail, Context};
use bitguard::engine::{
    bitstream::Bitstream,
    cli::{Cli, Commands},
    config::Config,
    controller::{InstallOutcome, ReconfigController},
    device::FpgaDevice,
    logsink::{self, LogSink},
    monitor::{MonitorPolicy, TelemetryMonitor},
    verify::Ed25519Verifier,
};
use clap::Parser;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

fn main() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let project_dir = cli.get_project_dir();
    let config = Config::load_or_default(&project_dir)?;

    match cli.command {
        Commands::Keygen { out_dir } => cmd_keygen(&resolve(&project_dir, &out_dir)),
        Commands::Sign { image, key } => cmd_sign(&image, &resolve(&project_dir, &key)),
        Commands::Install {
            image,
            signature,
            no_self_test,
        } => cmd_install(&config, &project_dir, image, signature, no_self_test),
        Commands::Rollback => cmd_rollback(&config, &project_dir),
        Commands::Monitor {
            duration,
            resume_after_rollback,
        } => cmd_monitor(&config, &project_dir, duration, resume_after_rollback),
    }
}

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}

fn cmd_keygen(out_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let signing_key = SigningKey::generate(&mut OsRng);
    let private_path = out_dir.join("private.key");
    let public_path = out_dir.join("public.key");
    fs::write(&private_path, hex::encode(signing_key.to_bytes()))?;
    fs::write(&public_path, hex::encode(signing_key.verifying_key().as_bytes()))?;

    println!("Keypair written:");
    println!("  private: {}", private_path.display());
    println!("  public:  {}", public_path.display());
    Ok(())
}

fn cmd_sign(image: &Path, key: &Path) -> anyhow::Result<()> {
    let encoded = fs::read_to_string(key)
        .with_context(|| format!("reading private key {}", key.display()))?;
    let bytes = hex::decode(encoded.trim()).context("decoding private key")?;
    let key_bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("private key must be 32 bytes"))?;
    let signing_key = SigningKey::from_bytes(&key_bytes);

    let payload = fs::read(image)
        .with_context(|| format!("reading bitstream {}", image.display()))?;
    let signature = signing_key.sign(&Sha256::digest(&payload));

    let sig_path = Bitstream::new(image).signature_path();
    fs::write(&sig_path, hex::encode(signature.to_bytes()))?;

    println!("Signature written: {}", sig_path.display());
    Ok(())
}

/// The wired engine: controller, log sink, and the drain thread printing
/// one line per event.
struct Stack {
    controller: Arc<ReconfigController>,
    sink: LogSink,
    printer: JoinHandle<()>,
}

impl Stack {
    fn finish(self) {
        drop(self.controller);
        drop(self.sink);
        let _ = self.printer.join();
    }
}

fn build_stack(config: &Config, project_dir: &Path) -> Stack {
    let (sink, drain) = logsink::channel();
    let printer = thread::spawn(move || {
        while let Some(record) = drain.recv() {
            println!("{}", record.render());
        }
    });

    let mut device = FpgaDevice::new(&config.device.region);
    device.set_latency(config.device.latency_base(), config.device.latency_jitter());

    let verifier = Ed25519Verifier::new(resolve(project_dir, &config.controller.public_key));
    let controller = Arc::new(
        ReconfigController::new(
            Arc::new(Mutex::new(device)),
            Box::new(verifier),
            Bitstream::new(resolve(project_dir, &config.controller.safe_image)),
            sink.clone(),
        )
        .with_settle_delay(config.controller.settle_delay()),
    );

    Stack {
        controller,
        sink,
        printer,
    }
}

fn cmd_install(
    config: &Config,
    project_dir: &Path,
    image: PathBuf,
    signature: Option<PathBuf>,
    no_self_test: bool,
) -> anyhow::Result<()> {
    let stack = build_stack(config, project_dir);
    let image = Bitstream::new(image);
    let outcome =
        stack
            .controller
            .install_and_validate(&image, signature.as_deref(), !no_self_test);

    let result = match outcome {
        Ok(InstallOutcome::Installed) => {
            println!("Install complete: {}", image.path().display());
            Ok(())
        }
        Ok(InstallOutcome::Rejected(reason)) => Err(anyhow!("install rejected: {reason}")),
        Ok(InstallOutcome::ProgramFailed(reason)) => Err(anyhow!("programming failed: {reason}")),
        Ok(InstallOutcome::RolledBack) => Err(anyhow!(
            "self-test failed; device restored to the safe image"
        )),
        Ok(InstallOutcome::RollbackFailed(reason)) => Err(anyhow!(
            "CRITICAL: self-test failed and rollback also failed: {reason}"
        )),
        Err(e) => Err(e.into()),
    };

    stack.finish();
    result
}

fn cmd_rollback(config: &Config, project_dir: &Path) -> anyhow::Result<()> {
    let stack = build_stack(config, project_dir);
    let result = stack
        .controller
        .rollback()
        .map_err(|e| anyhow!("CRITICAL: rollback failed: {e}"));
    if result.is_ok() {
        println!("Rollback complete.");
    }
    stack.finish();
    result
}

fn cmd_monitor(
    config: &Config,
    project_dir: &Path,
    duration: u64,
    resume_after_rollback: bool,
) -> anyhow::Result<()> {
    let stack = build_stack(config, project_dir);
    let result = monitor_inner(&stack, config, duration, resume_after_rollback);
    stack.finish();
    result
}

fn monitor_inner(
    stack: &Stack,
    config: &Config,
    duration: u64,
    resume_after_rollback: bool,
) -> anyhow::Result<()> {
    let safe_image = stack.controller.safe_image().clone();

    // Bring-up: establish the baseline on the known-good image.
    {
        let device_handle = stack.controller.device_handle();
        let mut device = device_handle.lock().unwrap();
        device
            .program(&safe_image)
            .context("programming safe image for baseline")?;
        if !device.self_test().context("safe image self-test")? {
            bail!("safe image failed self-test; cannot establish a baseline");
        }
    }

    let policy = if resume_after_rollback {
        MonitorPolicy::ResumeAfterRollback
    } else {
        config.monitor.policy
    };
    let mut monitor = TelemetryMonitor::new(
        Arc::clone(&stack.controller),
        config.monitor.classifier.build(),
        stack.sink.clone(),
    )
    .with_policy(policy);

    let baseline = monitor.collect_baseline(config.monitor.baseline_samples);
    monitor
        .train_baseline(&baseline)
        .context("training telemetry baseline")?;

    let handle = monitor
        .spawn(config.monitor.poll_interval())
        .context("starting monitor loop")?;

    let deadline = Duration::from_secs(duration);
    let start = Instant::now();
    while start.elapsed() < deadline && !handle.is_finished() {
        thread::sleep(Duration::from_millis(100));
    }
    handle.shutdown();
    Ok(())
}
