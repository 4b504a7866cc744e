use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use gcmx_core::{
    check_cancelled, generate_random_payload, read_payload, BenchConfig, ExecutionMode, GcmXError,
    OutputSink, Result,
};
use gcmx_pipeline::{
    idle_strategy_for, EncryptionEngine, ExecutionContext, HarnessSettings, SoftwareEngine,
    ThroughputHarness,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing_subscriber::EnvFilter;

static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: i32) {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

/// AES-GCM throughput benchmark over a buffer-lifecycle-managed pipeline.
#[derive(Parser, Debug)]
#[command(name = "gcm-x", version)]
struct Args {
    /// TOML configuration file; flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PCI address of the device (BB:DD.F).
    #[arg(short = 'p', long = "pci-addr")]
    pci_addr: Option<String>,

    /// Raw key in hex (16 bytes for AES-128, 32 bytes for AES-256).
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// 12-byte IV in hex.
    #[arg(short = 'i', long)]
    iv: Option<String>,

    /// Authentication tag size in bytes (12 or 16).
    #[arg(short = 't', long = "tag-size")]
    tag_size: Option<usize>,

    /// Bytes at the head of the input authenticated but not encrypted.
    #[arg(short = 'a', long = "aad-size")]
    aad_size: Option<usize>,

    /// Path the random payload is generated to and read back from.
    #[arg(short = 'f', long = "file")]
    input: Option<PathBuf>,

    /// Output path for the final ciphertext and tag.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Payload size: <n>B, <n>K, <n>M or <n>G.
    #[arg(short = 's', long = "size")]
    size: Option<String>,

    #[arg(long = "duration-ms")]
    duration_ms: Option<u64>,

    #[arg(long = "poll-interval-us")]
    poll_interval_us: Option<u64>,

    /// Engine execution mode: inline or offload.
    #[arg(long)]
    mode: Option<ExecutionMode>,

    /// Default log filter; RUST_LOG takes precedence.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<BenchConfig> {
        let mut config = match &self.config {
            Some(path) => BenchConfig::load(path)?,
            None => BenchConfig::default(),
        };
        if let Some(v) = self.pci_addr {
            config.device = v;
        }
        if let Some(v) = self.key {
            config.key_hex = v;
        }
        if let Some(v) = self.iv {
            config.iv_hex = v;
        }
        if let Some(v) = self.tag_size {
            config.tag_size = v;
        }
        if let Some(v) = self.aad_size {
            config.aad_size = v;
        }
        if let Some(v) = self.input {
            config.input_path = v;
        }
        if let Some(v) = self.output {
            config.output_path = v;
        }
        if let Some(v) = self.size {
            config.payload_size = v;
        }
        if let Some(v) = self.duration_ms {
            config.duration_ms = v;
        }
        if let Some(v) = self.poll_interval_us {
            config.poll_interval_us = v;
        }
        if let Some(v) = self.mode {
            config.engine.mode = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn install_cancel_handler() {
    let sa = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // # Safety: the handler only performs an atomic store.
    if let Err(e) = unsafe { signal::sigaction(Signal::SIGINT, &sa) } {
        tracing::warn!("SIGINT handler not installed ({}); run is not cancellable", e);
    }
}

fn run(config: &BenchConfig) -> Result<()> {
    let sink = OutputSink::create(&config.output_path)?;
    generate_random_payload(&config.input_path, config.payload_bytes()?)?;
    check_cancelled(&CANCEL_REQUESTED, "payload generation")?;
    let plaintext = read_payload(&config.input_path)?;
    check_cancelled(&CANCEL_REQUESTED, "payload read-back")?;

    let engine = SoftwareEngine::new(&config.engine);
    tracing::info!(
        "device {} via {} engine, {} byte payload, tag {} aad {}",
        config.device,
        engine.name(),
        plaintext.len(),
        config.tag_size,
        config.aad_size
    );
    let mut ctx = ExecutionContext::new(config.device.clone(), engine);
    let report = ThroughputHarness::new(&mut ctx, HarnessSettings::from_config(config)?)
        .with_idle_strategy(idle_strategy_for(config.poll_interval(), config.spin_polls))
        .with_cancel_flag(&CANCEL_REQUESTED)
        .run(&plaintext, sink)?;

    tracing::info!(
        "Total bytes: {}, elapsed: {:.3}s, throughput: {:.2} MB/s over {} iteration(s){}",
        report.total_bytes,
        report.elapsed.as_secs_f64(),
        report.throughput_mib_s,
        report.iterations,
        if report.cancelled { " (cancelled)" } else { "" }
    );
    tracing::info!(
        "wrote {} bytes to {}; pump: {} polls, {} idle, {} completions",
        report.output_len,
        config.output_path.display(),
        report.pump.polls,
        report.pump.idle_polls,
        report.pump.completions
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    install_cancel_handler();

    tracing::info!("Starting the AES-GCM throughput benchmark");
    let outcome = args.into_config().and_then(|config| run(&config));
    match outcome {
        Ok(()) => {
            tracing::info!("Benchmark finished successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}

fn report_failure(e: &GcmXError) {
    tracing::error!(
        "Benchmark finished with errors [{:?}]: {}",
        e.root_cause().category(),
        e
    );
}
