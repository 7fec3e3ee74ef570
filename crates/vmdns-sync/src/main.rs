// # vmdns-sync - one-shot VM address reconciler
//
// This binary is a THIN integration layer:
// - DO NOT add DNS logic or inventory logic here
// - All reconciliation logic lives in vmdns-core
// - Configuration is via environment variables ONLY
//
// The binary is responsible for:
// 1. Reading configuration from environment variables
// 2. Loading the DNS credential (before any network call)
// 3. Initializing logging and the runtime
// 4. Wiring the Compute Engine inventory and the Cloudflare store into the engine
// 5. Printing one status line per hostname to stdout
//
// ## Configuration
//
// - `CLOUDFLARE_INI`: path to the DNS credential file (required)
// - `VMDNS_MODE`: `live` (default) or `dry-run`
// - `VMDNS_LOG_LEVEL`: trace, debug, info, warn (default), error
// - `VMDNS_INVENTORY_TIMEOUT_SECS`: inventory budget, 1..=600 (default 60)
// - `VMDNS_GCP_PROJECT`: project override for the inventory reader
//
// ## Example
//
// ```bash
// export CLOUDFLARE_INI=$HOME/.secrets/cloudflare.ini
// export VMDNS_MODE=dry-run
//
// vmdns-sync
// ```

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;
use vmdns_core::config::load_credential_from_env;
use vmdns_core::{Credential, SyncConfig, SyncEngine};
use vmdns_inventory_gce::GceInventory;
use vmdns_provider_cloudflare::CloudflareStore;

const DRY_RUN_BANNER: &str = "Doing dry-run, no update will be applied.";

/// Exit codes for different termination scenarios
///
/// - 0: Success
/// - 1: Configuration error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncExitCode {
    /// Every hostname reconciled
    Success = 0,
    /// Bad environment or credential file
    ConfigError = 1,
    /// Provider or DNS failure
    RuntimeError = 2,
}

impl From<SyncExitCode> for ExitCode {
    fn from(code: SyncExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
#[derive(Debug)]
struct Config {
    mode: String,
    log_level: String,
    inventory_timeout_secs: u64,
    gcp_project: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let inventory_timeout_secs = match lookup("VMDNS_INVENTORY_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse().with_context(|| {
                format!(
                    "VMDNS_INVENTORY_TIMEOUT_SECS must be a whole number of seconds. Got: {}",
                    raw
                )
            })?,
            None => SyncConfig::default().inventory_timeout_secs,
        };

        Ok(Self {
            mode: lookup("VMDNS_MODE").unwrap_or_else(|| "live".to_string()),
            log_level: lookup("VMDNS_LOG_LEVEL").unwrap_or_else(|| "warn".to_string()),
            inventory_timeout_secs,
            gcp_project: lookup("VMDNS_GCP_PROJECT")
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        match self.mode.as_str() {
            "live" | "dry-run" => {}
            _ => anyhow::bail!(
                "VMDNS_MODE '{}' is not supported. Supported modes: live, dry-run",
                self.mode
            ),
        }

        if !(1..=600).contains(&self.inventory_timeout_secs) {
            anyhow::bail!(
                "VMDNS_INVENTORY_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
                self.inventory_timeout_secs
            );
        }

        self.level()?;
        Ok(())
    }

    fn level(&self) -> Result<Level> {
        Ok(match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => anyhow::bail!(
                "VMDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        })
    }

    fn dry_run(&self) -> bool {
        self.mode == "dry-run"
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_dry_run(self.dry_run())
            .with_inventory_timeout_secs(self.inventory_timeout_secs)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", failure_line(format!("{:#}", e)));
            return SyncExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level().unwrap_or(Level::WARN))
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return SyncExitCode::ConfigError.into();
    }

    // The credential is loaded before any network traffic.
    let credential = match load_credential_from_env() {
        Ok(credential) => credential,
        Err(e) => {
            eprintln!("{}", failure_line(e));
            return SyncExitCode::ConfigError.into();
        }
    };
    debug!("Using {} authentication", credential.scheme());

    if config.dry_run() {
        println!("{}", DRY_RUN_BANNER);
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            eprintln!("{}", failure_line(format!("failed to create tokio runtime: {}", e)));
            return SyncExitCode::RuntimeError.into();
        }
    };

    match rt.block_on(run_sync(config, credential)) {
        Ok(()) => SyncExitCode::Success.into(),
        Err(e) => {
            eprintln!("{}", failure_line(format!("{:#}", e)));
            exit_code_for(&e).into()
        }
    }
}

/// The single stderr line printed when a run fails
fn failure_line(err: impl std::fmt::Display) -> String {
    format!("Unable to update: {}", err)
}

/// Map a failed run to its exit code
fn exit_code_for(err: &anyhow::Error) -> SyncExitCode {
    match err.downcast_ref::<vmdns_core::Error>() {
        Some(e) if e.is_config() => SyncExitCode::ConfigError,
        _ => SyncExitCode::RuntimeError,
    }
}

/// Build the engine and run one reconciliation pass
///
/// Status lines are printed as they are produced, including those emitted
/// before a failure.
async fn run_sync(config: Config, credential: Credential) -> Result<()> {
    let inventory = GceInventory::new(config.gcp_project.clone())?;
    let store = CloudflareStore::new(credential)?;

    let (engine, mut events) = SyncEngine::new(
        Box::new(inventory),
        Box::new(store),
        config.sync_config(),
    )?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", event);
        }
    });

    let result = engine.run().await;

    // Dropping the engine closes the channel so the printer drains and exits.
    drop(engine);
    printer.await.context("Status printer task failed")?;

    let summary = result?;
    info!(
        "Run finished in {} ms with {} change(s)",
        (summary.finished_at - summary.started_at).num_milliseconds(),
        summary.changes()
    );
    Ok(())
}
