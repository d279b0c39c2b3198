#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::missing_docs_in_private_items)]
#![allow(clippy::uninlined_format_args)]
//! A supervisor for a pool of onion-router client instances, fronted by a
//! TCP load balancer and (optionally) an HTTP filter, with optional
//! transparent host-firewall redirection.
//!
//! [`Coordinator`] is the single public surface: it drives a pool from
//! `Init` through `Running` to `Stopped`, rolling back in strict reverse
//! order on any startup failure.

pub mod binaries;
pub mod cfg;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod frontend;
pub mod instance;
pub mod logging;
pub mod pool;
pub mod ports;
mod process;
pub mod redirect;
pub mod template;

pub use cfg::PoolConfig;
pub use coordinator::{Coordinator, RunState};
pub use error::Error;

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use onionpool_config::mistrust::BuilderExt as _;
use onionpool_config::ConfigurationSources;
use tracing::{error, info};

use crate::pool::PoolHealth;

/// Where to look for a config file if none is given on the command line.
fn default_config_file() -> PathBuf {
    PathBuf::from("/etc/onionpool/onionpool.toml")
}

/// Command-line arguments accepted by the `onionpool` binary.
#[derive(Debug, Parser)]
#[command(
    name = "onionpool",
    version,
    about = "Supervisor for a pool of onion-routing client instances fronted by a load balancer"
)]
pub struct Cli {
    /// Config file(s) to read, applied in order. Defaults to a single
    /// well-known path if none is given.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_files: Vec<PathBuf>,

    /// Override config parameters, using TOML-like `key=value` syntax.
    #[arg(short = 'o', value_name = "KEY=VALUE")]
    pub options: Vec<String>,

    /// Override the configured log filter (e.g. `debug`, `onionpool::pool=trace`).
    #[arg(short = 'l', long = "log-level", value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Don't check permissions on the files we use.
    #[arg(long)]
    pub disable_fs_permission_checks: bool,
}

/// Parse `cli_args`, load configuration, and run one supervisor invocation
/// to completion (or until interrupted by SIGINT/SIGTERM).
///
/// Returns the process exit code the caller should use; never panics on
/// malformed configuration or a failed run, since both map to a documented
/// exit code instead.
pub async fn main_main<I, T>(cli_args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(cli_args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return 2;
        }
    };

    let cfg_mistrust = if cli.disable_fs_permission_checks {
        fs_mistrust::Mistrust::new_dangerously_trust_everyone()
    } else {
        match fs_mistrust::MistrustBuilder::default().build_for_pool() {
            Ok(m) => m,
            Err(e) => {
                eprintln!("onionpool: {e}");
                return 2;
            }
        }
    };

    let mut cfg_sources = ConfigurationSources::from_cmdline(
        default_config_file(),
        cli.config_files.clone(),
        cli.options.clone(),
    );
    cfg_sources.set_mistrust(cfg_mistrust.clone());

    let config: PoolConfig = match cfg_sources.load().and_then(|raw| raw.try_deserialize()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("onionpool: invalid configuration: {e}");
            return 2;
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("onionpool: invalid configuration: {e}");
        return 2;
    }

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.filter = level.clone();
    }

    let _log_guards = match logging::setup_logging(&logging_config, &cfg_mistrust) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("onionpool: failed to set up logging: {e}");
            return 2;
        }
    };

    #[cfg(feature = "harden")]
    if let Err(e) = crate::process::enable_process_hardening() {
        eprintln!("onionpool: {e}");
        return 2;
    }

    crate::process::use_max_file_limit();

    info!("starting onionpool");

    let health_interval = config.health_interval;
    let mut coordinator = Coordinator::new(config);
    let result = run_until_stopped(&mut coordinator, health_interval).await;

    match &result {
        Ok(()) => info!("onionpool exiting cleanly"),
        Err(e) => {
            error!(error = %e, "onionpool exiting with error");
            if matches!(e, Error::RestoreFailed(_)) {
                eprintln!(
                    "onionpool: rollback did not fully succeed; inspect {} manually",
                    "host firewall rules and /etc/resolv.conf"
                );
            }
            eprintln!("onionpool: {e}");
        }
    }

    error::exit_code(&result)
}

/// Start the coordinator, then loop between periodic health probes and a
/// stop signal until one of: a stop signal arrives, or the pool's health
/// aggregate turns `Failed` (in which case the coordinator has already torn
/// itself down by the time this returns).
async fn run_until_stopped(coordinator: &mut Coordinator, health_interval: Duration) -> Result<(), Error> {
    coordinator.start().await?;

    loop {
        tokio_crate::select! {
            () = wait_for_stop_signal() => {
                info!("stop requested");
                break;
            }
            () = tokio_crate::time::sleep(health_interval) => {
                if matches!(coordinator.probe_health().await?, PoolHealth::Failed) {
                    // The coordinator already tore itself down and recorded
                    // which instance failed in the log; this is a summary
                    // signal for the exit-code mapping, not a new failure.
                    return Err(Error::HealthLost(0));
                }
            }
        }
    }

    coordinator.stop().await
}

/// Wait for either Ctrl-C or (on Unix) `SIGTERM`.
async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio_crate::signal::unix::signal(tokio_crate::signal::unix::SignalKind::terminate())
        {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio_crate::signal::ctrl_c().await;
                return;
            }
        };
        tokio_crate::select! {
            _ = tokio_crate::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio_crate::signal::ctrl_c().await;
    }
}

/// Main program, callable directly from the binary crate's `main`.
///
/// Returns the process exit code the caller should pass to
/// [`std::process::exit`].
pub async fn main() -> i32 {
    main_main(std::env::args_os()).await
}
