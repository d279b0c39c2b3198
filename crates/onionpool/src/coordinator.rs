//! The Lifecycle Coordinator: the single public surface tying the Port
//! Allocator, Credential Service, Template Renderer, Pool Manager, Proxy
//! Front-End, and Redirector together with strict ordering and atomic
//! rollback on failure.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::binaries::{self, ResolvedBinaries};
use crate::cfg::PoolConfig;
use crate::credentials::{self, Credentials};
use crate::error::Error;
use crate::frontend::{FilterStartArgs, ProxyFrontEnd};
use crate::pool::{PoolHealth, PoolManager};
use crate::ports::{self, PortMap, PortRequest};
use crate::redirect::{self, RedirectTargets, Redirector};
use crate::template::{self, TemplateValues};

/// The onion-router's password-hash subcommand, e.g. `tor --hash-password`.
const HASH_SUBCOMMAND: &[&str] = &["--hash-password"];

/// The Coordinator's top-level state machine.
///
/// Each variant names the last stage that completed successfully; it is the
/// authoritative source of what a rollback must undo.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RunState {
    /// Nothing has happened yet.
    Init,
    /// Ports reserved.
    PortsAllocated,
    /// Templates rendered to disk.
    ConfigsRendered,
    /// All pool instances reached `Ready`.
    InstancesUp,
    /// Load balancer (and optional filter) verified reachable.
    FrontEndUp,
    /// Host redirection installed.
    RedirectionActive,
    /// Steady state.
    Running,
    /// A `Stop` is in progress.
    Draining,
    /// Stopped cleanly.
    Stopped,
    /// Terminated with the named stage as the point of failure.
    Failed(&'static str),
}

/// Runs one supervisor invocation end to end.
pub struct Coordinator {
    config: PoolConfig,
    state: RunState,
    binaries: Option<ResolvedBinaries>,
    port_map: Option<PortMap>,
    run_root: Option<PathBuf>,
    credentials: Option<Credentials>,
    pool: Option<PoolManager>,
    frontend: Option<ProxyFrontEnd>,
    redirector: Option<Box<dyn Redirector>>,
}

impl Coordinator {
    /// Build a coordinator for `config`, not yet started.
    pub fn new(config: PoolConfig) -> Self {
        Coordinator {
            config,
            state: RunState::Init,
            binaries: None,
            port_map: None,
            run_root: None,
            credentials: None,
            pool: None,
            frontend: None,
            redirector: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the full startup sequence: validate config, resolve binaries,
    /// allocate ports, derive credentials, render templates, bring up the
    /// pool, bring up the front-end, and (if enabled) install redirection.
    ///
    /// On any failure after ports are allocated, every completed stage is
    /// rolled back, in reverse, before the original error is returned.
    pub async fn start(&mut self) -> Result<(), Error> {
        if !matches!(self.state, RunState::Init) {
            return Err(crate::cfg::unreachable_state("non-Init", "start").into());
        }

        self.config
            .validate()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        let binaries = binaries::resolve(&self.config.binaries)?;

        let port_map = ports::allocate(
            self.config.instances,
            PortRequest::Scan(self.config.socks_base_port),
            PortRequest::Scan(self.config.control_base_port),
            PortRequest::Explicit(self.config.lb_front_port),
            if self.config.filter_listen_port != 0 {
                Some(PortRequest::Explicit(self.config.filter_listen_port))
            } else {
                None
            },
            if self.config.dns_listen_port != 0 {
                Some(PortRequest::Explicit(self.config.dns_listen_port))
            } else {
                None
            },
        )?;

        self.binaries = Some(binaries);
        self.port_map = Some(port_map);
        self.state = RunState::PortsAllocated;
        info!("ports allocated");

        if let Err(e) = self.bring_up_rest().await {
            let failed_stage = stage_name(self.state);
            let _ = self.teardown().await;
            self.state = RunState::Failed(failed_stage);
            return Err(e);
        }

        self.state = RunState::Running;
        info!("coordinator reached Running");
        Ok(())
    }

    /// The stages after `PortsAllocated`: credentials, templates, pool,
    /// front-end, redirection.
    async fn bring_up_rest(&mut self) -> Result<(), Error> {
        let binaries = self
            .binaries
            .as_ref()
            .expect("ports allocated implies binaries resolved")
            .clone();
        let port_map = self
            .port_map
            .as_ref()
            .expect("ports allocated implies port_map set")
            .clone();

        let credentials = credentials::derive(&binaries.onion_router, HASH_SUBCOMMAND).await?;
        self.credentials = Some(credentials.clone());

        let run_root = self.config.run_dir.join(run_id());
        std::fs::create_dir_all(&run_root)
            .map_err(|e| Error::TemplateRenderError(format!("creating run dir: {e}")))?;
        self.run_root = Some(run_root.clone());

        render_all_configs(&self.config, &port_map, &credentials, &run_root)?;
        self.state = RunState::ConfigsRendered;
        info!("configs rendered");

        let effective_user = self
            .config
            .user
            .as_deref()
            .map(crate::process::resolve_user)
            .transpose()?;

        let specs = PoolManager::build_specs(&port_map, &run_root);
        let pool = PoolManager::start(
            specs,
            binaries.onion_router.clone(),
            credentials.plaintext.clone(),
            self.config.bootstrap_timeout,
            self.config.grace,
            effective_user,
        )
        .await?;
        self.pool = Some(pool);
        self.state = RunState::InstancesUp;
        info!("pool reached InstancesUp");

        let lb_log_path = run_root.join("lb.log");
        let filter_log_path = run_root.join("filter.log");
        let filter_config_path = run_root.join("privoxy.cfg");
        let filter_args = match (&binaries.filter, port_map.filter_listen_port) {
            (Some(filter_path), Some(listen_port)) => Some(FilterStartArgs {
                filter_path,
                config_path: filter_config_path,
                listen_port,
                log_path: &filter_log_path,
            }),
            _ => None,
        };
        let frontend = ProxyFrontEnd::start(
            &binaries.load_balancer,
            &run_root.join("haproxy.cfg"),
            port_map.lb_front_port,
            &lb_log_path,
            filter_args,
        )
        .await?;
        self.frontend = Some(frontend);
        self.state = RunState::FrontEndUp;
        info!("front-end reached Up");

        if self.config.enable_redirect {
            let mut redirector = redirect::for_host(binaries.packet_filter.clone());
            redirector
                .install(RedirectTargets {
                    lb_front_port: port_map.lb_front_port,
                    dns_port: port_map.dns_port,
                })
                .await?;
            self.redirector = Some(redirector);
            self.state = RunState::RedirectionActive;
            info!("redirection installed");
        }

        Ok(())
    }

    /// Run one aggregate health probe across the pool.
    ///
    /// If the pool's aggregate health is `Failed`, the coordinator tears
    /// itself down and transitions to `Failed("health")`.
    pub async fn probe_health(&mut self) -> Result<PoolHealth, Error> {
        let health = match self.pool.as_mut() {
            Some(pool) => pool.probe_health().await,
            None => return Ok(PoolHealth::Healthy),
        };

        if matches!(health, PoolHealth::Failed) {
            warn!("pool health aggregate is Failed");
            self.state = RunState::Draining;
            let _ = self.teardown().await;
            self.state = RunState::Failed("health");
        }

        Ok(health)
    }

    /// Orderly stop from whatever non-terminal state is current.
    ///
    /// Idempotent: calling this when already `Stopped` (or still `Init`) is
    /// a no-op returning success.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if matches!(self.state, RunState::Stopped | RunState::Init) {
            return Ok(());
        }

        self.state = RunState::Draining;
        let errors = self.teardown().await;

        if errors.is_empty() {
            self.state = RunState::Stopped;
            info!("coordinator stopped cleanly");
            Ok(())
        } else {
            self.state = RunState::Failed("teardown");
            Err(Error::RestoreFailed(errors))
        }
    }

    /// Run every teardown step against whatever state is currently held, in
    /// the mandatory order: Redirector, then Proxy Front-End, then Pool
    /// (reverse index), then rendered configs. Every step runs even if an
    /// earlier one failed; failures are aggregated, not swallowed.
    async fn teardown(&mut self) -> retry_error::RetryError<Error> {
        let mut errors = retry_error::RetryError::in_attempt_to("tear down onionpool run");

        if let Some(mut redirector) = self.redirector.take() {
            match redirector.restore().await {
                Ok(()) => info!("redirector.stop ok"),
                Err(e) => {
                    error!(error = %e, "redirector restore failed");
                    errors.push(e);
                }
            }
        }

        if let Some(mut frontend) = self.frontend.take() {
            if let Err(e) = frontend.stop(self.config.grace).await {
                for cause in e.sources() {
                    errors.push(summarize(cause));
                }
            }
        }

        if let Some(mut pool) = self.pool.take() {
            if let Err(e) = pool.stop_all(self.config.grace).await {
                for cause in e.sources() {
                    errors.push(summarize(cause));
                }
            }
        }

        self.credentials = None;
        if let Some(root) = self.run_root.take() {
            if let Err(e) = std::fs::remove_dir_all(&root) {
                warn!(error = %e, path = %root.display(), "failed to remove run directory");
            }
        }

        errors
    }
}

/// `RetryError<Error>` has no generic `Clone` bound usable here (`Error`
/// does not implement `Clone`), so a cause collected from a nested
/// `RetryError<Error>` is re-wrapped by message rather than cloned.
fn summarize(e: &Error) -> Error {
    Error::TemplateRenderError(e.to_string())
}

/// Render the per-instance `torrc`s, `haproxy.cfg`, and (if enabled)
/// `privoxy.cfg` into `run_root`, under a [`fs_mistrust::CheckedDir`]
/// verifying the directory and each written file's permissions.
fn render_all_configs(
    config: &PoolConfig,
    port_map: &PortMap,
    credentials: &Credentials,
    run_root: &std::path::Path,
) -> Result<(), Error> {
    let mistrust = fs_mistrust::Mistrust::new();
    let checked_dir = mistrust
        .verifier()
        .secure_dir(run_root)
        .map_err(|e| Error::TemplateRenderError(format!("securing run dir: {e}")))?;

    let backends = TemplateValues::backends_block(port_map);

    for (i, ports) in port_map.instances.iter().enumerate() {
        let data_dir_name = format!("instance-{i}");
        checked_dir
            .make_secure_directory(&data_dir_name)
            .map_err(|e| Error::TemplateRenderError(format!("creating {data_dir_name}: {e}")))?;

        let index = i as u16;
        let values = TemplateValues {
            socks_port: Some(ports.socks_port),
            control_port: Some(ports.control_port),
            control_password_hash: Some(credentials.hashed.as_inner().clone()),
            data_dir: Some(run_root.join(&data_dir_name).display().to_string()),
            lb_front_port: Some(port_map.lb_front_port),
            filter_listen_port: port_map.filter_listen_port,
            dns_port: if index == crate::pool::DNS_INSTANCE_INDEX {
                port_map.dns_port
            } else {
                None
            },
            backends: Some(backends.clone()),
        };
        template::render_into(
            &config.templates_dir,
            "torrc.tmpl",
            &format!("torrc-{i}"),
            &values,
            &checked_dir,
        )?;
    }

    let shared_values = TemplateValues {
        socks_port: None,
        control_port: None,
        control_password_hash: None,
        data_dir: None,
        lb_front_port: Some(port_map.lb_front_port),
        filter_listen_port: port_map.filter_listen_port,
        dns_port: None,
        backends: Some(backends),
    };
    template::render_into(
        &config.templates_dir,
        "haproxy.cfg.tmpl",
        "haproxy.cfg",
        &shared_values,
        &checked_dir,
    )?;

    if port_map.filter_listen_port.is_some() && config.binaries.filter.is_some() {
        template::render_into(
            &config.templates_dir,
            "privoxy.cfg.tmpl",
            "privoxy.cfg",
            &shared_values,
            &checked_dir,
        )?;
    }

    Ok(())
}

/// A short, filesystem-safe identifier for one supervisor run.
fn run_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let n: u64 = rng.random();
    format!("run-{n:016x}")
}

/// Map a `RunState` to the stage name used in `Failed(step)`.
fn stage_name(state: RunState) -> &'static str {
    match state {
        RunState::Init => "init",
        RunState::PortsAllocated => "ports",
        RunState::ConfigsRendered => "configs",
        RunState::InstancesUp => "instances",
        RunState::FrontEndUp => "frontend",
        RunState::RedirectionActive => "redirect",
        RunState::Running => "running",
        RunState::Draining => "draining",
        RunState::Stopped => "stopped",
        RunState::Failed(s) => s,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stage_name_covers_every_variant() {
        assert_eq!(stage_name(RunState::Init), "init");
        assert_eq!(stage_name(RunState::Failed("x")), "x");
    }

    #[test]
    fn run_id_is_unique_enough() {
        let a = run_id();
        let b = run_id();
        assert_ne!(a, b);
        assert!(a.starts_with("run-"));
    }

    #[test]
    fn new_coordinator_starts_at_init() {
        let cfg = PoolConfig {
            instances: 1,
            socks_base_port: 19500,
            control_base_port: 19600,
            lb_front_port: 19700,
            filter_listen_port: 0,
            dns_listen_port: 0,
            user: None,
            bootstrap_timeout: Duration::from_secs(1),
            health_interval: Duration::from_secs(1),
            grace: Duration::from_secs(1),
            templates_dir: PathBuf::from("/tmp/templates"),
            run_dir: PathBuf::from("/tmp/run"),
            enable_redirect: false,
            binaries: crate::cfg::BinariesConfig {
                onion_router: PathBuf::from("/usr/bin/tor"),
                load_balancer: PathBuf::from("/usr/bin/haproxy"),
                filter: None,
                packet_filter: PathBuf::from("/usr/bin/iptables"),
            },
            logging: crate::logging::LoggingConfig::default(),
        };
        let coordinator = Coordinator::new(cfg);
        assert_eq!(coordinator.state(), RunState::Init);
    }
}
