//! Configuration for the onionpool supervisor.
//
// (This module is called `cfg` to avoid a name clash with the `config` crate, which we use.)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use onionpool_error::{internal, ErrorKind, HasKind};

use crate::logging::LoggingConfig;

/// Default number of onion-router instances to spawn.
fn default_instances() -> u16 {
    2
}

/// Default starting port for SOCKS allocation.
fn default_socks_base_port() -> u16 {
    9000
}

/// Default starting port for control-port allocation.
///
/// The onion-router ecosystem is not consistent about whether the control
/// port defaults to 9051 or 9900 depending on distribution; we do not guess
/// and simply expose this as a configuration knob, defaulting to the value
/// this supervisor itself expects its rendered configs to request.
fn default_control_base_port() -> u16 {
    9900
}

/// Default TCP load-balancer front-end port (the redirect target).
fn default_lb_front_port() -> u16 {
    16379
}

/// Default HTTP-filter listen port. `0` disables the filter.
fn default_filter_listen_port() -> u16 {
    8119
}

/// Default DNS redirection target port. `0` disables DNS redirection.
fn default_dns_listen_port() -> u16 {
    0
}

/// Default per-instance bootstrap deadline.
fn default_bootstrap_timeout() -> Duration {
    Duration::from_secs(90)
}

/// Default per-instance health-probe cadence.
fn default_health_interval() -> Duration {
    Duration::from_secs(10)
}

/// Default SIGTERM-to-SIGKILL grace window.
fn default_grace() -> Duration {
    Duration::from_secs(10)
}

/// Configuration for the paths of the binaries this supervisor invokes.
///
/// Every path is resolved to an absolute path and checked for existence and
/// executability at startup; none are ever looked up via `$PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BinariesConfig {
    /// Path to the onion-router client binary.
    pub onion_router: PathBuf,
    /// Path to the TCP load-balancer binary (e.g. `haproxy`).
    pub load_balancer: PathBuf,
    /// Path to the optional HTTP-filter binary (e.g. `privoxy`).
    #[serde(default)]
    pub filter: Option<PathBuf>,
    /// Path to the packet-filter administration tool (`iptables` on Linux,
    /// `pfctl` on macOS).
    pub packet_filter: PathBuf,
}

/// Structure to hold the onionpool supervisor's configuration options,
/// whether from a configuration file or the command line.
///
/// By default the supervisor will run two onion-router instances fronted by
/// a load balancer, with no HTTP filter and with transparent redirection
/// disabled until explicitly requested.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of onion-router instances to spawn.
    #[serde(default = "default_instances")]
    pub instances: u16,

    /// Starting port for SOCKS allocation.
    #[serde(default = "default_socks_base_port")]
    pub socks_base_port: u16,

    /// Starting port for control-port allocation.
    #[serde(default = "default_control_base_port")]
    pub control_base_port: u16,

    /// TCP load-balancer front-end port; the redirection target.
    #[serde(default = "default_lb_front_port")]
    pub lb_front_port: u16,

    /// HTTP-filter listen port. `0` disables the filter.
    #[serde(default = "default_filter_listen_port")]
    pub filter_listen_port: u16,

    /// DNS redirection target port, served by the instance designated
    /// [`crate::instance::InstanceRole::Dns`]. `0` disables DNS redirection.
    #[serde(default = "default_dns_listen_port")]
    pub dns_listen_port: u16,

    /// Effective user for onion-router child processes.
    ///
    /// `None` means the invoking user.
    #[serde(default)]
    pub user: Option<String>,

    /// Per-instance readiness deadline.
    #[serde(with = "humantime_serde", default = "default_bootstrap_timeout")]
    pub bootstrap_timeout: Duration,

    /// Per-instance health-probe cadence.
    #[serde(with = "humantime_serde", default = "default_health_interval")]
    pub health_interval: Duration,

    /// SIGTERM-to-SIGKILL grace window.
    #[serde(with = "humantime_serde", default = "default_grace")]
    pub grace: Duration,

    /// Directory containing the three config templates
    /// (`torrc.tmpl`, `haproxy.cfg.tmpl`, `privoxy.cfg.tmpl`).
    pub templates_dir: PathBuf,

    /// Root directory for rendered configs, per-instance data directories
    /// and logs. Removed on clean shutdown.
    pub run_dir: PathBuf,

    /// Whether to install transparent host-firewall redirection on start.
    #[serde(default)]
    pub enable_redirect: bool,

    /// Paths to the external binaries this supervisor invokes.
    pub binaries: BinariesConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PoolConfig {
    /// Validate cross-field invariants that serde's field-level defaults
    /// cannot express.
    ///
    /// Returns `InvalidConfig` if `instances` is zero, since a pool of no
    /// instances has no SOCKS backends for the load balancer to front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances == 0 {
            return Err(ConfigError::Invalid {
                field: "instances".into(),
                problem: "must be at least 1".into(),
            });
        }
        if self.filter_listen_port != 0 && self.filter_listen_port == self.lb_front_port {
            return Err(ConfigError::Invalid {
                field: "filter_listen_port".into(),
                problem: "must differ from lb_front_port".into(),
            });
        }
        if self.dns_listen_port != 0
            && (self.dns_listen_port == self.lb_front_port
                || self.dns_listen_port == self.filter_listen_port)
        {
            return Err(ConfigError::Invalid {
                field: "dns_listen_port".into(),
                problem: "must differ from lb_front_port and filter_listen_port".into(),
            });
        }
        Ok(())
    }
}

/// An error found while validating a [`PoolConfig`].
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A single field had a value that proved to be unusable.
    #[error("value of {field} was incorrect: {problem}")]
    Invalid {
        /// The name of the offending field.
        field: String,
        /// What was wrong with it.
        problem: String,
    },
}

impl HasKind for ConfigError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Invalid { .. } => ErrorKind::InvalidConfig,
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Invalid {
            field: "<root>".into(),
            problem: e.to_string(),
        }
    }
}

/// Parse a `RunState::Failed` step name back out of a state transition that
/// should have been statically excluded; only reachable through a
/// programming error in the state machine itself.
pub(crate) fn unreachable_state(from: &str, event: &str) -> onionpool_error::InternalError {
    internal!("RunState transition {} on event {} should be unreachable", from, event)
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal() -> PoolConfig {
        PoolConfig {
            instances: 2,
            socks_base_port: default_socks_base_port(),
            control_base_port: default_control_base_port(),
            lb_front_port: default_lb_front_port(),
            filter_listen_port: default_filter_listen_port(),
            dns_listen_port: default_dns_listen_port(),
            user: None,
            bootstrap_timeout: default_bootstrap_timeout(),
            health_interval: default_health_interval(),
            grace: default_grace(),
            templates_dir: PathBuf::from("/tmp/templates"),
            run_dir: PathBuf::from("/tmp/run"),
            enable_redirect: false,
            binaries: BinariesConfig {
                onion_router: PathBuf::from("/usr/bin/tor"),
                load_balancer: PathBuf::from("/usr/bin/haproxy"),
                filter: None,
                packet_filter: PathBuf::from("/usr/bin/iptables"),
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn validate_rejects_zero_instances() {
        let mut cfg = minimal();
        cfg.instances = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_colliding_filter_and_lb_ports() {
        let mut cfg = minimal();
        cfg.filter_listen_port = cfg.lb_front_port;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_colliding_dns_and_lb_ports() {
        let mut cfg = minimal();
        cfg.dns_listen_port = cfg.lb_front_port;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(minimal().validate().is_ok());
    }
}
