//! The Redirector: installs and rolls back OS-specific transparent-redirect
//! rules so that outbound host traffic is steered into the proxy chain.
//!
//! This is the one component with genuine platform polymorphism: a capable
//! set `{install, restore, probe}` with one implementation per supported
//! OS. New platforms implement the same capability set rather than adding
//! branches to existing code.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;

use crate::error::Error;

/// What traffic the Redirector should steer into the proxy chain.
#[derive(Debug, Clone, Copy)]
pub struct RedirectTargets {
    /// The load balancer's front-end port: outbound TCP is redirected here.
    pub lb_front_port: u16,
    /// The onion-router's DNS port, if DNS redirection is enabled.
    pub dns_port: Option<u16>,
}

/// A platform's transparent-redirection capability: install rules, restore
/// the pre-install snapshot, and check whether rules are currently active.
///
/// Implementations must be idempotent: a second `install` without an
/// intervening successful `restore` returns `RedirectAlreadyActive`; a
/// `restore` with no prior snapshot is a no-op returning success.
#[async_trait::async_trait]
pub trait Redirector: Send {
    /// Snapshot current host state, then install redirect rules for
    /// `targets`. Installation and any DNS config substitution are a single
    /// atomic unit: if either step fails, both are rolled back before this
    /// returns.
    async fn install(&mut self, targets: RedirectTargets) -> Result<(), Error>;

    /// Undo whatever `install` did, restoring the snapshot captured then.
    /// A no-op, returning `Ok`, if no snapshot is held.
    async fn restore(&mut self) -> Result<(), Error>;

    /// Whether this redirector currently believes its rules are installed.
    fn is_active(&self) -> bool;
}

/// Construct the `Redirector` implementation for the host OS this binary
/// was built for, pointed at the resolved, existence/executable-checked
/// packet-filter administration tool (`iptables` on Linux, `pfctl` on
/// macOS) rather than a hardcoded `$PATH`-relative guess.
#[cfg(target_os = "linux")]
pub fn for_host(packet_filter: std::path::PathBuf) -> Box<dyn Redirector> {
    Box::new(linux::IptablesRedirector::new().with_binary(packet_filter))
}

/// Construct the `Redirector` implementation for the host OS this binary
/// was built for, pointed at the resolved, existence/executable-checked
/// packet-filter administration tool (`iptables` on Linux, `pfctl` on
/// macOS) rather than a hardcoded `$PATH`-relative guess.
#[cfg(target_os = "macos")]
pub fn for_host(packet_filter: std::path::PathBuf) -> Box<dyn Redirector> {
    Box::new(macos::PfRedirector::new().with_binary(packet_filter))
}

/// No transparent-redirection implementation exists for this platform; any
/// attempt to enable it fails closed rather than silently doing nothing.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn for_host(_packet_filter: std::path::PathBuf) -> Box<dyn Redirector> {
    Box::new(UnsupportedRedirector)
}

/// Placeholder used on platforms with no Redirector implementation.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
struct UnsupportedRedirector;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
#[async_trait::async_trait]
impl Redirector for UnsupportedRedirector {
    async fn install(&mut self, _targets: RedirectTargets) -> Result<(), Error> {
        Err(Error::RedirectInstallFailed(
            "transparent redirection is not implemented on this platform".into(),
        ))
    }

    async fn restore(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }
}
