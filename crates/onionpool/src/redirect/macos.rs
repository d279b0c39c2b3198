//! macOS transparent redirection via `pf`'s `rdr` rules, plus a pinned
//! resolver override for the duration of the run.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_crate::fs;
use tokio_crate::process::Command;

use super::{RedirectTargets, Redirector};
use crate::error::Error;

/// Where we write the DNS override while redirection is active.
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// A public resolver to use while the redirector owns `/etc/resolv.conf`;
/// once traffic is redirected, lookups to it are themselves intercepted.
const SAFE_RESOLVER_CONTENTS: &str = "nameserver 9.9.9.9\n";

/// Matches the `interface: en0`-style line in `route -n get default` output.
static INTERFACE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"interface: (\S+)").expect("built-in regex"));

/// The pre-install host state, captured for exact restoration.
struct PfSnapshot {
    was_enabled: bool,
    previous_resolv_conf: Vec<u8>,
    previous_ruleset: Vec<u8>,
}

/// `pf`-backed [`Redirector`].
pub struct PfRedirector {
    pfctl_path: PathBuf,
    rules_path: PathBuf,
    /// Physical interface to install `rdr` rules on. `None` means resolve
    /// the current default route's interface at install time.
    interface: Option<String>,
    snapshot: Option<PfSnapshot>,
}

impl PfRedirector {
    /// Construct a redirector that will invoke the system `pfctl`.
    pub fn new() -> Self {
        PfRedirector {
            pfctl_path: PathBuf::from("/sbin/pfctl"),
            rules_path: PathBuf::from("/etc/pf.anchors/onionpool"),
            interface: None,
            snapshot: None,
        }
    }

    /// Point this redirector at a specific, already-checked `pfctl` binary.
    pub fn with_binary(mut self, path: PathBuf) -> Self {
        self.pfctl_path = path;
        self
    }

    /// Pin the physical interface `rdr` rules are installed on, bypassing
    /// default-route resolution. Mainly useful for tests.
    pub fn with_interface(mut self, interface: String) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Whether `pf` currently reports itself enabled.
    async fn pf_enabled(&self) -> Result<bool, Error> {
        let output = Command::new(&self.pfctl_path)
            .arg("-s")
            .arg("info")
            .output()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -s info: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.contains("Status: Enabled"))
    }

    /// Resolve the physical interface `rdr` rules should target: the pinned
    /// [`Self::interface`] if set, otherwise the current default route's
    /// interface, via `route -n get default`.
    ///
    /// Targeting the default-route interface (rather than `lo0`) is what
    /// actually steers outbound host traffic into the rules; `lo0` only
    /// ever sees traffic this host already addressed to itself.
    async fn resolve_interface(&self) -> Result<String, Error> {
        if let Some(interface) = &self.interface {
            return Ok(interface.clone());
        }

        let output = Command::new("route")
            .args(["-n", "get", "default"])
            .output()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("route -n get default: {e}")))?;
        let text = String::from_utf8_lossy(&output.stdout);

        INTERFACE_LINE
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                Error::RedirectInstallFailed(
                    "could not determine default route interface".into(),
                )
            })
    }

    /// Write the `rdr` rule file redirecting TCP and DNS UDP on `interface`
    /// to the load balancer's front-end port.
    async fn write_rules(&self, interface: &str, targets: RedirectTargets) -> Result<(), Error> {
        let mut rules = format!(
            "rdr pass on {interface} proto tcp to any -> 127.0.0.1 port {}\n",
            targets.lb_front_port
        );
        if let Some(dns_port) = targets.dns_port {
            rules.push_str(&format!(
                "rdr pass on {interface} proto udp to any port 53 -> 127.0.0.1 port {dns_port}\n"
            ));
        }

        fs::write(&self.rules_path, rules)
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("writing pf rules: {e}")))
    }

    /// Capture the currently loaded ruleset as text, for later byte-for-byte
    /// restoration via [`Self::reload_ruleset`].
    async fn capture_ruleset(&self) -> Result<Vec<u8>, Error> {
        let output = Command::new(&self.pfctl_path)
            .args(["-s", "rules"])
            .output()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -s rules: {e}")))?;

        if !output.status.success() {
            return Err(Error::RedirectInstallFailed(
                "pfctl -s rules exited non-zero".into(),
            ));
        }

        Ok(output.stdout)
    }

    /// Reload a previously captured ruleset via `pfctl -f -`, piping it in
    /// on stdin rather than round-tripping through the rules file.
    async fn reload_ruleset(&self, ruleset: &[u8]) -> Result<(), Error> {
        use tokio_crate::io::AsyncWriteExt;
        use tokio_crate::process::Stdio;

        let mut child = Command::new(&self.pfctl_path)
            .arg("-f")
            .arg("-")
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -f -: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(ruleset)
                .await
                .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -f - stdin: {e}")))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -f - wait: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::RedirectInstallFailed(
                "pfctl -f - exited non-zero".into(),
            ))
        }
    }

    /// Atomically overwrite `/etc/resolv.conf` with a safe public resolver.
    async fn overwrite_resolv_conf(&self) -> Result<(), Error> {
        let tmp = PathBuf::from(format!("{RESOLV_CONF}.onionpool-tmp"));
        fs::write(&tmp, SAFE_RESOLVER_CONTENTS)
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("writing resolv.conf tmp: {e}")))?;
        fs::rename(&tmp, RESOLV_CONF)
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("renaming resolv.conf: {e}")))
    }

    /// Restore `/etc/resolv.conf` from the captured snapshot, atomically.
    async fn restore_resolv_conf(&self, contents: &[u8]) -> Result<(), Error> {
        let tmp = PathBuf::from(format!("{RESOLV_CONF}.onionpool-restore"));
        fs::write(&tmp, contents)
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("writing resolv.conf restore: {e}")))?;
        fs::rename(&tmp, RESOLV_CONF)
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("renaming resolv.conf: {e}")))
    }
}

#[async_trait::async_trait]
impl Redirector for PfRedirector {
    async fn install(&mut self, targets: RedirectTargets) -> Result<(), Error> {
        if self.snapshot.is_some() {
            return Err(Error::RedirectAlreadyActive);
        }

        let was_enabled = self.pf_enabled().await?;
        let previous_resolv_conf = fs::read(RESOLV_CONF)
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("reading resolv.conf: {e}")))?;
        let previous_ruleset = self.capture_ruleset().await?;

        let install_result = async {
            let interface = self.resolve_interface().await?;
            self.write_rules(&interface, targets).await?;

            let status = Command::new(&self.pfctl_path)
                .arg("-f")
                .arg(&self.rules_path)
                .status()
                .await
                .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -f: {e}")))?;
            if !status.success() {
                return Err(Error::RedirectInstallFailed("pfctl -f failed".into()));
            }

            let status = Command::new(&self.pfctl_path)
                .arg("-E")
                .status()
                .await
                .map_err(|e| Error::RedirectInstallFailed(format!("pfctl -E: {e}")))?;
            if !status.success() {
                return Err(Error::RedirectInstallFailed("pfctl -E failed".into()));
            }

            self.overwrite_resolv_conf().await
        }
        .await;

        if let Err(e) = install_result {
            let _ = self.restore_resolv_conf(&previous_resolv_conf).await;
            if was_enabled {
                let _ = self.reload_ruleset(&previous_ruleset).await;
            } else {
                let _ = Command::new(&self.pfctl_path).arg("-d").status().await;
            }
            return Err(e);
        }

        self.snapshot = Some(PfSnapshot {
            was_enabled,
            previous_resolv_conf,
            previous_ruleset,
        });
        Ok(())
    }

    async fn restore(&mut self) -> Result<(), Error> {
        let snapshot = match self.snapshot.take() {
            Some(s) => s,
            None => return Ok(()),
        };

        let mut last_error = None;

        if snapshot.was_enabled {
            if let Err(e) = self.reload_ruleset(&snapshot.previous_ruleset).await {
                last_error = Some(e);
            }
        } else if let Err(e) = run_checked(&self.pfctl_path, &["-d"]).await {
            last_error = Some(e);
        }

        if let Err(e) = self
            .restore_resolv_conf(&snapshot.previous_resolv_conf)
            .await
        {
            last_error = Some(e);
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_active(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Run `pfctl` with `args`, mapping a non-zero exit to a `RestoreFailed`-
/// flavored error for the caller to aggregate.
async fn run_checked(pfctl_path: &std::path::Path, args: &[&str]) -> Result<(), Error> {
    let status = Command::new(pfctl_path)
        .args(args)
        .status()
        .await
        .map_err(|e| Error::RedirectInstallFailed(format!("pfctl {args:?}: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::RedirectInstallFailed(format!(
            "pfctl {args:?} exited with {status:?}"
        )))
    }
}

impl Default for PfRedirector {
    fn default() -> Self {
        Self::new()
    }
}
