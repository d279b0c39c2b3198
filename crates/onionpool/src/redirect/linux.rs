//! Linux transparent redirection via `iptables`'s NAT table.

use tokio_crate::process::Command;

use super::{RedirectTargets, Redirector};
use crate::error::Error;

/// Comment tag applied to every rule this redirector installs, so teardown
/// can identify (and a future run can detect stale leftovers of) exactly
/// the rules this supervisor owns.
const SENTINEL: &str = "onionpool-redirect";

/// RFC1918 ranges excluded from redirection so LAN traffic is unaffected.
const PRIVATE_RANGES: &[&str] = &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// The pre-install NAT table, captured verbatim for byte-for-byte restore.
struct NatSnapshot {
    rules_save: String,
}

/// `iptables`-backed [`Redirector`].
pub struct IptablesRedirector {
    iptables_path: std::path::PathBuf,
    snapshot: Option<NatSnapshot>,
}

impl IptablesRedirector {
    /// Construct a redirector that will invoke the system `iptables`.
    ///
    /// Callers should immediately overwrite [`Self::iptables_path`] with the
    /// resolved, checked path from [`crate::binaries::ResolvedBinaries`]
    /// before calling [`Redirector::install`].
    pub fn new() -> Self {
        IptablesRedirector {
            iptables_path: std::path::PathBuf::from("/usr/sbin/iptables"),
            snapshot: None,
        }
    }

    /// Point this redirector at a specific, already-checked `iptables`
    /// binary.
    pub fn with_binary(mut self, path: std::path::PathBuf) -> Self {
        self.iptables_path = path;
        self
    }

    /// Capture the current NAT table as text, for later byte-for-byte
    /// restoration.
    async fn capture_snapshot(&self) -> Result<NatSnapshot, Error> {
        let output = Command::new(&self.iptables_path)
            .args(["-t", "nat", "-S"])
            .output()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("iptables -S: {e}")))?;

        if !output.status.success() {
            return Err(Error::RedirectInstallFailed(
                "iptables -t nat -S exited non-zero".into(),
            ));
        }

        Ok(NatSnapshot {
            rules_save: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }

    /// Run one `iptables` invocation, returning an error tagged with the
    /// failing rule for easier debugging.
    async fn run(&self, args: &[&str]) -> Result<(), Error> {
        let status = Command::new(&self.iptables_path)
            .args(args)
            .status()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("iptables {args:?}: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::RedirectInstallFailed(format!(
                "iptables {args:?} exited with {status:?}"
            )))
        }
    }

    /// Flush every rule this redirector could have installed (identified by
    /// the sentinel comment), independent of whether a snapshot exists.
    async fn flush_our_rules(&self) {
        // Best-effort: iptables has no "delete rules matching comment"
        // primitive, so a full NAT flush is used instead, followed by
        // reapplying the snapshot. The flush itself cannot fail the
        // teardown; only failure to reapply is reported.
        let _ = self.run(&["-t", "nat", "-F"]).await;
    }

    /// Reapply a previously captured NAT snapshot from `iptables-restore`
    /// input.
    async fn reapply_snapshot(&self, snapshot: &NatSnapshot) -> Result<(), Error> {
        use tokio_crate::io::AsyncWriteExt;
        use tokio_crate::process::Stdio;

        let mut child = Command::new("iptables-restore")
            .arg("--table=nat")
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| Error::RedirectInstallFailed(format!("iptables-restore: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(snapshot.rules_save.as_bytes())
                .await
                .map_err(|e| Error::RedirectInstallFailed(format!("iptables-restore stdin: {e}")))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::RedirectInstallFailed(format!("iptables-restore wait: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::RedirectInstallFailed(
                "iptables-restore exited non-zero".into(),
            ))
        }
    }
}

#[async_trait::async_trait]
impl Redirector for IptablesRedirector {
    async fn install(&mut self, targets: RedirectTargets) -> Result<(), Error> {
        if self.snapshot.is_some() {
            return Err(Error::RedirectAlreadyActive);
        }

        let snapshot = self.capture_snapshot().await?;

        if let Err(e) = self.install_rules(targets).await {
            // Roll back: nothing durable was captured besides the
            // in-memory snapshot, so there's nothing to restore yet, but we
            // must not leave a half-applied rule set.
            self.flush_our_rules().await;
            let _ = self.reapply_snapshot(&snapshot).await;
            return Err(e);
        }

        self.snapshot = Some(snapshot);
        Ok(())
    }

    async fn restore(&mut self) -> Result<(), Error> {
        let snapshot = match self.snapshot.take() {
            Some(s) => s,
            None => return Ok(()),
        };

        self.flush_our_rules().await;
        self.reapply_snapshot(&snapshot).await
    }

    fn is_active(&self) -> bool {
        self.snapshot.is_some()
    }
}

impl IptablesRedirector {
    /// Install the excludes, TCP redirect, and UDP/53 redirect rules.
    async fn install_rules(&self, targets: RedirectTargets) -> Result<(), Error> {
        self.run(&["-t", "nat", "-N", "ONIONPOOL"]).await.ok();
        self.run(&[
            "-t", "nat", "-A", "ONIONPOOL", "-m", "comment", "--comment", SENTINEL,
            "-o", "lo", "-j", "RETURN",
        ])
        .await?;

        for range in PRIVATE_RANGES {
            self.run(&[
                "-t", "nat", "-A", "ONIONPOOL", "-m", "comment", "--comment", SENTINEL,
                "-d", range, "-j", "RETURN",
            ])
            .await?;
        }

        let lb_port = targets.lb_front_port.to_string();
        self.run(&[
            "-t", "nat", "-A", "ONIONPOOL", "-m", "comment", "--comment", SENTINEL,
            "-p", "tcp", "--syn", "-j", "REDIRECT", "--to-port", &lb_port,
        ])
        .await?;

        if let Some(dns_port) = targets.dns_port {
            let dns_port = dns_port.to_string();
            self.run(&[
                "-t", "nat", "-A", "ONIONPOOL", "-m", "comment", "--comment", SENTINEL,
                "-p", "udp", "--dport", "53", "-j", "REDIRECT", "--to-port", &dns_port,
            ])
            .await?;
        }

        self.run(&["-t", "nat", "-A", "OUTPUT", "-j", "ONIONPOOL"])
            .await?;

        Ok(())
    }
}

impl Default for IptablesRedirector {
    fn default() -> Self {
        Self::new()
    }
}
