//! Process-level helpers: file-descriptor limits and process-group
//! spawning/signaling.
//!
//! Every child this supervisor spawns (onion-router instances, the load
//! balancer, the HTTP filter) is placed in its own process group so that a
//! supervisor crash does not orphan a half-running pool, and so that
//! teardown can signal the whole group — including any grandchildren the
//! binary itself forks — rather than just the direct child pid.

use std::os::unix::process::CommandExt as _;
use std::process::Stdio;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio_crate::process::{Child, Command};

use crate::error::Error;

/// A resolved uid/gid pair to run an onion-router child process as.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveUser {
    /// The target user id.
    pub uid: u32,
    /// The target primary group id.
    pub gid: u32,
}

/// Resolve `name` (a system username) to its uid/gid via the system user
/// database (`getpwnam`, through `nix`).
pub fn resolve_user(name: &str) -> Result<EffectiveUser, Error> {
    let user = nix::unistd::User::from_name(name)
        .map_err(|e| Error::InvalidConfig(format!("looking up user {name:?}: {e}")))?
        .ok_or_else(|| Error::InvalidConfig(format!("no such user: {name:?}")))?;
    Ok(EffectiveUser {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
    })
}

/// Enable anti-forensic process hardening (disabling core dumps and
/// preventing the process's memory from being swapped or ptraced), via
/// `secmem_proc`.
///
/// Only compiled in when the `harden` feature is enabled; callers should
/// treat a failure here as fatal, since silently continuing unhardened
/// would contradict an operator's explicit request for it.
#[cfg(feature = "harden")]
pub fn enable_process_hardening() -> Result<(), Error> {
    secmem_proc::harden_process()
        .map_err(|e| Error::InvalidConfig(format!("enabling process hardening: {e}")))
}

/// Set our current maximum-file limit to a large value, if we can.
///
/// Since we supervise several long-lived proxy processes at once, each
/// holding many sockets, we're likely to need a _lot_ of simultaneous file
/// descriptors.
///
/// This doesn't actually do anything on windows.
pub fn use_max_file_limit() {
    /// Default maximum value to set for our maximum-file limit.
    const DFLT_MAX_N_FILES: u64 = 16384;

    match rlimit::utils::increase_nofile_limit(DFLT_MAX_N_FILES) {
        Ok(n) => tracing::debug!("increased process file limit to {}", n),
        Err(e) => tracing::warn!("error while increasing file limit: {}", e),
    }
}

/// Spawn `command` detached into its own process group, with stdout/stderr
/// redirected to `log_path` (truncated and reopened at startup).
///
/// Placing the child in a new process group (`setsid`-equivalent via
/// `process_group(0)`) means a later [`terminate_group`] reaches every
/// process the child itself may have forked, not just the direct pid.
///
/// `effective_user`, if given, drops the child to that uid/gid before exec,
/// via `setuid`/`setgid` applied by the standard library's pre-exec path.
pub fn spawn_in_new_group(
    mut command: Command,
    log_path: &std::path::Path,
    effective_user: Option<EffectiveUser>,
) -> std::io::Result<Child> {
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    let log_err = log.try_clone()?;

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .kill_on_drop(false);

    if let Some(user) = effective_user {
        command.uid(user.uid).gid(user.gid);
    }

    command.spawn()
}

/// Send `signal` to the entire process group of `pid` (the group leader).
///
/// Because each child was spawned with [`spawn_in_new_group`], its pid is
/// also its process group id; signaling `-pid` reaches the whole group.
pub fn signal_group(pid: u32, sig: Signal) -> Result<(), nix::Error> {
    let pgid = Pid::from_raw(-(pid as i32));
    signal::kill(pgid, sig)
}

/// Send SIGTERM to a child's process group, wait up to `grace` for it to
/// exit on its own, then send SIGKILL to the group and reap the child.
///
/// Returns the child's exit status if it could be observed.
pub async fn terminate_group(
    child: &mut Child,
    grace: std::time::Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let pid = match child.id() {
        Some(pid) => pid,
        None => return Ok(child.try_wait()?),
    };

    if signal_group(pid, Signal::SIGTERM).is_err() {
        // The process (or its group) is already gone.
        return Ok(child.try_wait()?);
    }

    match tokio_crate::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(Some(status?)),
        Err(_elapsed) => {
            let _ = signal_group(pid, Signal::SIGKILL);
            Ok(Some(child.wait().await?))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio_crate::test]
    async fn terminate_group_reaps_a_sleeping_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"]);
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("child.log");

        let mut child = spawn_in_new_group(cmd, &log_path, None).unwrap();
        let status = terminate_group(&mut child, std::time::Duration::from_secs(2))
            .await
            .unwrap();
        assert!(status.is_some());
        assert!(!status.unwrap().success());
    }
}
