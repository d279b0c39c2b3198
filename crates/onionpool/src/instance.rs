//! Spawning, readiness-gating, and health-monitoring of a single
//! onion-router instance.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use safelog::Sensitive;
use tokio_crate::io::{AsyncReadExt, AsyncWriteExt};
use tokio_crate::net::TcpStream;
use tokio_crate::process::{Child, Command};
use tokio_crate::time::timeout;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::process::{spawn_in_new_group, terminate_group, EffectiveUser};

/// What role this instance plays. Only `Socks` instances are driven by the
/// current pool; `Dns` is reserved for an onion-router configured to also
/// serve the pool's DNS redirection target.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InstanceRole {
    /// A plain SOCKS-proxying onion-router instance.
    Socks,
    /// An instance additionally serving DNS redirection.
    Dns,
}

/// Immutable description of one onion-router instance, fixed at creation.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Position of this instance within the pool, `0..N`.
    pub index: u16,
    /// The instance's SOCKS listen port.
    pub socks_port: u16,
    /// The instance's control port.
    pub control_port: u16,
    /// The instance's private data directory.
    pub data_dir: PathBuf,
    /// Path to the instance's rendered `torrc`.
    pub config_path: PathBuf,
    /// Path to the instance's stdout/stderr log.
    pub log_path: PathBuf,
    /// This instance's role.
    pub role: InstanceRole,
}

/// The current lifecycle state of a running (or not-yet-running) instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InstanceState {
    /// Not yet started.
    Pending,
    /// Spawned, waiting for readiness.
    Starting,
    /// Passed its readiness check and its most recent health probe.
    Ready,
    /// Failed one health probe; one more failure declares it `Failed`.
    Degraded,
    /// A stop has been requested and is in progress.
    Terminating,
    /// Stopped cleanly.
    Stopped,
    /// Crashed, or failed health and its restart attempt did not recover it.
    Failed,
}

/// A point-in-time health observation for one instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InstanceHealth {
    /// Last probe (or the readiness check) succeeded.
    Healthy,
    /// The most recent probe failed but the instance has not yet been
    /// declared `Failed`.
    Degraded,
    /// The instance is not currently supervising a live process.
    Down,
}

/// Supervises exactly one onion-router child process: spawn, wait for
/// readiness, periodic health probing, and graceful-then-forceful stop.
pub struct InstanceSupervisor {
    spec: InstanceSpec,
    onion_router_path: PathBuf,
    child: Option<Child>,
    state: InstanceState,
    started_at: Option<Instant>,
    consecutive_health_failures: u32,
    password: Sensitive<String>,
    restarted_once: bool,
    effective_user: Option<EffectiveUser>,
}

impl InstanceSupervisor {
    /// Spawn `spec`'s onion-router process and block until it reports
    /// readiness (or the bootstrap deadline elapses).
    ///
    /// `password` is used for the control-port `AUTHENTICATE` health probe;
    /// it is never logged or placed on the command line. `effective_user`,
    /// when given, is applied to the spawned process and must already own
    /// `spec.data_dir` (see [`ensure_data_dir_ownership`]).
    pub async fn start(
        spec: InstanceSpec,
        onion_router_path: &std::path::Path,
        password: Sensitive<String>,
        bootstrap_timeout: Duration,
        effective_user: Option<EffectiveUser>,
    ) -> Result<Self, Error> {
        ensure_data_dir_ownership(&spec.data_dir, effective_user)?;

        let mut cmd = Command::new(onion_router_path);
        cmd.arg("-f").arg(&spec.config_path);

        let child = spawn_in_new_group(cmd, &spec.log_path, effective_user).map_err(|source| {
            Error::SpawnFailed {
                name: "onion-router",
                source,
            }
        })?;

        let mut supervisor = InstanceSupervisor {
            spec,
            onion_router_path: onion_router_path.to_path_buf(),
            child: Some(child),
            state: InstanceState::Starting,
            started_at: Some(Instant::now()),
            consecutive_health_failures: 0,
            password,
            restarted_once: false,
            effective_user,
        };

        supervisor.await_readiness(bootstrap_timeout).await?;
        supervisor.state = InstanceState::Ready;
        info!(
            instance = supervisor.spec.index,
            "instance reached Ready"
        );
        Ok(supervisor)
    }

    /// Index of the supervised instance.
    pub fn index(&self) -> u16 {
        self.spec.index
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Wait for the instance's SOCKS port to accept a bare TCP connection,
    /// which this supervisor treats as the readiness signal (in lieu of
    /// tailing the instance's log for a bootstrap-complete marker, which
    /// requires a log format this crate does not parse).
    async fn await_readiness(&mut self, bootstrap_timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + bootstrap_timeout;
        loop {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(Error::Crashed {
                        instance: self.spec.index,
                        exit_code: status.code(),
                        signal: exit_signal(status),
                    });
                }
            }

            if probe_connect(self.spec.socks_port, Duration::from_secs(2))
                .await
                .is_ok()
            {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::BootstrapTimeout {
                    instance: self.spec.index,
                    timeout_secs: bootstrap_timeout.as_secs(),
                });
            }

            tokio_crate::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Run one health probe: a bare connect to the SOCKS port, and an
    /// `AUTHENTICATE` round-trip on the control port.
    ///
    /// Two consecutive failures move the instance to `Degraded` and trigger
    /// one in-place restart attempt; failing that, the instance is declared
    /// `Failed`.
    pub async fn probe_health(&mut self) -> Result<InstanceHealth, Error> {
        if self.state == InstanceState::Stopped || self.state == InstanceState::Failed {
            return Ok(InstanceHealth::Down);
        }

        if let Some(child) = self.child.as_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                self.state = InstanceState::Failed;
                return Err(Error::Crashed {
                    instance: self.spec.index,
                    exit_code: status.code(),
                    signal: exit_signal(status),
                });
            }
        }

        let ok = probe_connect(self.spec.socks_port, Duration::from_secs(2))
            .await
            .is_ok()
            && probe_control_port(
                self.spec.control_port,
                self.password.as_inner(),
                Duration::from_secs(2),
            )
            .await
            .is_ok();

        if ok {
            self.consecutive_health_failures = 0;
            self.state = InstanceState::Ready;
            return Ok(InstanceHealth::Healthy);
        }

        self.consecutive_health_failures += 1;
        warn!(
            instance = self.spec.index,
            consecutive_failures = self.consecutive_health_failures,
            "health probe failed"
        );

        if self.consecutive_health_failures < 2 {
            return Ok(InstanceHealth::Healthy);
        }

        self.state = InstanceState::Degraded;

        if !self.restarted_once {
            self.restarted_once = true;
            warn!(instance = self.spec.index, "attempting in-place restart");
            if self.restart().await.is_ok() {
                self.consecutive_health_failures = 0;
                self.state = InstanceState::Ready;
                return Ok(InstanceHealth::Healthy);
            }
        }

        self.state = InstanceState::Failed;
        Err(Error::HealthLost(self.spec.index))
    }

    /// Stop the current child (if any) and spawn a fresh one against the
    /// same spec, without re-running the full bootstrap wait.
    async fn restart(&mut self) -> Result<(), Error> {
        if let Some(mut child) = self.child.take() {
            let _ = terminate_group(&mut child, Duration::from_secs(10)).await;
        }

        ensure_data_dir_ownership(&self.spec.data_dir, self.effective_user)?;

        let mut cmd = Command::new(&self.onion_router_path);
        cmd.arg("-f").arg(&self.spec.config_path);

        let child = spawn_in_new_group(cmd, &self.spec.log_path, self.effective_user).map_err(
            |source| Error::SpawnFailed {
                name: "onion-router",
                source,
            },
        )?;
        self.child = Some(child);
        self.await_readiness(Duration::from_secs(90)).await
    }

    /// Current health state without issuing a new probe.
    pub fn health(&self) -> InstanceHealth {
        match self.state {
            InstanceState::Ready => InstanceHealth::Healthy,
            InstanceState::Degraded => InstanceHealth::Degraded,
            _ => InstanceHealth::Down,
        }
    }

    /// Stop the instance: SIGTERM the process group, wait `grace`, then
    /// SIGKILL. Idempotent — calling this on an already-stopped instance is
    /// a no-op.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), Error> {
        if self.state == InstanceState::Stopped {
            return Ok(());
        }
        self.state = InstanceState::Terminating;

        if let Some(mut child) = self.child.take() {
            let status = terminate_group(&mut child, grace)
                .await
                .map_err(|source| Error::SpawnFailed {
                    name: "onion-router",
                    source,
                })?;
            debug!(instance = self.spec.index, ?status, "instance stopped");
        }

        self.state = InstanceState::Stopped;
        Ok(())
    }
}

/// Ensure `data_dir` exists, is mode `0700`, and — when `effective_user` is
/// given — is owned by that user, chowning it if not. Fails closed with
/// [`Error::DataDirOwnership`] if ownership cannot be guaranteed (e.g. this
/// process is not privileged enough to chown root-owned remnants from a
/// prior run).
fn ensure_data_dir_ownership(
    data_dir: &std::path::Path,
    effective_user: Option<EffectiveUser>,
) -> Result<(), Error> {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    std::fs::create_dir_all(data_dir).map_err(|source| Error::SpawnFailed {
        name: "onion-router",
        source,
    })?;
    std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700)).map_err(
        |source| Error::SpawnFailed {
            name: "onion-router",
            source,
        },
    )?;

    let Some(user) = effective_user else {
        return Ok(());
    };

    let meta = std::fs::metadata(data_dir).map_err(|source| Error::SpawnFailed {
        name: "onion-router",
        source,
    })?;
    if meta.uid() == user.uid {
        return Ok(());
    }

    nix::unistd::chown(data_dir, Some(nix::unistd::Uid::from_raw(user.uid)), None)
        .map_err(|_| Error::DataDirOwnership(data_dir.to_path_buf()))
}

/// Extract the terminating signal number from an `ExitStatus`, on Unix.
#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

/// Attempt a bare TCP connect to `127.0.0.1:port`, bounded by `timeout_dur`.
async fn probe_connect(port: u16, timeout_dur: Duration) -> std::io::Result<()> {
    timeout(timeout_dur, TcpStream::connect(("127.0.0.1", port)))
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
    Ok(())
}

/// Authenticate against the control port using the plaintext password and
/// confirm a `250 OK` response.
async fn probe_control_port(
    port: u16,
    password: &str,
    timeout_dur: Duration,
) -> std::io::Result<()> {
    timeout(timeout_dur, async move {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        let cmd = format!("AUTHENTICATE \"{password}\"\r\n");
        stream.write_all(cmd.as_bytes()).await?;

        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await?;
        if String::from_utf8_lossy(&buf[..n]).starts_with("250") {
            Ok(())
        } else {
            Err(std::io::Error::from(std::io::ErrorKind::InvalidData))
        }
    })
    .await
    .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))?
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio_crate::test]
    async fn probe_connect_fails_closed_port() {
        let err = probe_connect(1, Duration::from_millis(200)).await;
        assert!(err.is_err());
    }

    #[test]
    fn ensure_data_dir_ownership_creates_dir_with_no_user() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("instance-0");
        ensure_data_dir_ownership(&data_dir, None).unwrap();
        assert!(data_dir.is_dir());
    }

    #[test]
    fn ensure_data_dir_ownership_accepts_matching_owner() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("instance-0");
        std::fs::create_dir_all(&data_dir).unwrap();
        let current_uid = std::fs::metadata(&data_dir).unwrap().uid();

        ensure_data_dir_ownership(
            &data_dir,
            Some(EffectiveUser {
                uid: current_uid,
                gid: std::fs::metadata(&data_dir).unwrap().gid(),
            }),
        )
        .unwrap();
    }
}
