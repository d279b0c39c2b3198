//! The Proxy Front-End: the TCP load balancer fronting the instance pool's
//! SOCKS backends, plus an optional chained HTTP filter.
//!
//! Ordering is mandatory: load balancer before filter on start, filter
//! before load balancer on stop. The filter is optional; its absence is not
//! an error.

use std::path::PathBuf;
use std::time::Duration;

use tokio_crate::net::TcpStream;
use tokio_crate::process::{Child, Command};
use tokio_crate::time::timeout;
use tracing::info;

use crate::error::Error;
use crate::process::{spawn_in_new_group, terminate_group};

/// A single front-end subprocess (the load balancer, or the HTTP filter).
struct FrontEndProcess {
    name: &'static str,
    child: Child,
    port: u16,
}

/// Owns the load-balancer process and, optionally, the HTTP-filter process.
pub struct ProxyFrontEnd {
    load_balancer: FrontEndProcess,
    filter: Option<FrontEndProcess>,
}

impl ProxyFrontEnd {
    /// Start the load balancer against `lb_config_path`, verify it is
    /// listening on `lb_front_port`, then — if `filter_config_path` is
    /// given — start the HTTP filter and verify it is listening on
    /// `filter_listen_port`.
    pub async fn start(
        load_balancer_path: &std::path::Path,
        lb_config_path: &std::path::Path,
        lb_front_port: u16,
        lb_log_path: &std::path::Path,
        filter: Option<FilterStartArgs<'_>>,
    ) -> Result<Self, Error> {
        let mut cmd = Command::new(load_balancer_path);
        cmd.arg("-f").arg(lb_config_path);
        let child = spawn_in_new_group(cmd, lb_log_path, None).map_err(|source| Error::SpawnFailed {
            name: "load-balancer",
            source,
        })?;

        let mut load_balancer = FrontEndProcess {
            name: "load-balancer",
            child,
            port: lb_front_port,
        };
        probe_or_fail(&mut load_balancer).await?;
        info!("load balancer reached Up on port {lb_front_port}");

        let filter = match filter {
            Some(args) => {
                let mut cmd = Command::new(args.filter_path);
                cmd.arg("--no-daemon").arg(args.config_path);
                let child = spawn_in_new_group(cmd, args.log_path, None).map_err(|source| {
                    Error::SpawnFailed {
                        name: "filter",
                        source,
                    }
                })?;

                let mut process = FrontEndProcess {
                    name: "filter",
                    child,
                    port: args.listen_port,
                };
                probe_or_fail(&mut process).await?;
                info!("filter reached Up on port {}", args.listen_port);
                Some(process)
            }
            None => None,
        };

        Ok(ProxyFrontEnd {
            load_balancer,
            filter,
        })
    }

    /// Stop the filter first (if present), then the load balancer.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), retry_error::RetryError<Error>> {
        let mut errors = retry_error::RetryError::in_attempt_to("stop proxy front-end");

        if let Some(filter) = self.filter.as_mut() {
            match terminate_group(&mut filter.child, grace).await {
                Ok(_) => info!("filter.stop ok"),
                Err(e) => errors.push(Error::SpawnFailed {
                    name: "filter",
                    source: e,
                }),
            }
        }

        match terminate_group(&mut self.load_balancer.child, grace).await {
            Ok(_) => info!("lb.stop ok"),
            Err(e) => errors.push(Error::SpawnFailed {
                name: "load-balancer",
                source: e,
            }),
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Arguments for starting the optional HTTP filter.
pub struct FilterStartArgs<'a> {
    /// Path to the filter binary.
    pub filter_path: &'a std::path::Path,
    /// Path to its rendered config.
    pub config_path: PathBuf,
    /// The port it should end up listening on.
    pub listen_port: u16,
    /// Where to redirect its stdout/stderr.
    pub log_path: &'a std::path::Path,
}

/// Connect-probe `process`'s port, bounded, retrying briefly while the
/// subprocess finishes binding its listener; fail with
/// [`Error::FrontEndProbeFailed`] if it never answers or if it exits first.
async fn probe_or_fail(process: &mut FrontEndProcess) -> Result<(), Error> {
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(Some(status)) = process.child.try_wait() {
            return Err(Error::SpawnFailed {
                name: process.name,
                source: std::io::Error::other(format!("exited early with {status:?}")),
            });
        }

        if timeout(
            Duration::from_secs(2),
            TcpStream::connect(("127.0.0.1", process.port)),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
        {
            return Ok(());
        }

        if std::time::Instant::now() >= deadline {
            return Err(Error::FrontEndProbeFailed {
                name: process.name,
                port: process.port,
            });
        }

        tokio_crate::time::sleep(Duration::from_millis(200)).await;
    }
}
