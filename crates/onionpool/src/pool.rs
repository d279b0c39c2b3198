//! The Pool Manager: owns every [`InstanceSupervisor`], starts them
//! concurrently, stops them in strict reverse order, and aggregates their
//! health.

use std::path::PathBuf;
use std::time::Duration;

use futures::future::join_all;
use safelog::Sensitive;
use tracing::{error, info};

use crate::error::Error;
use crate::instance::{InstanceHealth, InstanceRole, InstanceSpec, InstanceSupervisor};
use crate::ports::PortMap;
use crate::process::EffectiveUser;

/// Index of the instance designated to serve DNS redirection, when
/// [`PortMap::dns_port`] is set. Fixed at `0`: a pool has at most one DNS
/// redirection target, and picking the first instance keeps the assignment
/// simple and deterministic.
pub const DNS_INSTANCE_INDEX: u16 = 0;

/// Aggregate health across every instance in the pool.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PoolHealth {
    /// Every instance is `Ready`.
    Healthy,
    /// At least one instance is `Degraded`, none are `Failed`.
    Degraded,
    /// At least one instance is `Failed`.
    Failed,
}

/// Owns the set of onion-router instances for one supervisor run.
pub struct PoolManager {
    supervisors: Vec<InstanceSupervisor>,
}

impl PoolManager {
    /// Build the per-instance specs for a pool of `port_map.instances.len()`
    /// instances rooted at `run_dir`.
    pub fn build_specs(port_map: &PortMap, run_dir: &std::path::Path) -> Vec<InstanceSpec> {
        port_map
            .instances
            .iter()
            .enumerate()
            .map(|(i, ports)| {
                let index = i as u16;
                let data_dir = run_dir.join(format!("instance-{index}"));
                let role = if port_map.dns_port.is_some() && index == DNS_INSTANCE_INDEX {
                    InstanceRole::Dns
                } else {
                    InstanceRole::Socks
                };
                InstanceSpec {
                    index,
                    socks_port: ports.socks_port,
                    control_port: ports.control_port,
                    data_dir: data_dir.clone(),
                    config_path: run_dir.join(format!("torrc-{index}")),
                    log_path: run_dir.join(format!("instance-{index}.log")),
                    role,
                }
            })
            .collect()
    }

    /// Start all instances concurrently. If any one fails, every instance
    /// that did start is stopped, in reverse index order, before the
    /// original error is returned.
    pub async fn start(
        specs: Vec<InstanceSpec>,
        onion_router_path: PathBuf,
        password: Sensitive<String>,
        bootstrap_timeout: Duration,
        grace: Duration,
        effective_user: Option<EffectiveUser>,
    ) -> Result<Self, Error> {
        let starts = specs.into_iter().map(|spec| {
            let onion_router_path = onion_router_path.clone();
            let password = password.clone();
            async move {
                InstanceSupervisor::start(
                    spec,
                    &onion_router_path,
                    password,
                    bootstrap_timeout,
                    effective_user,
                )
                .await
            }
        });

        let results = join_all(starts).await;

        let mut supervisors = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(supervisor) => supervisors.push(supervisor),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(err) = first_error {
            error!("pool start failed, rolling back started instances");
            let mut pool = PoolManager { supervisors };
            // Best-effort: the caller's own rollback also runs, but the
            // partially-started pool would otherwise leak processes if the
            // caller never reaches the coordinator's rollback stage.
            let _ = pool.stop_all(grace).await;
            return Err(err);
        }

        info!(instances = supervisors.len(), "pool reached InstancesUp");
        Ok(PoolManager { supervisors })
    }

    /// Run one health probe per instance and compute the aggregate.
    pub async fn probe_health(&mut self) -> PoolHealth {
        let mut any_degraded = false;
        let mut any_failed = false;

        for supervisor in &mut self.supervisors {
            match supervisor.probe_health().await {
                Ok(InstanceHealth::Healthy) => {}
                Ok(InstanceHealth::Degraded) => any_degraded = true,
                Ok(InstanceHealth::Down) => any_failed = true,
                Err(_) => any_failed = true,
            }
        }

        if any_failed {
            PoolHealth::Failed
        } else if any_degraded {
            PoolHealth::Degraded
        } else {
            PoolHealth::Healthy
        }
    }

    /// Stop every instance in strict reverse index order, collecting every
    /// failure instead of stopping at the first one.
    pub async fn stop_all(&mut self, grace: Duration) -> Result<(), retry_error::RetryError<Error>> {
        let mut errors = retry_error::RetryError::in_attempt_to("stop instance pool");

        for supervisor in self.supervisors.iter_mut().rev() {
            let index = supervisor.index();
            if let Err(e) = supervisor.stop(grace).await {
                error!(instance = index, error = %e, "instance stop failed");
                errors.push(e);
            } else {
                info!(instance = index, "instance.stop ok");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Number of instances in the pool.
    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    /// Whether the pool has no instances.
    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ports::InstancePorts;

    #[test]
    fn build_specs_assigns_contiguous_indices() {
        let map = PortMap {
            instances: vec![
                InstancePorts {
                    socks_port: 9000,
                    control_port: 9900,
                },
                InstancePorts {
                    socks_port: 9001,
                    control_port: 9901,
                },
            ],
            lb_front_port: 16379,
            filter_listen_port: None,
            dns_port: None,
        };
        let specs = PoolManager::build_specs(&map, std::path::Path::new("/tmp/run"));
        assert_eq!(specs[0].index, 0);
        assert_eq!(specs[1].index, 1);
        assert_eq!(specs[1].socks_port, 9001);
        assert_eq!(specs[0].role, InstanceRole::Socks);
    }

    #[test]
    fn build_specs_designates_dns_instance_when_dns_port_set() {
        let map = PortMap {
            instances: vec![
                InstancePorts {
                    socks_port: 9000,
                    control_port: 9900,
                },
                InstancePorts {
                    socks_port: 9001,
                    control_port: 9901,
                },
            ],
            lb_front_port: 16379,
            filter_listen_port: None,
            dns_port: Some(5300),
        };
        let specs = PoolManager::build_specs(&map, std::path::Path::new("/tmp/run"));
        assert_eq!(specs[0].role, InstanceRole::Dns);
        assert_eq!(specs[1].role, InstanceRole::Socks);
    }
}
