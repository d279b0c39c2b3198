//! Port allocation for the instance pool, load balancer, and HTTP filter.
//!
//! Ports are reserved by probing a non-blocking bind on loopback rather than
//! by picking numbers out of thin air, so that a port already in use by some
//! unrelated process on the host is detected before anything is spawned
//! against it.

use std::net::{SocketAddr, TcpListener};

use crate::error::Error;

/// How many successive candidates to probe, per base port, before giving up.
const SCAN_BOUND: u16 = 256;

/// One instance's allocated `(socks_port, control_port)` pair.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct InstancePorts {
    /// The instance's SOCKS listen port.
    pub socks_port: u16,
    /// The instance's control port.
    pub control_port: u16,
}

/// The full set of ports reserved for one supervisor run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PortMap {
    /// Per-instance SOCKS/control port pairs, in instance index order.
    pub instances: Vec<InstancePorts>,
    /// The load balancer's front-end port.
    pub lb_front_port: u16,
    /// The HTTP filter's listen port, if the filter is enabled.
    pub filter_listen_port: Option<u16>,
    /// The DNS redirection target port, if DNS redirection is enabled.
    pub dns_port: Option<u16>,
}

impl PortMap {
    /// Every port in this map, for disjointness checking.
    fn all_ports(&self) -> Vec<u16> {
        let mut v = Vec::with_capacity(self.instances.len() * 2 + 3);
        for p in &self.instances {
            v.push(p.socks_port);
            v.push(p.control_port);
        }
        v.push(self.lb_front_port);
        if let Some(p) = self.filter_listen_port {
            v.push(p);
        }
        if let Some(p) = self.dns_port {
            v.push(p);
        }
        v
    }

    /// Whether every port in this map is pairwise distinct.
    pub fn is_disjoint(&self) -> bool {
        let mut ports = self.all_ports();
        let len = ports.len();
        ports.sort_unstable();
        ports.dedup();
        ports.len() == len
    }
}

/// Whether the caller pinned a port explicitly (never silently rebound) or
/// merely suggested a starting point for a scan.
#[derive(Debug, Clone, Copy)]
pub enum PortRequest {
    /// Use this exact port; a conflict is fatal.
    Explicit(u16),
    /// Start scanning from this port; advance on conflict.
    Scan(u16),
}

/// Allocate a `PortMap` satisfying the disjointness invariant.
///
/// `lb_front_port`, `filter_listen_port` (when the filter is enabled), and
/// `dns_port` (when DNS redirection is enabled) are always explicit, per
/// the external configuration contract; SOCKS and control base ports are
/// scanned.
pub fn allocate(
    instances: u16,
    socks_base: PortRequest,
    control_base: PortRequest,
    lb_front_port: PortRequest,
    filter_listen_port: Option<PortRequest>,
    dns_port: Option<PortRequest>,
) -> Result<PortMap, Error> {
    let mut reserved: Vec<TcpListener> = Vec::new();

    let lb_front_port = reserve(lb_front_port, &mut reserved)?;
    let filter_listen_port = filter_listen_port
        .map(|r| reserve(r, &mut reserved))
        .transpose()?;
    let dns_port = dns_port.map(|r| reserve(r, &mut reserved)).transpose()?;

    let mut instance_ports = Vec::with_capacity(instances as usize);
    let (mut socks_next, socks_explicit) = match socks_base {
        PortRequest::Explicit(p) => (p, true),
        PortRequest::Scan(p) => (p, false),
    };
    let (mut control_next, control_explicit) = match control_base {
        PortRequest::Explicit(p) => (p, true),
        PortRequest::Scan(p) => (p, false),
    };

    for _ in 0..instances {
        let socks_port = reserve(
            if socks_explicit {
                PortRequest::Explicit(socks_next)
            } else {
                PortRequest::Scan(socks_next)
            },
            &mut reserved,
        )?;
        socks_next = socks_port.wrapping_add(1);

        let control_port = reserve(
            if control_explicit {
                PortRequest::Explicit(control_next)
            } else {
                PortRequest::Scan(control_next)
            },
            &mut reserved,
        )?;
        control_next = control_port.wrapping_add(1);

        instance_ports.push(InstancePorts {
            socks_port,
            control_port,
        });
    }

    // Drop the reservations: later spawns bind their own listeners, so we
    // only ever used these as a best-effort conflict probe.
    drop(reserved);

    let map = PortMap {
        instances: instance_ports,
        lb_front_port,
        filter_listen_port,
        dns_port,
    };

    if !map.is_disjoint() {
        return Err(Error::PortUnavailable {
            base: map.lb_front_port,
            scanned: SCAN_BOUND,
        });
    }

    Ok(map)
}

/// Probe-bind a single port per `request`, keeping the listener alive in
/// `held` until allocation finishes so that later probes in the same batch
/// cannot collide with an earlier one in this same call.
fn reserve(request: PortRequest, held: &mut Vec<TcpListener>) -> Result<u16, Error> {
    match request {
        PortRequest::Explicit(port) => {
            let listener = bind(port).ok_or(Error::ExplicitPortTaken { port })?;
            held.push(listener);
            Ok(port)
        }
        PortRequest::Scan(base) => {
            for offset in 0..SCAN_BOUND {
                let candidate = base.wrapping_add(offset);
                if candidate == 0 {
                    continue;
                }
                if let Some(listener) = bind(candidate) {
                    held.push(listener);
                    return Ok(candidate);
                }
            }
            Err(Error::PortUnavailable {
                base,
                scanned: SCAN_BOUND,
            })
        }
    }
}

/// Attempt a non-blocking bind on loopback at `port`.
fn bind(port: u16) -> Option<TcpListener> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    TcpListener::bind(addr).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocates_disjoint_ports() {
        let map = allocate(
            3,
            PortRequest::Scan(19000),
            PortRequest::Scan(19900),
            PortRequest::Explicit(0xfeed % 10000 + 20000),
            None,
            None,
        )
        .unwrap();
        assert!(map.is_disjoint());
        assert_eq!(map.instances.len(), 3);
    }

    #[test]
    fn explicit_conflict_is_fatal() {
        let held = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = held.local_addr().unwrap().port();

        let err = allocate(
            1,
            PortRequest::Scan(19100),
            PortRequest::Scan(19950),
            PortRequest::Explicit(port),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ExplicitPortTaken { port: p } if p == port));
    }

    #[test]
    fn filter_port_included_when_enabled() {
        let map = allocate(
            1,
            PortRequest::Scan(19200),
            PortRequest::Scan(19960),
            PortRequest::Explicit(0xbeef % 10000 + 20000),
            Some(PortRequest::Explicit(0xcafe % 10000 + 30000)),
            None,
        )
        .unwrap();
        assert!(map.filter_listen_port.is_some());
        assert!(map.is_disjoint());
    }

    #[test]
    fn dns_port_included_when_enabled() {
        let map = allocate(
            1,
            PortRequest::Scan(19210),
            PortRequest::Scan(19970),
            PortRequest::Explicit(0xface % 10000 + 40000),
            None,
            Some(PortRequest::Explicit(0xdad % 10000 + 50000)),
        )
        .unwrap();
        assert!(map.dns_port.is_some());
        assert!(map.is_disjoint());
    }
}
