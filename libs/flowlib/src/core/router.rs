// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Packet router - port registry and credit-flow accounting.
//!
//! The engine registers every port here and delegates credit requests and
//! acknowledgments; it never does credit accounting itself. How many
//! credits a request is worth is a policy decision behind the
//! [`CreditPolicy`] trait; the default grants `min(requested, available)`
//! against a fixed initial pool, which is the observable behavior the rest
//! of the engine is written against.

use ahash::AHashMap;
use tracing::{debug, warn};

use super::error::{FlowError, Result};
use super::format::ValueKind;
use super::ids::AtomId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Source,
    Sink,
}

/// Registration-time description of a port, handed to the credit policy.
#[derive(Debug, Clone)]
pub struct RouterPortDesc {
    pub atom: AtomId,
    pub port_index: usize,
    pub direction: PortDirection,
    pub kinds: Vec<ValueKind>,
    /// Free-form metadata (human-readable name and the like).
    pub metadata: serde_json::Value,
}

/// Validated handle to a registered port. The handle echoes the atom and
/// port index so a recycled table slot cannot be confused for the original
/// registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterPortHandle {
    atom: AtomId,
    port_index: usize,
    direction: PortDirection,
    router_index: usize,
}

impl RouterPortHandle {
    #[cfg(test)]
    pub(crate) fn for_tests(router_index: usize) -> Self {
        Self {
            atom: AtomId::new(0),
            port_index: 0,
            direction: PortDirection::Source,
            router_index,
        }
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }
}

/// Pluggable credit-granting policy.
pub trait CreditPolicy: Send {
    /// Credits a freshly registered source port starts with.
    fn initial_credits(&self, port: &RouterPortDesc) -> u32;

    /// How many of `requested` credits to grant given `available`.
    fn grant(&mut self, available: u32, requested: u32) -> u32;
}

/// Grants `min(requested, available)` against a fixed initial pool.
#[derive(Debug, Clone)]
pub struct DefaultCreditPolicy {
    pub initial: u32,
}

impl DefaultCreditPolicy {
    pub fn new(initial: u32) -> Self {
        Self { initial }
    }
}

impl CreditPolicy for DefaultCreditPolicy {
    fn initial_credits(&self, port: &RouterPortDesc) -> u32 {
        match port.direction {
            PortDirection::Source => self.initial,
            PortDirection::Sink => 0,
        }
    }

    fn grant(&mut self, available: u32, requested: u32) -> u32 {
        requested.min(available)
    }
}

struct Port {
    desc: RouterPortDesc,
    credits_available: u32,
    credits_requested: u64,
    credits_acked: u64,
    outgoing: Vec<usize>,
    incoming: Vec<usize>,
}

struct Connection {
    src_port: usize,
    dst_port: usize,
    active: bool,
    packets_routed: u64,
}

/// Port registry plus credit accounting.
pub struct PacketRouter {
    ports: Vec<Port>,
    connections: Vec<Connection>,
    atom_index: AHashMap<AtomId, Vec<usize>>,
    policy: Box<dyn CreditPolicy>,
}

impl PacketRouter {
    pub fn new(policy: Box<dyn CreditPolicy>) -> Self {
        Self {
            ports: Vec::new(),
            connections: Vec::new(),
            atom_index: AHashMap::new(),
            policy,
        }
    }

    pub fn register_source_port(
        &mut self,
        atom: AtomId,
        port_index: usize,
        kinds: Vec<ValueKind>,
        metadata: serde_json::Value,
    ) -> RouterPortHandle {
        self.register_port(atom, PortDirection::Source, port_index, kinds, metadata)
    }

    pub fn register_sink_port(
        &mut self,
        atom: AtomId,
        port_index: usize,
        kinds: Vec<ValueKind>,
        metadata: serde_json::Value,
    ) -> RouterPortHandle {
        self.register_port(atom, PortDirection::Sink, port_index, kinds, metadata)
    }

    fn register_port(
        &mut self,
        atom: AtomId,
        direction: PortDirection,
        port_index: usize,
        kinds: Vec<ValueKind>,
        metadata: serde_json::Value,
    ) -> RouterPortHandle {
        let desc = RouterPortDesc {
            atom,
            port_index,
            direction,
            kinds,
            metadata,
        };
        let credits = self.policy.initial_credits(&desc);
        let router_index = self.ports.len();
        self.ports.push(Port {
            desc,
            credits_available: credits,
            credits_requested: 0,
            credits_acked: 0,
            outgoing: Vec::new(),
            incoming: Vec::new(),
        });
        self.atom_index.entry(atom).or_default().push(router_index);
        debug!(
            %atom,
            port_index,
            ?direction,
            credits,
            router_index,
            "registered router port"
        );
        RouterPortHandle {
            atom,
            port_index,
            direction,
            router_index,
        }
    }

    /// Record a connection between a registered source and sink port.
    pub fn connect(&mut self, src: RouterPortHandle, dst: RouterPortHandle) -> Result<()> {
        if src.direction != PortDirection::Source {
            return Err(FlowError::Router(
                "connection source must be a source port".into(),
            ));
        }
        if dst.direction != PortDirection::Sink {
            return Err(FlowError::Router(
                "connection destination must be a sink port".into(),
            ));
        }
        if self.find_port(src).is_none() || self.find_port(dst).is_none() {
            return Err(FlowError::Router("connection endpoint not registered".into()));
        }
        let conn_idx = self.connections.len();
        self.connections.push(Connection {
            src_port: src.router_index,
            dst_port: dst.router_index,
            active: true,
            packets_routed: 0,
        });
        self.ports[src.router_index].outgoing.push(conn_idx);
        self.ports[dst.router_index].incoming.push(conn_idx);
        debug!(src = src.router_index, dst = dst.router_index, "router connect");
        Ok(())
    }

    /// Deactivate the connection between two ports, if one exists.
    pub fn disconnect(&mut self, src: RouterPortHandle, dst: RouterPortHandle) -> bool {
        for conn in &mut self.connections {
            if conn.src_port == src.router_index && conn.dst_port == dst.router_index && conn.active
            {
                conn.active = false;
                return true;
            }
        }
        warn!(
            src = src.router_index,
            dst = dst.router_index,
            "disconnect: no active connection found"
        );
        false
    }

    /// Request permission to produce `requested` more packets.
    ///
    /// An invalid or stale handle grants zero: no work proceeds without
    /// explicit, router-granted permission.
    pub fn request_credits(&mut self, handle: RouterPortHandle, requested: u32) -> u32 {
        let Some(index) = self.port_index(handle) else {
            debug!(?handle, "request_credits on unregistered port");
            return 0;
        };
        let available = self.ports[index].credits_available;
        let granted = self.policy.grant(available, requested);
        let port = &mut self.ports[index];
        port.credits_requested += u64::from(requested);
        port.credits_available -= granted;
        granted
    }

    /// Return consumed-packet credits to a port's pool.
    pub fn ack_credits(&mut self, handle: RouterPortHandle, count: u32) {
        let Some(index) = self.port_index(handle) else {
            debug!(?handle, "ack_credits on unregistered port");
            return;
        };
        let port = &mut self.ports[index];
        port.credits_acked += u64::from(count);
        port.credits_available += count;
    }

    pub fn available_credits(&self, handle: RouterPortHandle) -> u32 {
        self.port_index(handle)
            .map_or(0, |i| self.ports[i].credits_available)
    }

    /// Bump the routed-packet counters on a source port's active connections.
    pub fn note_packet_routed(&mut self, handle: RouterPortHandle) {
        let Some(index) = self.port_index(handle) else {
            return;
        };
        let outgoing = self.ports[index].outgoing.clone();
        for conn_idx in outgoing {
            if let Some(conn) = self.connections.get_mut(conn_idx) {
                if conn.active {
                    conn.packets_routed += 1;
                }
            }
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().filter(|c| c.active).count()
    }

    /// One-line-per-port topology description for diagnostics.
    pub fn topology_summary(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "router: {} atoms, {} ports, {} connections",
            self.atom_index.len(),
            self.ports.len(),
            self.connections.len()
        );
        for (i, port) in self.ports.iter().enumerate() {
            let dir = match port.desc.direction {
                PortDirection::Source => "src",
                PortDirection::Sink => "snk",
            };
            let _ = writeln!(
                out,
                "  [{}] {} {} port={} credits={} out={} in={}",
                i,
                dir,
                port.desc.atom,
                port.desc.port_index,
                port.credits_available,
                port.outgoing.len(),
                port.incoming.len()
            );
        }
        for (i, conn) in self.connections.iter().enumerate() {
            if !conn.active {
                continue;
            }
            let _ = writeln!(
                out,
                "  conn[{}] port {} -> port {} (routed: {})",
                i, conn.src_port, conn.dst_port, conn.packets_routed
            );
        }
        out
    }

    /// Per-port credit counters for diagnostics.
    pub fn port_status_summary(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (i, port) in self.ports.iter().enumerate() {
            let _ = writeln!(
                out,
                "  port {}: credits={} requested={} acked={}",
                i, port.credits_available, port.credits_requested, port.credits_acked
            );
        }
        out
    }

    fn port_index(&self, handle: RouterPortHandle) -> Option<usize> {
        self.find_port(handle).map(|_| handle.router_index)
    }

    /// Echo-validated lookup: the slot must still describe the same atom,
    /// port index and direction the handle was minted for.
    fn find_port(&self, handle: RouterPortHandle) -> Option<&Port> {
        let port = self.ports.get(handle.router_index)?;
        if port.desc.atom != handle.atom
            || port.desc.port_index != handle.port_index
            || port.desc.direction != handle.direction
        {
            return None;
        }
        Some(port)
    }
}
