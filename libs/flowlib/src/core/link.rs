// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Links - the per-atom wiring and pacing wrapper.
//!
//! A link owns its atom's primary (inbound) exchange, the side connections
//! carrying fan-in/fan-out, the realtime pacing state, and the credit-flow
//! bookkeeping for its source ports. It does not own the atom: the engine
//! arena does, and the link holds only the id.

use super::ids::{AtomId, ExchangeId, LinkId};
use super::realtime::RealtimeSourceConfig;
use super::router::RouterPortHandle;

/// Which role this link plays on a side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideRole {
    /// Local source channel feeding the other link.
    Source,
    /// Local sink channel fed by the other link.
    Sink,
}

/// One side-channel connection record. Both ends of a side exchange keep a
/// symmetric record, keyed by (local channel, other channel, other link).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideConnection {
    pub local_channel: usize,
    pub other_channel: usize,
    pub other_link: LinkId,
    pub exchange: ExchangeId,
    pub role: SideRole,
}

/// Wiring, pacing and credit bookkeeping for one atom.
pub struct Link {
    id: LinkId,
    atom: AtomId,
    /// Inbound exchange (this link as sink provider).
    primary: Option<ExchangeId>,
    /// Exchanges where this link is the source provider, in wiring order.
    outgoing: Vec<ExchangeId>,
    sides: Vec<SideConnection>,
    cfg: RealtimeSourceConfig,
    /// Router handle per source channel, present once the port is
    /// registered for credit flow control.
    router_ports: Vec<Option<RouterPortHandle>>,
    /// Router handle per sink channel (registration only, no credits).
    router_sink_ports: Vec<Option<RouterPortHandle>>,
    /// Whether this link may be wired as a side sink at all.
    allow_side_sink: bool,
    /// A consumer refused a packet this tick; weak sweeps skip the atom.
    stuck: bool,
    /// Engine tick at which the pacing config was last advanced.
    last_cfg_tick: u64,
}

impl Link {
    pub fn new(id: LinkId, atom: AtomId, sync_dt: f64, source_channels: usize) -> Self {
        Self {
            id,
            atom,
            primary: None,
            outgoing: Vec::new(),
            sides: Vec::new(),
            cfg: RealtimeSourceConfig::new(sync_dt),
            router_ports: vec![None; source_channels],
            router_sink_ports: Vec::new(),
            allow_side_sink: true,
            stuck: false,
            last_cfg_tick: 0,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn atom(&self) -> AtomId {
        self.atom
    }

    pub fn primary(&self) -> Option<ExchangeId> {
        self.primary
    }

    pub fn set_primary(&mut self, exchange: Option<ExchangeId>) {
        self.primary = exchange;
    }

    /// Exchanges this link feeds, in wiring order.
    pub fn outgoing(&self) -> &[ExchangeId] {
        &self.outgoing
    }

    pub fn add_outgoing(&mut self, exchange: ExchangeId) {
        self.outgoing.push(exchange);
    }

    pub fn remove_outgoing(&mut self, exchange: ExchangeId) {
        self.outgoing.retain(|e| *e != exchange);
    }

    pub fn sides(&self) -> &[SideConnection] {
        &self.sides
    }

    /// Whether a side connection with this exact key already exists.
    pub fn has_side(&self, local_channel: usize, other_channel: usize, other_link: LinkId) -> bool {
        self.sides.iter().any(|s| {
            s.local_channel == local_channel
                && s.other_channel == other_channel
                && s.other_link == other_link
        })
    }

    pub fn add_side(&mut self, conn: SideConnection) {
        self.sides.push(conn);
    }

    pub fn remove_sides_with(&mut self, other_link: LinkId) {
        self.sides.retain(|s| s.other_link != other_link);
    }

    pub fn cfg(&self) -> &RealtimeSourceConfig {
        &self.cfg
    }

    pub fn cfg_mut(&mut self) -> &mut RealtimeSourceConfig {
        &mut self.cfg
    }

    pub fn allow_side_sink(&self) -> bool {
        self.allow_side_sink
    }

    /// Opt this link out of (or back into) being a side-sink target.
    pub fn set_allow_side_sink(&mut self, allow: bool) {
        self.allow_side_sink = allow;
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck
    }

    pub fn set_stuck(&mut self, b: bool) {
        self.stuck = b;
    }

    pub(crate) fn last_cfg_tick(&self) -> u64 {
        self.last_cfg_tick
    }

    pub(crate) fn set_last_cfg_tick(&mut self, tick: u64) {
        self.last_cfg_tick = tick;
    }

    /// Router registration for a source channel.
    pub fn router_port(&self, src_ch: usize) -> Option<RouterPortHandle> {
        self.router_ports.get(src_ch).copied().flatten()
    }

    pub fn set_router_port(&mut self, src_ch: usize, handle: RouterPortHandle) {
        if src_ch >= self.router_ports.len() {
            self.router_ports.resize(src_ch + 1, None);
        }
        self.router_ports[src_ch] = Some(handle);
    }

    /// All source-port router handles, indexed by channel.
    pub fn router_ports(&self) -> &[Option<RouterPortHandle>] {
        &self.router_ports
    }

    /// Router registration for a sink channel.
    pub fn router_sink_port(&self, sink_ch: usize) -> Option<RouterPortHandle> {
        self.router_sink_ports.get(sink_ch).copied().flatten()
    }

    pub fn set_router_sink_port(&mut self, sink_ch: usize, handle: RouterPortHandle) {
        if sink_ch >= self.router_sink_ports.len() {
            self.router_sink_ports.resize(sink_ch + 1, None);
        }
        self.router_sink_ports[sink_ch] = Some(handle);
    }
}
