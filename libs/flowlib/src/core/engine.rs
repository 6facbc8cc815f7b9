// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Engine context - exclusive owner of the dataflow graph and the tick.
//!
//! There is no global scheduler state: an [`EngineContext`] value owns the
//! atom/link/exchange arenas, the link system, the packet router and the
//! world state, and every entry point takes it explicitly. It is created at
//! process start and torn down by [`EngineContext::stop`].
//!
//! The driver loop contract is `start()` once, `update(dt)` every tick,
//! `stop()` once. The whole tick runs on the calling thread; nothing in the
//! forwarding path blocks. Queue-full and stuck-packet conditions are
//! handled by skipping within the tick, never by waiting.

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, trace, warn};

use super::atom::{AtomBehavior, AtomCore, AtomNode};
use super::config::EngineConfig;
use super::container::SharedContainer;
use super::error::{FlowError, LookupError, Result};
use super::exchange::{ExchangeKind, ExchangePoint, PortRef};
use super::format::ValueFormat;
use super::fwd_scope::{ForwarderId, FwdScope};
use super::ids::{AtomId, ExchangeId, LinkId};
use super::interface::InterfaceDescriptor;
use super::link::{Link, SideConnection, SideRole};
use super::link_system::{LinkSystem, SchedulingClass};
use super::observability::{EngineSnapshot, LinkSnapshot};
use super::packet::{NoopTracker, Packet, PacketTracker};
use super::router::{DefaultCreditPolicy, PacketRouter, RouterPortHandle};
use super::world::WorldState;

pub struct EngineContext {
    config: EngineConfig,
    world: WorldState,
    tracker: Arc<dyn PacketTracker>,
    router: PacketRouter,
    link_system: LinkSystem,
    atoms: Vec<Option<AtomNode>>,
    links: Vec<Option<Link>>,
    exchanges: Vec<Option<ExchangePoint>>,
    /// Atom creation order; teardown walks it in reverse.
    creation_order: Vec<AtomId>,
    running: bool,
    tick: u64,
    tick_dt: f64,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        let router = PacketRouter::new(Box::new(DefaultCreditPolicy::new(config.initial_credits)));
        let link_system = LinkSystem::new(config.once_queue_capacity);
        Self {
            config,
            world: WorldState::new(),
            tracker: Arc::new(NoopTracker),
            router,
            link_system,
            atoms: Vec::new(),
            links: Vec::new(),
            exchanges: Vec::new(),
            creation_order: Vec::new(),
            running: false,
            tick: 0,
            tick_dt: 0.0,
        }
    }

    /// Install a packet tracker. Call before any packets are produced.
    pub fn with_tracker(mut self, tracker: Arc<dyn PacketTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    /// Replace the router's credit policy. Call before any atoms are added;
    /// existing registrations do not migrate.
    pub fn with_router(mut self, router: PacketRouter) -> Self {
        self.router = router;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    pub fn router(&self) -> &PacketRouter {
        &self.router
    }

    pub fn link_system(&self) -> &LinkSystem {
        &self.link_system
    }

    pub fn link_system_mut(&mut self) -> &mut LinkSystem {
        &mut self.link_system
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    // ---- arena lookups ------------------------------------------------

    pub fn atom_core(&self, id: AtomId) -> Result<&AtomCore> {
        self.node_ref(id).map(|n| &n.core)
    }

    pub fn link(&self, id: LinkId) -> Result<&Link> {
        self.link_ref(id)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Result<&mut Link> {
        self.links
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(FlowError::Lookup(LookupError::Link(id)))
    }

    pub fn exchange_point(&self, id: ExchangeId) -> Result<&ExchangePoint> {
        self.exchanges
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FlowError::Lookup(LookupError::Exchange(id)))
    }

    /// The wiring link of an atom.
    pub fn atom_link(&self, atom: AtomId) -> Result<LinkId> {
        self.node_ref(atom)?
            .core
            .link()
            .ok_or(FlowError::Lookup(LookupError::Atom(atom)))
    }

    fn node_ref(&self, id: AtomId) -> Result<&AtomNode> {
        self.atoms
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FlowError::Lookup(LookupError::Atom(id)))
    }

    fn node_mut(&mut self, id: AtomId) -> Result<&mut AtomNode> {
        self.atoms
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(FlowError::Lookup(LookupError::Atom(id)))
    }

    fn link_ref(&self, id: LinkId) -> Result<&Link> {
        self.links
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(FlowError::Lookup(LookupError::Link(id)))
    }

    /// Source container of a link's channel.
    pub fn source_container(&self, link: LinkId, channel: usize) -> Result<SharedContainer> {
        let atom = self.link_ref(link)?.atom();
        self.node_ref(atom)?
            .core
            .interface()
            .source(channel)
            .cloned()
            .ok_or(FlowError::Lookup(LookupError::Channel { link, channel }))
    }

    /// Sink container of a link's channel.
    pub fn sink_container(&self, link: LinkId, channel: usize) -> Result<SharedContainer> {
        let atom = self.link_ref(link)?.atom();
        self.node_ref(atom)?
            .core
            .interface()
            .sink(channel)
            .cloned()
            .ok_or(FlowError::Lookup(LookupError::Channel { link, channel }))
    }

    // ---- graph construction -------------------------------------------

    /// Create an atom together with its wiring link.
    ///
    /// Installs the interface, allocates containers with default formats,
    /// runs the behavior's `initialize`, and registers every channel with
    /// the packet router (source ports join credit flow control).
    pub fn add_atom(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        desc: InterfaceDescriptor,
        mut behavior: Box<dyn AtomBehavior>,
    ) -> Result<AtomId> {
        let atom_id = AtomId::new(self.atoms.len());
        let link_id = LinkId::new(self.links.len());

        let mut core = AtomCore::new(atom_id, name);
        core.interface_mut().set_interface(desc);
        if !core.interface_mut().initialize(&self.config.queue) {
            return Err(FlowError::Initialize(format!(
                "interface initialization failed for '{}'",
                core.name()
            )));
        }
        if !behavior.initialize(&self.world) {
            core.interface_mut().uninitialize();
            return Err(FlowError::Initialize(format!(
                "behavior initialization failed for '{}'",
                core.name()
            )));
        }
        core.set_initialized(true);
        core.set_link(Some(link_id));

        let mut link = Link::new(
            link_id,
            atom_id,
            self.config.sync_dt,
            core.interface().source_count(),
        );
        for ch in 0..core.interface().source_count() {
            let cdesc = core.interface().source_descriptor(ch).expect("declared");
            let handle = self.router.register_source_port(
                atom_id,
                ch,
                cdesc.accepted.clone(),
                json!({ "name": cdesc.name }),
            );
            link.set_router_port(ch, handle);
        }
        for ch in 0..core.interface().sink_count() {
            let cdesc = core.interface().sink_descriptor(ch).expect("declared");
            let handle = self.router.register_sink_port(
                atom_id,
                ch,
                cdesc.accepted.clone(),
                json!({ "name": cdesc.name }),
            );
            link.set_router_sink_port(ch, handle);
        }

        info!(atom = %atom_id, link = %link_id, name = core.name(), "atom added");
        self.atoms.push(Some(AtomNode { core, behavior }));
        self.links.push(Some(link));
        self.creation_order.push(atom_id);
        Ok(atom_id)
    }

    /// Point `atom`'s dependency edge at `dep` (or clear it with `None`).
    pub fn set_dependency(&mut self, atom: AtomId, dep: Option<AtomId>) -> Result<()> {
        if let Some(d) = dep {
            self.node_ref(d)?;
        }
        let old = self.node_ref(atom)?.core.dependency();
        if let Some(o) = old {
            if let Ok(node) = self.node_mut(o) {
                node.core.decr_dep_count();
            }
        }
        self.node_mut(atom)?.core.set_dependency_slot(dep);
        if let Some(d) = dep {
            self.node_mut(d)?.core.incr_dep_count();
        }
        Ok(())
    }

    /// Remove an atom and its link from the engine.
    ///
    /// # Panics
    ///
    /// Panics if another atom or link still depends on it
    /// (`dependency_count != 0`). Tearing down a node that is still depended
    /// on is a graph-construction bug.
    pub fn remove_atom(&mut self, atom: AtomId) -> Result<()> {
        let dep_count = self.node_ref(atom)?.core.dependency_count();
        assert!(
            dep_count == 0,
            "destroying {atom} with nonzero dependency count ({dep_count})"
        );
        self.set_dependency(atom, None)?;

        let link_id = self.atom_link(atom)?;
        self.unlink_all(link_id);
        self.link_system.remove_everywhere(link_id);

        let node = self.node_mut(atom)?;
        node.behavior.uninitialize();
        node.core.interface_mut().uninitialize();
        node.core.set_initialized(false);
        node.core.set_link(None);

        self.atoms[atom.index()] = None;
        self.links[link_id.index()] = None;
        self.creation_order.retain(|a| *a != atom);
        info!(atom = %atom, link = %link_id, "atom removed");
        Ok(())
    }

    /// Tear down every exchange touching `link`, on both sides.
    fn unlink_all(&mut self, link_id: LinkId) {
        let (primary, outgoing, sides) = match self.link_ref(link_id) {
            Ok(l) => (l.primary(), l.outgoing().to_vec(), l.sides().to_vec()),
            Err(_) => return,
        };
        if let Some(ex_id) = primary {
            let src_link = self.exchange_point(ex_id).map(|ex| ex.src().link).ok();
            if let Some(src_link) = src_link {
                if let Ok(l) = self.link_mut(src_link) {
                    l.remove_outgoing(ex_id);
                    l.remove_sides_with(link_id);
                }
            }
            self.exchanges[ex_id.index()] = None;
        }
        for ex_id in outgoing {
            let sink_link = self.exchange_point(ex_id).map(|ex| ex.sink().link).ok();
            if let Some(sink_link) = sink_link {
                if let Ok(l) = self.link_mut(sink_link) {
                    if l.primary() == Some(ex_id) {
                        l.set_primary(None);
                    }
                    l.remove_outgoing(ex_id);
                    l.remove_sides_with(link_id);
                }
            }
            if ex_id.index() < self.exchanges.len() {
                self.exchanges[ex_id.index()] = None;
            }
        }
        for side in sides {
            if let Ok(l) = self.link_mut(side.other_link) {
                l.remove_sides_with(link_id);
                l.remove_outgoing(side.exchange);
                if l.primary() == Some(side.exchange) {
                    l.set_primary(None);
                }
            }
            if side.exchange.index() < self.exchanges.len() {
                self.exchanges[side.exchange.index()] = None;
            }
        }
        if let Ok(l) = self.link_mut(link_id) {
            l.set_primary(None);
        }
    }

    /// Wire the primary exchange: `src_atom`'s source channel feeds
    /// `sink_atom`'s sink channel. The sink atom gains a dependency edge on
    /// the source atom.
    pub fn link_primary(
        &mut self,
        src_atom: AtomId,
        sink_atom: AtomId,
        src_ch: usize,
        sink_ch: usize,
    ) -> Result<ExchangeId> {
        let src_link = self.atom_link(src_atom)?;
        let sink_link = self.atom_link(sink_atom)?;

        let src_kind = {
            let c = self.source_container(src_link, src_ch)?;
            let kind = c.read().kind();
            kind
        };
        let sink_accepts = {
            let node = self.node_ref(sink_atom)?;
            node.core
                .interface()
                .sink_descriptor(sink_ch)
                .ok_or(FlowError::Lookup(LookupError::Channel {
                    link: sink_link,
                    channel: sink_ch,
                }))?
                .accepts(src_kind)
        };
        if !sink_accepts {
            return Err(FlowError::Wiring(format!(
                "sink channel {sink_ch} of {sink_atom} does not accept {src_kind} packets"
            )));
        }
        if self.link_ref(sink_link)?.primary().is_some() {
            return Err(FlowError::Wiring(format!(
                "{sink_link} already has a primary exchange"
            )));
        }

        let ex_id = ExchangeId::new(self.exchanges.len());
        self.exchanges.push(Some(ExchangePoint::new(
            ex_id,
            ExchangeKind::Primary,
            PortRef::new(src_link, src_ch),
            PortRef::new(sink_link, sink_ch),
        )));
        self.link_mut(sink_link)?.set_primary(Some(ex_id));
        self.link_mut(src_link)?.add_outgoing(ex_id);

        let src_handle = self.link_ref(src_link)?.router_port(src_ch);
        let sink_handle = self.link_ref(sink_link)?.router_sink_port(sink_ch);
        if let (Some(s), Some(d)) = (src_handle, sink_handle) {
            self.router.connect(s, d)?;
        }

        self.set_dependency(sink_atom, Some(src_atom))?;
        info!(exchange = %ex_id, src = %src_atom, sink = %sink_atom, "primary link wired");
        Ok(ex_id)
    }

    /// Wire a side channel: `local`'s source channel `local_idx` feeds
    /// `other`'s sink channel `other_idx`. Records the connection on both
    /// links symmetrically and reconciles the two containers' queue bounds
    /// (the stricter consumer wins ties). Returns false, mutating nothing,
    /// if either side refuses.
    pub fn link_side_sink(
        &mut self,
        local: LinkId,
        other: LinkId,
        local_idx: usize,
        other_idx: usize,
    ) -> bool {
        if local == other {
            debug!(%local, "side link refused: cannot side-link a link to itself");
            return false;
        }
        let (Ok(local_link), Ok(other_link)) = (self.link_ref(local), self.link_ref(other)) else {
            debug!(%local, %other, "side link refused: unknown link");
            return false;
        };
        if !other_link.allow_side_sink() {
            debug!(%other, "side link refused: target does not accept side sinks");
            return false;
        }
        if local_link.has_side(local_idx, other_idx, other)
            || other_link.has_side(other_idx, local_idx, local)
        {
            debug!(%local, %other, "side link refused: connection already exists");
            return false;
        }
        let Ok(src_c) = self.source_container(local, local_idx) else {
            debug!(%local, local_idx, "side link refused: no such source channel");
            return false;
        };
        let Ok(sink_c) = self.sink_container(other, other_idx) else {
            debug!(%other, other_idx, "side link refused: no such sink channel");
            return false;
        };
        let src_kind = src_c.read().kind();
        let accepts = self
            .link_ref(other)
            .ok()
            .and_then(|l| self.node_ref(l.atom()).ok())
            .and_then(|n| n.core.interface().sink_descriptor(other_idx))
            .is_some_and(|d| d.accepts(src_kind));
        if !accepts {
            debug!(%other, other_idx, kind = %src_kind, "side link refused: kind not accepted");
            return false;
        }

        // Reconcile queue bounds across the two ends.
        {
            let mut src = src_c.write();
            let mut snk = sink_c.write();
            let mut max = src.max_queue_size().min(snk.max_queue_size());
            let min = src.min_queue_size().max(snk.min_queue_size());
            if min > max {
                max = min;
            }
            src.set_max_queue_size(max);
            src.set_min_queue_size(min);
            snk.set_max_queue_size(max);
            snk.set_min_queue_size(min);
        }

        let ex_id = ExchangeId::new(self.exchanges.len());
        self.exchanges.push(Some(ExchangePoint::new(
            ex_id,
            ExchangeKind::Side,
            PortRef::new(local, local_idx),
            PortRef::new(other, other_idx),
        )));
        if let Ok(l) = self.link_mut(local) {
            l.add_outgoing(ex_id);
            l.add_side(SideConnection {
                local_channel: local_idx,
                other_channel: other_idx,
                other_link: other,
                exchange: ex_id,
                role: SideRole::Source,
            });
        }
        if let Ok(l) = self.link_mut(other) {
            l.add_side(SideConnection {
                local_channel: other_idx,
                other_channel: local_idx,
                other_link: local,
                exchange: ex_id,
                role: SideRole::Sink,
            });
        }
        let src_handle = self.link_ref(local).ok().and_then(|l| l.router_port(local_idx));
        let sink_handle = self
            .link_ref(other)
            .ok()
            .and_then(|l| l.router_sink_port(other_idx));
        if let (Some(s), Some(d)) = (src_handle, sink_handle) {
            if let Err(e) = self.router.connect(s, d) {
                debug!(error = %e, "router connect for side link failed");
            }
        }
        info!(exchange = %ex_id, %local, %other, "side link wired");
        true
    }

    // ---- format negotiation -------------------------------------------

    /// Two-phase format change initiated at a source channel.
    ///
    /// Every sink fed by the channel must accept the new format before
    /// anything mutates; on success the format is committed to the source
    /// container and propagated to every connected sink container, and all
    /// of them are locked. On failure both ends keep their prior formats.
    pub fn negotiate_source_format(
        &mut self,
        link: LinkId,
        src_ch: usize,
        format: &ValueFormat,
    ) -> bool {
        if !format.is_valid() {
            debug!(%link, src_ch, "negotiation refused: format is invalid");
            return false;
        }
        let Ok(src_c) = self.source_container(link, src_ch) else {
            debug!(%link, src_ch, "negotiation refused: no such source channel");
            return false;
        };
        // Phase 1: validate the source end.
        {
            let src = src_c.read();
            if src.is_format_locked() && !src.format().is_some_and(|f| f.is_same(format)) {
                debug!(%link, src_ch, "negotiation refused: source format is locked");
                return false;
            }
        }
        let src_accepts = self
            .link_ref(link)
            .ok()
            .and_then(|l| self.node_ref(l.atom()).ok())
            .and_then(|n| n.core.interface().source_descriptor(src_ch))
            .is_some_and(|d| d.accepts(format.kind()));
        if !src_accepts {
            debug!(%link, src_ch, "negotiation refused: source channel rejects kind");
            return false;
        }

        // Phase 1 continued: every consumer of this source channel consents.
        let consumers = self.consumers_of(link, src_ch);
        for port in &consumers {
            let Ok(sink_c) = self.sink_container(port.link, port.channel) else {
                debug!(sink = %port, "negotiation refused: stale consumer");
                return false;
            };
            {
                let sink = sink_c.read();
                if sink.is_format_locked() && !sink.format().is_some_and(|f| f.is_same(format)) {
                    debug!(sink = %port, "negotiation refused: sink format is locked");
                    return false;
                }
            }
            let Ok(sink_atom) = self.link_ref(port.link).map(|l| l.atom()) else {
                return false;
            };
            let accepted = {
                let Ok(node) = self.node_mut(sink_atom) else {
                    return false;
                };
                let desc_ok = node
                    .core
                    .interface()
                    .sink_descriptor(port.channel)
                    .is_some_and(|d| d.accepts(format.kind()));
                desc_ok && node.behavior.accept_format(port.channel, format)
            };
            if !accepted {
                debug!(sink = %port, "negotiation refused by consumer");
                return false;
            }
        }

        // Phase 2: commit everywhere, then lock the agreement in place.
        {
            let mut src = src_c.write();
            if !src.is_format_locked() {
                src.set_format(*format);
            }
            src.lock_format();
        }
        for port in &consumers {
            if let Ok(sink_c) = self.sink_container(port.link, port.channel) {
                let mut sink = sink_c.write();
                if !sink.is_format_locked() {
                    sink.set_format(*format);
                }
                sink.lock_format();
            }
        }
        debug!(%link, src_ch, %format, consumers = consumers.len(), "source format negotiated");
        true
    }

    /// Two-phase format change initiated at a sink channel. Resolves the
    /// source feeding the sink and negotiates on that source channel, which
    /// keeps every other consumer of the same source consistent. A sink with
    /// no feeder commits locally after the same validation.
    pub fn negotiate_sink_format(
        &mut self,
        link: LinkId,
        sink_ch: usize,
        format: &ValueFormat,
    ) -> bool {
        if let Some(feeder) = self.feeder_of(link, sink_ch) {
            return self.negotiate_source_format(feeder.link, feeder.channel, format);
        }
        if !format.is_valid() {
            return false;
        }
        let Ok(sink_c) = self.sink_container(link, sink_ch) else {
            return false;
        };
        {
            let sink = sink_c.read();
            if sink.is_format_locked() && !sink.format().is_some_and(|f| f.is_same(format)) {
                return false;
            }
        }
        let Ok(atom) = self.link_ref(link).map(|l| l.atom()) else {
            return false;
        };
        let accepted = {
            let Ok(node) = self.node_mut(atom) else {
                return false;
            };
            let desc_ok = node
                .core
                .interface()
                .sink_descriptor(sink_ch)
                .is_some_and(|d| d.accepts(format.kind()));
            desc_ok && node.behavior.accept_format(sink_ch, format)
        };
        if !accepted {
            return false;
        }
        let mut sink = sink_c.write();
        if !sink.is_format_locked() {
            sink.set_format(*format);
        }
        true
    }

    /// Sink ports fed by a source channel, across primary and side wiring.
    fn consumers_of(&self, link: LinkId, src_ch: usize) -> Vec<PortRef> {
        let Ok(l) = self.link_ref(link) else {
            return Vec::new();
        };
        l.outgoing()
            .iter()
            .filter_map(|ex_id| self.exchange_point(*ex_id).ok())
            .filter(|ex| ex.src() == PortRef::new(link, src_ch))
            .map(|ex| ex.sink())
            .collect()
    }

    /// The source port feeding a sink channel, if wired.
    fn feeder_of(&self, link: LinkId, sink_ch: usize) -> Option<PortRef> {
        let l = self.link_ref(link).ok()?;
        if let Some(ex) = l.primary().and_then(|id| self.exchange_point(id).ok()) {
            if ex.sink() == PortRef::new(link, sink_ch) {
                return Some(ex.src());
            }
        }
        l.sides()
            .iter()
            .filter(|s| s.role == SideRole::Sink && s.local_channel == sink_ch)
            .filter_map(|s| self.exchange_point(s.exchange).ok())
            .map(|ex| ex.src())
            .next()
    }

    // ---- credits & packet construction --------------------------------

    /// Ask the router for permission to produce on a source port. Zero for
    /// an unregistered port: no work proceeds without explicit permission.
    pub fn request_credits(&mut self, link: LinkId, src_ch: usize, count: u32) -> u32 {
        let Some(handle) = self
            .link_ref(link)
            .ok()
            .and_then(|l| l.router_port(src_ch))
        else {
            debug!(%link, src_ch, "credit request on unregistered port");
            return 0;
        };
        self.router.request_credits(handle, count)
    }

    /// Return consumed-packet credits for a source port. No-op for an
    /// unregistered port.
    pub fn ack_credits(&mut self, link: LinkId, src_ch: usize, count: u32) {
        if let Some(handle) = self
            .link_ref(link)
            .ok()
            .and_then(|l| l.router_port(src_ch))
        {
            self.router.ack_credits(handle, count);
        }
    }

    /// Stamp a freshly produced payload with the source channel's
    /// negotiated format.
    pub fn initial_packet(
        &self,
        link: LinkId,
        src_ch: usize,
        timestamp: f64,
        payload: Vec<u8>,
    ) -> Result<Packet> {
        let c = self.source_container(link, src_ch)?;
        let format = c.read().format().copied().ok_or_else(|| {
            FlowError::Format(format!("{link}:{src_ch} has no negotiated format"))
        })?;
        let packet = Packet::new(format, timestamp, payload);
        self.tracker.created(packet.envelope());
        Ok(packet)
    }

    /// Build a reply to an inbound packet. When the inbound format is
    /// already copy-compatible with the source channel's format the payload
    /// is reused in place (zero-copy); otherwise the bytes are re-encoded
    /// under the new format.
    pub fn reply_packet(
        &self,
        link: LinkId,
        src_ch: usize,
        inbound: &Packet,
        timestamp: f64,
    ) -> Result<Packet> {
        let c = self.source_container(link, src_ch)?;
        let format = c.read().format().copied().ok_or_else(|| {
            FlowError::Format(format!("{link}:{src_ch} has no negotiated format"))
        })?;
        let packet = if inbound.format().is_copy_compatible(&format) {
            Packet::with_shared_payload(format, timestamp, inbound.payload_arc().clone())
        } else {
            Packet::new(format, timestamp, inbound.payload().to_vec())
        };
        self.tracker.created(packet.envelope());
        Ok(packet)
    }

    // ---- scheduling registration --------------------------------------

    pub fn add_updated(&mut self, link: LinkId) {
        self.link_system.add(SchedulingClass::Updated, link);
    }

    pub fn remove_updated(&mut self, link: LinkId) {
        self.link_system.remove(SchedulingClass::Updated, link);
    }

    pub fn add_customer(&mut self, link: LinkId) {
        self.link_system.add(SchedulingClass::Customer, link);
    }

    pub fn remove_customer(&mut self, link: LinkId) {
        self.link_system.remove(SchedulingClass::Customer, link);
    }

    pub fn add_driver(&mut self, link: LinkId) {
        self.link_system.add(SchedulingClass::Driver, link);
    }

    pub fn remove_driver(&mut self, link: LinkId) {
        self.link_system.remove(SchedulingClass::Driver, link);
    }

    pub fn add_polling(&mut self, link: LinkId) {
        self.link_system.add(SchedulingClass::Poller, link);
    }

    pub fn remove_polling(&mut self, link: LinkId) {
        self.link_system.remove(SchedulingClass::Poller, link);
    }

    /// Idempotent per-tick callback registration for an atom.
    pub fn add_atom_to_update_list(&mut self, atom: AtomId) -> Result<()> {
        let link = self.atom_link(atom)?;
        self.add_updated(link);
        Ok(())
    }

    pub fn remove_atom_from_update_list(&mut self, atom: AtomId) -> Result<()> {
        let link = self.atom_link(atom)?;
        self.remove_updated(link);
        Ok(())
    }

    /// Defer a one-shot forward of `link` into the next tick. Safe to call
    /// from threads outside the engine via a cloned once sender.
    pub fn post_continue_forward(&self, link: LinkId) -> bool {
        self.link_system.post_once(ForwarderId::Link(link))
    }

    // ---- lifecycle -----------------------------------------------------

    /// Start every atom, in creation order.
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        for atom_id in self.creation_order.clone() {
            let node = self.node_mut(atom_id)?;
            if !node.behavior.start() {
                return Err(FlowError::Initialize(format!(
                    "'{}' refused to start",
                    node.core.name()
                )));
            }
            node.core.set_running(true);
        }
        self.running = true;
        info!(atoms = self.creation_order.len(), "engine started");
        Ok(())
    }

    /// Run one tick: drain the deferred once queue, run per-tick updates,
    /// let customers recompute pacing, then sweep the scheduling classes in
    /// the fixed order Customer, Driver, Poller, Updated.
    pub fn update(&mut self, dt: f64) {
        if !self.running {
            warn!("update called while engine is not running");
            return;
        }
        self.tick += 1;
        self.tick_dt = dt;
        trace!(tick = self.tick, dt, "tick begin");

        // 1. Deferred one-shot forwards.
        for entry in self.link_system.take_once() {
            let mut scope = FwdScope::new(entry.forwarder);
            self.drive_scope(&mut scope, false);
            self.link_system.run_once_callback();
        }

        // 2. Per-tick atom updates.
        for link_id in self.link_system.members(SchedulingClass::Updated).to_vec() {
            let Some(link) = self.links.get(link_id.index()).and_then(Option::as_ref) else {
                continue;
            };
            let atom = link.atom();
            if let Some(node) = self.atoms.get_mut(atom.index()).and_then(Option::as_mut) {
                node.behavior.update(dt);
            }
        }

        // 3. Customers recompute their pacing before any data is pulled.
        for link_id in self.link_system.members(SchedulingClass::Customer).to_vec() {
            let Some(link) = self.links.get_mut(link_id.index()).and_then(Option::as_mut) else {
                continue;
            };
            let atom = link.atom();
            if let Some(node) = self.atoms.get_mut(atom.index()).and_then(Option::as_mut) {
                node.behavior.update_config(link.cfg_mut(), dt);
            }
        }

        // 4. Class sweeps in fixed order. Customer and driver sweeps are
        // strong; poller and updated sweeps are weak (best effort, never
        // hang on a stuck node).
        for class in [
            SchedulingClass::Customer,
            SchedulingClass::Driver,
            SchedulingClass::Poller,
            SchedulingClass::Updated,
        ] {
            let weak = matches!(class, SchedulingClass::Poller | SchedulingClass::Updated);
            for link_id in self.link_system.members(class).to_vec() {
                let mut scope = FwdScope::new(ForwarderId::Link(link_id));
                self.drive_scope(&mut scope, weak);
                if scope.is_failed() {
                    debug!(link = %link_id, flags = %scope.flag_string(), "sweep aborted");
                }
            }
        }
    }

    /// Stop and tear down the graph in reverse dependency order: behaviors
    /// are stopped first, then atoms are uninitialized (children before the
    /// nodes they depend on), then the registries and arenas are cleared.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        let order: Vec<AtomId> = self.creation_order.iter().rev().copied().collect();
        for atom_id in &order {
            if let Ok(node) = self.node_mut(*atom_id) {
                node.behavior.stop();
                node.core.set_running(false);
            }
        }
        for atom_id in &order {
            let _ = self.set_dependency(*atom_id, None);
        }
        for atom_id in &order {
            if let Ok(node) = self.node_mut(*atom_id) {
                node.behavior.uninitialize();
                node.core.interface_mut().uninitialize();
                node.core.set_initialized(false);
                node.core.set_link(None);
            }
        }
        self.exchanges.clear();
        self.links.clear();
        self.atoms.clear();
        self.creation_order.clear();
        self.link_system.clear();
        info!("engine stopped");
    }

    /// Cheap point-in-time view of the graph and its queue depths.
    pub fn snapshot(&self) -> EngineSnapshot {
        let links = self
            .links
            .iter()
            .flatten()
            .filter_map(|link| {
                let node = self.node_ref(link.atom()).ok()?;
                let iface = node.core.interface();
                let sink_depths = (0..iface.sink_count())
                    .map(|ch| iface.sink(ch).map_or(0, |c| c.read().queue_len()))
                    .collect();
                let source_depths = (0..iface.source_count())
                    .map(|ch| iface.source(ch).map_or(0, |c| c.read().queue_len()))
                    .collect();
                Some(LinkSnapshot {
                    link: link.id(),
                    atom: link.atom(),
                    atom_name: node.core.name().to_string(),
                    sink_depths,
                    source_depths,
                    stuck: link.is_stuck(),
                    render: link.cfg().render,
                    sync: link.cfg().sync,
                })
            })
            .collect();
        EngineSnapshot {
            running: self.running,
            ticks: self.tick,
            atom_count: self.atoms.iter().flatten().count(),
            exchange_count: self.exchanges.iter().flatten().count(),
            links,
        }
    }

    // ---- forwarding ----------------------------------------------------

    /// Drive a scope until it runs dry or a flag stops it.
    pub fn drive_scope(&mut self, scope: &mut FwdScope, weak: bool) {
        while scope.has_current() && !scope.is_break() {
            self.forward_step(scope, weak);
            scope.activate_next();
        }
    }

    /// Visit the scope's current forwarder: setup hook, atom hook, then the
    /// exchange-propagation hook that enqueues successors.
    fn forward_step(&mut self, scope: &mut FwdScope, weak: bool) {
        let Some(cur) = scope.current() else {
            return;
        };
        match cur {
            ForwarderId::Link(link_id) => {
                // Returning to the seed means the sweep closed its loop.
                if scope.pos() > 0 && Some(cur) == scope.first() {
                    scope.set_loop_complete();
                    return;
                }
                self.link_forward_setup(link_id);
                let stuck = self
                    .links
                    .get(link_id.index())
                    .and_then(Option::as_ref)
                    .is_some_and(Link::is_stuck);
                if !(weak && stuck) {
                    self.link_forward_atom(link_id, scope);
                }
                if scope.is_failed() {
                    return;
                }
                let outgoing = match self.link_ref(link_id) {
                    Ok(l) => l.outgoing().to_vec(),
                    Err(_) => return,
                };
                for ex in outgoing {
                    scope.add_next(ForwarderId::Exchange(ex));
                }
            }
            ForwarderId::Exchange(ex_id) => {
                self.forward_exchange(ex_id, scope);
            }
        }
    }

    /// Advance a link's pacing clock, once per tick at its first visit.
    fn link_forward_setup(&mut self, link_id: LinkId) {
        let (atom_id, already) = match self.link_ref(link_id) {
            Ok(l) => (l.atom(), l.last_cfg_tick() == self.tick),
            Err(_) => return,
        };
        if already {
            return;
        }
        let buffer_full = self
            .node_ref(atom_id)
            .map(|node| {
                let iface = node.core.interface();
                (0..iface.source_count())
                    .filter_map(|ch| iface.source(ch))
                    .any(|c| c.read().is_queue_full())
            })
            .unwrap_or(false);
        let tick = self.tick;
        let dt = self.tick_dt;
        if let Some(link) = self.links.get_mut(link_id.index()).and_then(Option::as_mut) {
            link.set_last_cfg_tick(tick);
            link.set_stuck(false);
            link.cfg_mut().update(dt, buffer_full);
        }
    }

    /// The link's atom hook: drain sink queues through `recv`, then produce
    /// into source queues while the pacing clock says render and the router
    /// grants credits.
    fn link_forward_atom(&mut self, link_id: LinkId, scope: &mut FwdScope) {
        let tracker = self.tracker.clone();
        let (atom_id, cfg, handles) = {
            let Some(link) = self.links.get(link_id.index()).and_then(Option::as_ref) else {
                scope.set_failed();
                return;
            };
            (link.atom(), link.cfg().clone(), link.router_ports().to_vec())
        };
        let Some(node) = self.atoms.get_mut(atom_id.index()).and_then(Option::as_mut) else {
            warn!(link = %link_id, atom = %atom_id, "forward through missing atom");
            scope.set_failed();
            return;
        };
        if !node.core.is_initialized() {
            return;
        }
        let AtomNode { core, behavior } = node;
        let mut stuck = false;

        for ch in 0..core.interface().sink_count() {
            let Some(container) = core.interface().sink(ch).cloned() else {
                continue;
            };
            loop {
                let Some(packet) = container.write().take() else {
                    break;
                };
                if behavior.recv(ch, &packet) {
                    tracker.consumed(packet.envelope());
                } else {
                    trace!(link = %link_id, ch, "recv refused, packet stays pending");
                    container.write().put_back(packet);
                    stuck = true;
                    break;
                }
            }
        }

        if cfg.render && behavior.is_forward_ready() {
            for ch in 0..core.interface().source_count() {
                let Some(container) = core.interface().source(ch).cloned() else {
                    continue;
                };
                let handle: Option<RouterPortHandle> = handles.get(ch).copied().flatten();
                loop {
                    let mut queue = container.write();
                    if queue.is_queue_full() {
                        break;
                    }
                    let Some(format) = queue.format().copied() else {
                        break;
                    };
                    if let Some(h) = handle {
                        if self.router.request_credits(h, 1) == 0 {
                            trace!(link = %link_id, ch, "no credits granted, producing paused");
                            break;
                        }
                    }
                    let Some(payload) = behavior.send(&cfg, ch) else {
                        // Nothing to emit: hand the unused credit back.
                        if let Some(h) = handle {
                            self.router.ack_credits(h, 1);
                        }
                        break;
                    };
                    let packet = Packet::new(format, cfg.time_total, payload);
                    tracker.created(packet.envelope());
                    if queue.offer(packet).is_err() {
                        break;
                    }
                }
            }
        }

        if let Some(link) = self.links.get_mut(link_id.index()).and_then(Option::as_mut) {
            if stuck {
                link.set_stuck(true);
            }
        }
    }

    /// The exchange point's move loop: first-use sink format negotiation,
    /// then move packets while the source has any and the sink has room. A
    /// mid-copy format fault aborts this tick's traversal through the point
    /// (scope failed); a full sink is plain backpressure. Either way the
    /// sink link is enqueued so downstream gets its chance to drain.
    fn forward_exchange(&mut self, ex_id: ExchangeId, scope: &mut FwdScope) {
        let (src_port, sink_port) = match self.exchange_point(ex_id) {
            Ok(ex) => (ex.src(), ex.sink()),
            Err(e) => {
                warn!(error = %e, "forward through missing exchange");
                scope.set_failed();
                return;
            }
        };
        let (Ok(src_c), Ok(sink_c)) = (
            self.source_container(src_port.link, src_port.channel),
            self.sink_container(sink_port.link, sink_port.channel),
        ) else {
            warn!(exchange = %ex_id, "exchange ends did not resolve");
            scope.set_failed();
            return;
        };

        {
            let mut sink = sink_c.write();
            if !sink.has_valid_format() {
                let format = ValueFormat::default_for(sink.kind());
                trace!(sink = %sink_port, %format, "first-use sink format");
                sink.set_format(format);
            }
        }

        let src_handle = self
            .link_ref(src_port.link)
            .ok()
            .and_then(|l| l.router_port(src_port.channel));
        let mut moved: u32 = 0;
        loop {
            if sink_c.read().is_queue_full() {
                break;
            }
            let Some(packet) = src_c.write().take() else {
                break;
            };
            let compatible = sink_c
                .read()
                .format()
                .is_some_and(|f| packet.format().is_copy_compatible(f));
            if !compatible {
                warn!(
                    exchange = %ex_id,
                    packet_format = %packet.format(),
                    "format fault during exchange, aborting traversal"
                );
                src_c.write().put_back(packet);
                scope.set_failed();
                break;
            }
            match sink_c.write().offer(packet) {
                Ok(()) => moved += 1,
                Err(full) => {
                    src_c.write().put_back(full.0);
                    break;
                }
            }
        }
        if moved > 0 {
            if let Some(h) = src_handle {
                self.router.ack_credits(h, moved);
                for _ in 0..moved {
                    self.router.note_packet_routed(h);
                }
            }
            trace!(exchange = %ex_id, moved, "exchange moved packets");
        }

        // Regardless of outcome, downstream gets a chance to drain.
        scope.add_next(ForwarderId::Link(sink_port.link));
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::atom::AtomBehavior;
    use crate::core::format::ValueKind;
    use crate::core::interface::InterfaceDescriptor;

    struct Passive;
    impl AtomBehavior for Passive {}

    fn sink_desc() -> InterfaceDescriptor {
        InterfaceDescriptor::new().with_sink("in", vec![ValueKind::Event])
    }

    fn source_desc() -> InterfaceDescriptor {
        InterfaceDescriptor::new().with_source("out", vec![ValueKind::Event])
    }

    #[test]
    fn add_atom_creates_link_and_registers_ports() {
        let mut engine = EngineContext::default();
        let a = engine.add_atom("a", source_desc(), Box::new(Passive)).unwrap();
        let link = engine.atom_link(a).unwrap();
        assert!(engine.link(link).unwrap().router_port(0).is_some());
        assert_eq!(engine.router().port_count(), 1);
        assert!(engine.atom_core(a).unwrap().is_initialized());
    }

    #[test]
    fn stale_ids_are_lookup_errors() {
        let engine = EngineContext::default();
        assert!(matches!(
            engine.atom_core(AtomId::new(9)),
            Err(FlowError::Lookup(LookupError::Atom(_)))
        ));
        assert!(matches!(
            engine.link(LinkId::new(9)),
            Err(FlowError::Lookup(LookupError::Link(_)))
        ));
    }

    #[test]
    fn link_primary_wires_exchange_and_dependency() {
        let mut engine = EngineContext::default();
        let src = engine.add_atom("src", source_desc(), Box::new(Passive)).unwrap();
        let snk = engine.add_atom("snk", sink_desc(), Box::new(Passive)).unwrap();
        let ex = engine.link_primary(src, snk, 0, 0).unwrap();

        let sink_link = engine.atom_link(snk).unwrap();
        assert_eq!(engine.link(sink_link).unwrap().primary(), Some(ex));
        assert_eq!(engine.atom_core(src).unwrap().dependency_count(), 1);
        assert_eq!(engine.router().connection_count(), 1);
    }

    #[test]
    fn second_primary_on_same_sink_is_refused() {
        let mut engine = EngineContext::default();
        let a = engine.add_atom("a", source_desc(), Box::new(Passive)).unwrap();
        let b = engine.add_atom("b", source_desc(), Box::new(Passive)).unwrap();
        let c = engine.add_atom("c", sink_desc(), Box::new(Passive)).unwrap();
        engine.link_primary(a, c, 0, 0).unwrap();
        assert!(matches!(
            engine.link_primary(b, c, 0, 0),
            Err(FlowError::Wiring(_))
        ));
    }

    #[test]
    fn kind_mismatch_is_a_wiring_error() {
        let mut engine = EngineContext::default();
        let a = engine.add_atom("a", source_desc(), Box::new(Passive)).unwrap();
        let b = engine
            .add_atom(
                "b",
                InterfaceDescriptor::new().with_sink("in", vec![ValueKind::Audio]),
                Box::new(Passive),
            )
            .unwrap();
        assert!(matches!(
            engine.link_primary(a, b, 0, 0),
            Err(FlowError::Wiring(_))
        ));
    }

    #[test]
    #[should_panic(expected = "nonzero dependency count")]
    fn removing_a_depended_on_atom_is_fatal() {
        let mut engine = EngineContext::default();
        let src = engine.add_atom("src", source_desc(), Box::new(Passive)).unwrap();
        let snk = engine.add_atom("snk", sink_desc(), Box::new(Passive)).unwrap();
        engine.link_primary(src, snk, 0, 0).unwrap();
        let _ = engine.remove_atom(src);
    }

    #[test]
    fn remove_atom_clears_both_sides_of_the_wiring() {
        let mut engine = EngineContext::default();
        let src = engine.add_atom("src", source_desc(), Box::new(Passive)).unwrap();
        let snk = engine.add_atom("snk", sink_desc(), Box::new(Passive)).unwrap();
        let ex = engine.link_primary(src, snk, 0, 0).unwrap();

        engine.remove_atom(snk).unwrap();
        assert!(engine.exchange_point(ex).is_err());
        let src_link = engine.atom_link(src).unwrap();
        assert!(engine.link(src_link).unwrap().outgoing().is_empty());
        assert_eq!(engine.atom_core(src).unwrap().dependency_count(), 0);
        // The source can go now.
        engine.remove_atom(src).unwrap();
    }

    #[test]
    fn update_without_start_is_a_noop() {
        let mut engine = EngineContext::default();
        engine.update(1.0);
        assert_eq!(engine.ticks(), 0);
    }

    #[test]
    fn stop_clears_the_graph() {
        let mut engine = EngineContext::default();
        let a = engine.add_atom("a", source_desc(), Box::new(Passive)).unwrap();
        let b = engine.add_atom("b", sink_desc(), Box::new(Passive)).unwrap();
        engine.link_primary(a, b, 0, 0).unwrap();
        engine.start().unwrap();
        engine.update(0.1);
        engine.stop();
        assert!(!engine.is_running());
        assert!(engine.atom_core(a).is_err());
        assert!(engine.atom_link(b).is_err());
    }
}
