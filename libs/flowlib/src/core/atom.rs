// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Atoms - the processing nodes of the dataflow graph.
//!
//! Behavior and structure are split: [`AtomBehavior`] is the capability
//! trait a concrete atom implements (lifecycle, produce, consume, pacing
//! hooks - all with non-panicking defaults, so an unsupported capability is
//! simply the default), while [`AtomCore`] is the engine-owned structural
//! state: the interface, the link back-reference, dependency counting and
//! the running/initialized flags.

use std::borrow::Cow;

use super::format::ValueFormat;
use super::ids::{AtomId, LinkId};
use super::interface::AtomInterface;
use super::packet::Packet;
use super::realtime::RealtimeSourceConfig;
use super::world::WorldState;

/// Capability surface of a concrete atom.
///
/// The engine owns containers and moves packets; behaviors only look at
/// payloads. `recv` defaults to success - the deliberate seam where real
/// consumption logic gets injected by concrete atoms.
pub trait AtomBehavior: Send {
    /// One-time setup. Returning false leaves the atom uninitialized.
    fn initialize(&mut self, world: &WorldState) -> bool {
        let _ = world;
        true
    }

    /// Release whatever `initialize` acquired.
    fn uninitialize(&mut self) {}

    /// Called once when the engine starts.
    fn start(&mut self) -> bool {
        true
    }

    /// Called once when the engine stops, before uninitialization.
    fn stop(&mut self) {}

    /// Produce one payload for source channel `src_ch`, or `None` when the
    /// atom has nothing to emit this tick.
    fn send(&mut self, cfg: &RealtimeSourceConfig, src_ch: usize) -> Option<Vec<u8>> {
        let _ = (cfg, src_ch);
        None
    }

    /// Consume one packet from sink channel `sink_ch`. Returning false puts
    /// the packet back at the head of the queue and marks the link stuck for
    /// this tick.
    fn recv(&mut self, sink_ch: usize, packet: &Packet) -> bool {
        let _ = (sink_ch, packet);
        true
    }

    /// Per-tick callback for atoms registered in the Updated set.
    fn update(&mut self, dt: f64) {
        let _ = dt;
    }

    /// Pacing recomputation hook for atoms scheduled as customers, run
    /// before any data is pulled in the tick.
    fn update_config(&mut self, cfg: &mut RealtimeSourceConfig, dt: f64) {
        let _ = (cfg, dt);
    }

    /// Whether this atom can take part in forwarding right now.
    fn is_forward_ready(&self) -> bool {
        true
    }

    /// Format-negotiation consent: may the channel switch to `format`?
    /// Kind acceptance and lock state are enforced by the engine; this hook
    /// exists for atoms with stricter requirements.
    fn accept_format(&mut self, sink_ch: usize, format: &ValueFormat) -> bool {
        let _ = (sink_ch, format);
        true
    }
}

/// Engine-owned structural state of one atom.
pub struct AtomCore {
    id: AtomId,
    name: Cow<'static, str>,
    iface: AtomInterface,
    link: Option<LinkId>,
    dependency: Option<AtomId>,
    dep_count: u32,
    initialized: bool,
    running: bool,
}

impl AtomCore {
    pub fn new(id: AtomId, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id,
            name: name.into(),
            iface: AtomInterface::default(),
            link: None,
            dependency: None,
            dep_count: 0,
            initialized: false,
            running: false,
        }
    }

    pub fn id(&self) -> AtomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &AtomInterface {
        &self.iface
    }

    pub fn interface_mut(&mut self) -> &mut AtomInterface {
        &mut self.iface
    }

    pub fn link(&self) -> Option<LinkId> {
        self.link
    }

    pub fn set_link(&mut self, link: Option<LinkId>) {
        self.link = link;
    }

    pub fn dependency(&self) -> Option<AtomId> {
        self.dependency
    }

    pub(crate) fn set_dependency_slot(&mut self, dep: Option<AtomId>) {
        self.dependency = dep;
    }

    pub fn dependency_count(&self) -> u32 {
        self.dep_count
    }

    pub(crate) fn incr_dep_count(&mut self) {
        self.dep_count += 1;
    }

    pub(crate) fn decr_dep_count(&mut self) {
        debug_assert!(self.dep_count > 0, "dependency count underflow");
        self.dep_count = self.dep_count.saturating_sub(1);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self, b: bool) {
        self.initialized = b;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, b: bool) {
        self.running = b;
    }
}

/// An atom as stored in the engine arena: structure plus boxed behavior.
pub struct AtomNode {
    pub core: AtomCore,
    pub behavior: Box<dyn AtomBehavior>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::Packet;
    use crate::core::format::{ValueFormat, ValueKind};

    struct Passive;
    impl AtomBehavior for Passive {}

    #[test]
    fn default_recv_accepts_everything() {
        let mut b = Passive;
        let packet = Packet::new(ValueFormat::default_for(ValueKind::Event), 0.0, vec![]);
        assert!(b.recv(0, &packet));
        assert!(b.initialize(&WorldState::new()));
        assert!(b.send(&RealtimeSourceConfig::default(), 0).is_none());
    }

    #[test]
    fn core_tracks_dependency_count() {
        let mut core = AtomCore::new(AtomId::new(0), "a");
        assert_eq!(core.dependency_count(), 0);
        core.incr_dep_count();
        core.incr_dep_count();
        core.decr_dep_count();
        assert_eq!(core.dependency_count(), 1);
    }
}
