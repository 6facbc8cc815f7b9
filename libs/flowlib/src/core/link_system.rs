// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Link system - scheduling-class registries and the deferred once queue.
//!
//! Links are classified into four membership sets, each with a distinct
//! scheduling guarantee:
//!
//! - **Customer**: pulled every tick regardless of upstream readiness, so
//!   consumers always get a chance to drain.
//! - **Driver**: originates data (external capture and the like); walked
//!   even when nothing is pending upstream.
//! - **Poller**: checked for readiness every tick, never guaranteed to
//!   produce.
//! - **Updated**: the catch-all per-tick callback list.
//!
//! A link may belong to several sets; membership changes only through the
//! explicit add/remove calls, and registration order is the visit order.
//! The once queue is a bounded channel so threads outside the engine can
//! defer a one-shot forward into the next tick.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::warn;

use super::fwd_scope::ForwarderId;
use super::ids::LinkId;

/// The four scheduling classes, in per-tick sweep order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingClass {
    Customer,
    Driver,
    Poller,
    Updated,
}

/// A deferred one-shot forward: the seed forwarder for a scope run at the
/// top of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnceEntry {
    pub forwarder: ForwarderId,
}

pub struct LinkSystem {
    updated: Vec<LinkId>,
    customers: Vec<LinkId>,
    drivers: Vec<LinkId>,
    pollers: Vec<LinkId>,
    once_tx: Sender<OnceEntry>,
    once_rx: Receiver<OnceEntry>,
    once_callback: Option<Box<dyn FnMut() + Send>>,
}

impl LinkSystem {
    pub fn new(once_capacity: usize) -> Self {
        let (once_tx, once_rx) = bounded(once_capacity.max(1));
        Self {
            updated: Vec::new(),
            customers: Vec::new(),
            drivers: Vec::new(),
            pollers: Vec::new(),
            once_tx,
            once_rx,
            once_callback: None,
        }
    }

    fn set_of(&mut self, class: SchedulingClass) -> &mut Vec<LinkId> {
        match class {
            SchedulingClass::Customer => &mut self.customers,
            SchedulingClass::Driver => &mut self.drivers,
            SchedulingClass::Poller => &mut self.pollers,
            SchedulingClass::Updated => &mut self.updated,
        }
    }

    /// Add a link to a class. Idempotent; registration order is preserved.
    pub fn add(&mut self, class: SchedulingClass, link: LinkId) {
        let set = self.set_of(class);
        if !set.contains(&link) {
            set.push(link);
        }
    }

    /// Remove a link from a class. Idempotent.
    pub fn remove(&mut self, class: SchedulingClass, link: LinkId) {
        self.set_of(class).retain(|l| *l != link);
    }

    /// Drop a link from every class.
    pub fn remove_everywhere(&mut self, link: LinkId) {
        for class in [
            SchedulingClass::Customer,
            SchedulingClass::Driver,
            SchedulingClass::Poller,
            SchedulingClass::Updated,
        ] {
            self.remove(class, link);
        }
    }

    pub fn members(&self, class: SchedulingClass) -> &[LinkId] {
        match class {
            SchedulingClass::Customer => &self.customers,
            SchedulingClass::Driver => &self.drivers,
            SchedulingClass::Poller => &self.pollers,
            SchedulingClass::Updated => &self.updated,
        }
    }

    pub fn contains(&self, class: SchedulingClass, link: LinkId) -> bool {
        self.members(class).contains(&link)
    }

    /// Sender half of the once queue, cloneable into other threads.
    pub fn once_sender(&self) -> Sender<OnceEntry> {
        self.once_tx.clone()
    }

    /// Defer a one-shot forward into the next tick. Returns false (and
    /// logs) when the bounded queue is full.
    pub fn post_once(&self, forwarder: ForwarderId) -> bool {
        match self.once_tx.try_send(OnceEntry { forwarder }) {
            Ok(()) => true,
            Err(TrySendError::Full(entry)) => {
                warn!(forwarder = %entry.forwarder, "once queue full, forward dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Detach and clear the pending once entries.
    pub fn take_once(&mut self) -> Vec<OnceEntry> {
        let mut entries = Vec::new();
        while let Ok(entry) = self.once_rx.try_recv() {
            entries.push(entry);
        }
        entries
    }

    /// Install the owning-system callback run after each deferred forward.
    pub fn set_once_callback(&mut self, cb: Box<dyn FnMut() + Send>) {
        self.once_callback = Some(cb);
    }

    pub(crate) fn run_once_callback(&mut self) {
        if let Some(cb) = self.once_callback.as_mut() {
            cb();
        }
    }

    /// Remove every registration. Used at engine teardown.
    pub fn clear(&mut self) {
        self.updated.clear();
        self.customers.clear();
        self.drivers.clear();
        self.pollers.clear();
        while self.once_rx.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_and_ordered() {
        let mut sys = LinkSystem::new(4);
        let (a, b) = (LinkId::new(0), LinkId::new(1));
        sys.add(SchedulingClass::Customer, b);
        sys.add(SchedulingClass::Customer, a);
        sys.add(SchedulingClass::Customer, b);
        assert_eq!(sys.members(SchedulingClass::Customer), &[b, a]);
    }

    #[test]
    fn classes_are_disjoint_registries() {
        let mut sys = LinkSystem::new(4);
        let l = LinkId::new(0);
        sys.add(SchedulingClass::Driver, l);
        sys.add(SchedulingClass::Updated, l);
        assert!(sys.contains(SchedulingClass::Driver, l));
        assert!(sys.contains(SchedulingClass::Updated, l));
        assert!(!sys.contains(SchedulingClass::Customer, l));

        sys.remove(SchedulingClass::Driver, l);
        assert!(!sys.contains(SchedulingClass::Driver, l));
        assert!(sys.contains(SchedulingClass::Updated, l));
    }

    #[test]
    fn remove_everywhere_clears_all_classes() {
        let mut sys = LinkSystem::new(4);
        let l = LinkId::new(3);
        sys.add(SchedulingClass::Customer, l);
        sys.add(SchedulingClass::Poller, l);
        sys.remove_everywhere(l);
        assert!(!sys.contains(SchedulingClass::Customer, l));
        assert!(!sys.contains(SchedulingClass::Poller, l));
    }

    #[test]
    fn once_queue_is_bounded_and_drains() {
        let mut sys = LinkSystem::new(2);
        let f = ForwarderId::Link(LinkId::new(0));
        assert!(sys.post_once(f));
        assert!(sys.post_once(f));
        assert!(!sys.post_once(f), "third post must hit the bound");

        let drained = sys.take_once();
        assert_eq!(drained.len(), 2);
        assert!(sys.take_once().is_empty());
    }

    #[test]
    fn once_sender_works_from_another_thread() {
        let mut sys = LinkSystem::new(4);
        let tx = sys.once_sender();
        std::thread::spawn(move || {
            tx.send(OnceEntry {
                forwarder: ForwarderId::Link(LinkId::new(9)),
            })
            .unwrap();
        })
        .join()
        .unwrap();
        let drained = sys.take_once();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].forwarder, ForwarderId::Link(LinkId::new(9)));
    }
}
