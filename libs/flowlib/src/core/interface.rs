// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Channel declarations and the per-atom container collection.
//!
//! An atom type declares its channels statically through an
//! [`InterfaceDescriptor`]; initialization instantiates one
//! [`ValueContainer`](super::container::ValueContainer) per channel with a
//! default format derived from the channel's declared kind.

use std::borrow::Cow;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::config::QueueBoundsConfig;
use super::container::{SharedContainer, ValueContainer};
use super::format::ValueKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    Sink,
    Source,
}

/// Static declaration of one channel on an atom type.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    pub direction: ChannelDirection,
    pub index: usize,
    /// Value kinds this channel accepts; the first entry seeds the default
    /// format at initialization.
    pub accepted: Vec<ValueKind>,
    /// Optional channels may remain unconnected.
    pub optional: bool,
    pub name: Cow<'static, str>,
}

impl ChannelDescriptor {
    pub fn accepts(&self, kind: ValueKind) -> bool {
        self.accepted.contains(&kind)
    }
}

/// Static declaration of an atom type's full channel set.
#[derive(Debug, Clone, Default)]
pub struct InterfaceDescriptor {
    pub sinks: Vec<ChannelDescriptor>,
    pub sources: Vec<ChannelDescriptor>,
}

impl InterfaceDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, name: &'static str, accepted: Vec<ValueKind>) -> Self {
        let index = self.sinks.len();
        self.sinks.push(ChannelDescriptor {
            direction: ChannelDirection::Sink,
            index,
            accepted,
            optional: false,
            name: Cow::Borrowed(name),
        });
        self
    }

    pub fn with_source(mut self, name: &'static str, accepted: Vec<ValueKind>) -> Self {
        let index = self.sources.len();
        self.sources.push(ChannelDescriptor {
            direction: ChannelDirection::Source,
            index,
            accepted,
            optional: false,
            name: Cow::Borrowed(name),
        });
        self
    }

    pub fn with_optional_sink(mut self, name: &'static str, accepted: Vec<ValueKind>) -> Self {
        self = self.with_sink(name, accepted);
        self.sinks.last_mut().expect("just pushed").optional = true;
        self
    }

    pub fn with_optional_source(mut self, name: &'static str, accepted: Vec<ValueKind>) -> Self {
        self = self.with_source(name, accepted);
        self.sources.last_mut().expect("just pushed").optional = true;
        self
    }
}

struct ChannelState {
    desc: ChannelDescriptor,
    container: Option<SharedContainer>,
}

/// The ordered sink and source containers of one atom.
#[derive(Default)]
pub struct AtomInterface {
    sinks: Vec<ChannelState>,
    sources: Vec<ChannelState>,
    initialized: bool,
}

impl AtomInterface {
    /// Install the channel declarations. Must happen before `initialize`.
    ///
    /// # Panics
    ///
    /// Panics if the interface is already initialized - redeclaring channels
    /// under live containers is a graph-construction bug.
    pub fn set_interface(&mut self, desc: InterfaceDescriptor) {
        assert!(
            !self.initialized,
            "set_interface on an initialized interface"
        );
        self.sinks = desc
            .sinks
            .into_iter()
            .map(|desc| ChannelState {
                desc,
                container: None,
            })
            .collect();
        self.sources = desc
            .sources
            .into_iter()
            .map(|desc| ChannelState {
                desc,
                container: None,
            })
            .collect();
    }

    /// Allocate one container per declared channel, each pre-negotiated to
    /// the default format of the channel's first accepted kind. Returns
    /// false (leaving the interface uninitialized) if any channel declares
    /// no accepted kinds.
    pub fn initialize(&mut self, bounds: &QueueBoundsConfig) -> bool {
        if self.initialized {
            return true;
        }
        for ch in self.sinks.iter().chain(self.sources.iter()) {
            if ch.desc.accepted.is_empty() {
                warn!(
                    channel = %ch.desc.name,
                    "channel declares no accepted value kinds; initialization refused"
                );
                return false;
            }
        }
        for ch in self.sinks.iter_mut().chain(self.sources.iter_mut()) {
            let kind = ch.desc.accepted[0];
            ch.container = Some(Arc::new(RwLock::new(ValueContainer::with_default_format(
                kind,
                bounds.min_packets,
                bounds.max_packets,
            ))));
        }
        self.initialized = true;
        true
    }

    /// Release all containers. Safe to call repeatedly.
    pub fn uninitialize(&mut self) {
        for ch in self.sinks.iter_mut().chain(self.sources.iter_mut()) {
            ch.container = None;
        }
        self.initialized = false;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sink(&self, index: usize) -> Option<&SharedContainer> {
        self.sinks.get(index)?.container.as_ref()
    }

    pub fn source(&self, index: usize) -> Option<&SharedContainer> {
        self.sources.get(index)?.container.as_ref()
    }

    pub fn sink_descriptor(&self, index: usize) -> Option<&ChannelDescriptor> {
        self.sinks.get(index).map(|ch| &ch.desc)
    }

    pub fn source_descriptor(&self, index: usize) -> Option<&ChannelDescriptor> {
        self.sources.get(index).map(|ch| &ch.desc)
    }

    /// Linear scan for the first source channel accepting `kind`.
    pub fn find_source_with_kind(&self, kind: ValueKind) -> Option<usize> {
        self.sources.iter().position(|ch| ch.desc.accepts(kind))
    }

    /// Linear scan for the first sink channel accepting `kind`.
    pub fn find_sink_with_kind(&self, kind: ValueKind) -> Option<usize> {
        self.sinks.iter().position(|ch| ch.desc.accepts(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_port_desc() -> InterfaceDescriptor {
        InterfaceDescriptor::new()
            .with_sink("in", vec![ValueKind::Audio, ValueKind::Midi])
            .with_source("out", vec![ValueKind::Audio])
    }

    #[test]
    fn initialize_allocates_default_formatted_containers() {
        let mut iface = AtomInterface::default();
        iface.set_interface(two_port_desc());
        assert!(iface.initialize(&QueueBoundsConfig::default()));
        assert!(iface.is_initialized());

        let sink = iface.sink(0).unwrap();
        let guard = sink.read();
        assert_eq!(guard.kind(), ValueKind::Audio);
        assert!(guard.has_valid_format());
    }

    #[test]
    fn initialize_refuses_empty_accept_sets() {
        let mut iface = AtomInterface::default();
        let mut desc = two_port_desc();
        desc.sinks[0].accepted.clear();
        iface.set_interface(desc);
        assert!(!iface.initialize(&QueueBoundsConfig::default()));
        assert!(!iface.is_initialized());
        assert!(iface.sink(0).is_none());
    }

    #[test]
    fn uninitialize_releases_containers() {
        let mut iface = AtomInterface::default();
        iface.set_interface(two_port_desc());
        assert!(iface.initialize(&QueueBoundsConfig::default()));
        iface.uninitialize();
        assert!(!iface.is_initialized());
        assert!(iface.sink(0).is_none());
        assert!(iface.source(0).is_none());
    }

    #[test]
    fn kind_scan_returns_first_match() {
        let mut iface = AtomInterface::default();
        iface.set_interface(two_port_desc());
        assert_eq!(iface.find_sink_with_kind(ValueKind::Midi), Some(0));
        assert_eq!(iface.find_source_with_kind(ValueKind::Audio), Some(0));
        assert_eq!(iface.find_source_with_kind(ValueKind::Video), None);
    }

    #[test]
    #[should_panic(expected = "initialized interface")]
    fn redeclaring_live_interface_is_fatal() {
        let mut iface = AtomInterface::default();
        iface.set_interface(two_port_desc());
        assert!(iface.initialize(&QueueBoundsConfig::default()));
        iface.set_interface(two_port_desc());
    }
}
