// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Credit flow control through the engine: grants pace production, acks
//! refill on consumption, and unregistered ports fail safe to zero.

mod common;

use common::{CollectorAtom, ProducerAtom};
use flowlib::{EngineConfig, EngineContext, InterfaceDescriptor, ValueKind};

fn source_desc() -> InterfaceDescriptor {
    InterfaceDescriptor::new().with_source("out", vec![ValueKind::Event])
}

fn sink_desc() -> InterfaceDescriptor {
    InterfaceDescriptor::new().with_sink("in", vec![ValueKind::Event])
}

#[test]
fn request_and_ack_cycle_through_the_link() {
    let mut engine = EngineContext::new(EngineConfig::default());
    let a = engine
        .add_atom("a", source_desc(), Box::new(ProducerAtom::with_count(0)))
        .unwrap();
    let a_link = engine.atom_link(a).unwrap();

    // Default initial pool is the default queue depth (2).
    assert_eq!(engine.request_credits(a_link, 0, 1), 1);
    assert_eq!(engine.request_credits(a_link, 0, 5), 1);
    assert_eq!(engine.request_credits(a_link, 0, 1), 0);

    engine.ack_credits(a_link, 0, 2);
    assert_eq!(engine.request_credits(a_link, 0, 2), 2);
}

#[test]
fn unregistered_port_grants_nothing() {
    let mut engine = EngineContext::new(EngineConfig::default());
    let a = engine
        .add_atom("a", source_desc(), Box::new(ProducerAtom::with_count(0)))
        .unwrap();
    let a_link = engine.atom_link(a).unwrap();

    // Channel 7 was never declared, hence never registered.
    assert_eq!(engine.request_credits(a_link, 7, 3), 0);
    engine.ack_credits(a_link, 7, 3); // no-op, no panic
}

#[test]
fn credit_pool_paces_production_per_tick() {
    let config = EngineConfig {
        initial_credits: 1,
        ..EngineConfig::default()
    };
    let mut engine = EngineContext::new(config);
    let a = engine
        .add_atom("a", source_desc(), Box::new(ProducerAtom::with_count(4)))
        .unwrap();
    let (collector, received) = CollectorAtom::accepting();
    let c = engine.add_atom("c", sink_desc(), Box::new(collector)).unwrap();
    engine.link_primary(a, c, 0, 0).unwrap();
    let a_link = engine.atom_link(a).unwrap();
    engine.add_driver(a_link);

    engine.start().unwrap();
    engine.update(1.0);
    assert_eq!(
        received.lock().len(),
        1,
        "one credit means one packet per tick despite queue room for two"
    );
    engine.update(1.0);
    assert_eq!(received.lock().len(), 2);
    engine.update(1.0);
    engine.update(1.0);
    assert_eq!(received.lock().len(), 4);
    engine.stop();
}

#[test]
fn router_diagnostics_describe_the_wiring() {
    let mut engine = EngineContext::new(EngineConfig::default());
    let a = engine
        .add_atom("a", source_desc(), Box::new(ProducerAtom::with_count(2)))
        .unwrap();
    let (collector, _received) = CollectorAtom::accepting();
    let c = engine.add_atom("c", sink_desc(), Box::new(collector)).unwrap();
    engine.link_primary(a, c, 0, 0).unwrap();
    let a_link = engine.atom_link(a).unwrap();
    engine.add_driver(a_link);

    engine.start().unwrap();
    engine.update(1.0);

    let summary = engine.router().topology_summary();
    assert!(summary.contains("2 ports"));
    assert!(summary.contains("routed: 2"), "summary was: {summary}");
    let status = engine.router().port_status_summary();
    assert!(status.contains("acked=2"), "status was: {status}");
}
