// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Realtime pacing through the engine: sync pulses fire on schedule while
//! the downstream buffer keeps draining, and a full buffer suppresses
//! rendering without suppressing due pulses.

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
fn sync_pulse_fires_exactly_when_the_period_elapses() {
    let mut engine = EngineContext::new(EngineConfig::default()); // sync_dt = 3.0
    let a = engine
        .add_atom("a", source_desc(), Box::new(ProducerAtom::with_count(64)))
        .unwrap();
    let (collector, _received) = CollectorAtom::accepting();
    let c = engine.add_atom("c", sink_desc(), Box::new(collector)).unwrap();
    engine.link_primary(a, c, 0, 0).unwrap();
    let a_link = engine.atom_link(a).unwrap();
    engine.add_driver(a_link);
    engine.link_mut(a_link).unwrap().cfg_mut().enable_sync = true;

    engine.start().unwrap();

    let mut observed = Vec::new();
    for _ in 0..5 {
        engine.update(1.0);
        let cfg = engine.link(a_link).unwrap().cfg().clone();
        observed.push((cfg.sync, cfg.frames_after_sync, cfg.render));
    }

    assert_eq!(
        observed,
        vec![
            (false, 0, true), // tick 1: age 1.0
            (false, 0, true), // tick 2: age 2.0
            (true, 0, true),  // tick 3: age reaches 3.0, pulse fires
            (false, 1, true), // tick 4
            (false, 2, true), // tick 5
        ]
    );
    engine.stop();
}

#[test]
fn full_downstream_buffer_pauses_rendering_between_pulses() {
    let mut engine = EngineContext::new(EngineConfig::default());
    let a = engine
        .add_atom("a", source_desc(), Box::new(ProducerAtom::with_count(64)))
        .unwrap();
    // Refusing consumer: queues fill and stay full.
    let c = engine
        .add_atom("c", sink_desc(), Box::new(CollectorAtom::refusing()))
        .unwrap();
    engine.link_primary(a, c, 0, 0).unwrap();
    let a_link = engine.atom_link(a).unwrap();
    engine.add_driver(a_link);

    engine.start().unwrap();
    // Fill the producer's own queue (downstream refuses everything).
    engine.update(1.0);
    engine.update(1.0);
    engine.update(1.0);

    // Source queue is now full and no sync is configured: render is off.
    assert!(!engine.link(a_link).unwrap().cfg().render);
    let depth = engine
        .source_container(a_link, 0)
        .unwrap()
        .read()
        .queue_len();
    assert_eq!(depth, 2, "pacing backpressure capped the producer");
    engine.stop();
}
