// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod atom;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod format;
pub mod fwd_scope;
pub mod ids;
pub mod interface;
pub mod link;
pub mod link_system;
pub mod observability;
pub mod packet;
pub mod realtime;
pub mod router;
pub mod world;

pub use atom::*;
pub use config::*;
pub use container::*;
pub use engine::*;
pub use error::*;
pub use exchange::*;
pub use format::*;
pub use fwd_scope::*;
pub use ids::*;
pub use interface::*;
pub use link::*;
pub use link_system::*;
pub use observability::*;
pub use packet::*;
pub use realtime::*;
pub use router::*;
pub use world::*;
