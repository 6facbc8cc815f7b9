// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Identifier newtypes for the engine-owned object arenas.
//!
//! Atoms, links and exchange points are owned exclusively by the
//! [`EngineContext`](crate::core::engine::EngineContext); everything else
//! refers to them through these ids and resolves them with an explicit
//! lookup. A stale id fails the lookup instead of dangling.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an atom slot inside the engine arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomId(pub(crate) u32);

/// Identifier of a link slot inside the engine arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub(crate) u32);

/// Identifier of an exchange-point slot inside the engine arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub(crate) u32);

macro_rules! id_impls {
    ($ty:ident, $tag:literal) => {
        impl $ty {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

id_impls!(AtomId, "atom");
id_impls!(LinkId, "link");
id_impls!(ExchangeId, "exchange");
