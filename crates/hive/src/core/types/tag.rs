// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message type identity.
//!
//! Handler dispatch compares [`TypeTag`]s. An optional global registry
//! lets applications attach a stable name to a message type; when both
//! tags in a comparison carry a registered name, dispatch matches on
//! the names (so distinct Rust types sharing one registered name are
//! the same message type to dispatch). Without registration on both
//! sides, matching falls back to the payload type's runtime identity.
//! Registered names also show up in fallback diagnostics instead of
//! the compiler-generated path from `std::any::type_name`.

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::OnceLock;

/// Identity of a message payload type.
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
    registered: bool,
}

impl TypeTag {
    /// Tag for the payload type `T`.
    pub fn of<T: Any>() -> Self {
        let id = TypeId::of::<T>();
        match registry().get(&id) {
            Some(entry) => Self {
                id,
                name: *entry.value(),
                registered: true,
            },
            None => Self {
                id,
                name: std::any::type_name::<T>(),
                registered: false,
            },
        }
    }

    pub(crate) fn id(self) -> TypeId {
        self.id
    }

    /// Registered name, or the compiler's type path when unregistered.
    pub fn name(self) -> &'static str {
        self.name
    }

    /// Tags match when both carry registered names and the names agree,
    /// or - absent registration on both sides - when they identify the
    /// same payload type.
    pub fn matches(self, other: TypeTag) -> bool {
        if self.registered && other.registered {
            self.name == other.name
        } else {
            self.id == other.id
        }
    }
}

static REGISTRY: OnceLock<DashMap<TypeId, &'static str>> = OnceLock::new();

fn registry() -> &'static DashMap<TypeId, &'static str> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Register a stable name for message type `T`.
///
/// Idempotent for identical names; re-registering a type under a
/// different name keeps the first registration and logs the conflict.
pub fn register_message_name<T: Any>(name: &'static str) {
    let id = TypeId::of::<T>();
    let registry = registry();
    if let Some(existing) = registry.get(&id) {
        if *existing.value() != name {
            log::warn!(
                "[tag] type already registered as '{}', ignoring '{}'",
                existing.value(),
                name
            );
        }
        return;
    }
    registry.insert(id, name);
}
