// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Hive - in-process actor runtime
//!
//! Lightweight actors on a managed pool of native worker threads.
//! Actors communicate exclusively by asynchronous messages; within one
//! actor at most one handler runs at a time, across actors handlers run
//! in parallel.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hive::{Framework, FrameworkConfig, YieldStrategy};
//!
//! fn main() -> hive::Result<()> {
//!     let framework = Framework::new(
//!         FrameworkConfig::default().with_yield_strategy(YieldStrategy::Blocking),
//!     )?;
//!
//!     // an actor is opaque state plus typed handlers
//!     let echo = framework.create_actor(())?;
//!     framework.register_handler(echo, |_state: &mut (), value: &u32, ctx| {
//!         let _ = ctx.reply(*value);
//!     })?;
//!
//!     // receivers let ordinary threads join the conversation
//!     let receiver = framework.create_receiver()?;
//!     framework.send(receiver.address(), echo, 42u32)?;
//!     let reply = receiver.wait();
//!     assert_eq!(reply.payload_ref::<u32>(), Some(&42));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                       Framework facade                        |
//! |    create/destroy actors | send | handlers | counters         |
//! +---------------------------------------------------------------+
//! |                          Engine                               |
//! |  mailboxes -> two-tier scheduler -> workers -> dispatcher     |
//! +---------------------------------------------------------------+
//! |                           Core                                |
//! |  paged directories | caching allocator | addresses | locks    |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## Delivery guarantees
//!
//! - Per (sender, receiver) pair: messages arrive in send order.
//! - A successful `send` is handled by the destination or by the
//!   fallback handler, exactly once.
//! - Addresses are generational: after an actor dies, its address never
//!   resolves to a later occupant of the same directory slot.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Framework`] | Owns the scheduler and worker pool; entry point |
//! | [`FrameworkConfig`] | Yield strategy, worker bounds, affinity, quotas |
//! | [`Address`] | Copyable generational handle to an actor or receiver |
//! | [`Receiver`] | Mailbox drained by ordinary threads |
//! | [`Delivery`] | One received message, payload downcast or moved out |

/// Global configuration: compile-time constants and `FrameworkConfig`.
pub mod config;
/// Low-level infrastructure: allocators, slot pools, locks, value types.
pub mod core;
/// Entity directories mapping addresses to actors and receivers.
mod directory;
/// Message engine: envelopes, mailboxes, scheduling, dispatch, workers.
pub mod engine;
/// Crate-level error type.
mod error;
/// Framework facade.
mod framework;
/// External receivers and deliveries.
mod receiver;

pub use crate::core::alloc::{get_allocator, init_allocator, DefaultAllocator, RawAllocator};
pub use crate::core::types::{register_message_name, Address, TypeTag};
pub use config::FrameworkConfig;
pub use directory::HandlerId;
pub use engine::metrics::CounterSnapshot;
pub use engine::policy::YieldStrategy;
pub use error::{Error, Result};
pub use framework::{Framework, HandlerContext, MessageInfo};
pub use receiver::{Delivery, Receiver};
