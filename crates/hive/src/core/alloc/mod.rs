// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Memory path: the process-wide allocator facade and the per-thread
//! caching layer on top of it.

pub mod cache;
pub mod facade;

pub use cache::CachingAllocator;
pub use facade::{get_allocator, init_allocator, DefaultAllocator, RawAllocator};
