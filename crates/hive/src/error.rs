// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.
//!
//! All synchronous operations report failure through [`Error`]; handler
//! code runs in a context that cannot propagate errors upward, so anything
//! raised inside user callbacks stays the user's responsibility.

use std::fmt;

/// Errors surfaced by framework operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A directory (or per-framework quota) is full.
    CapacityExhausted,
    /// The destination address no longer resolves; the message was routed
    /// to the fallback handler and its storage reclaimed.
    AddressStale,
    /// The allocator returned nothing; the operation left no partial state.
    AllocationFailure,
    /// Rejected framework configuration.
    InvalidConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CapacityExhausted => write!(f, "directory capacity exhausted"),
            Error::AddressStale => write!(f, "destination address is stale"),
            Error::AllocationFailure => write!(f, "allocation failure"),
            Error::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
