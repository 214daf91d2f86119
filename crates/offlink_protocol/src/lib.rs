//! # Offlink Protocol
//!
//! Data types shared by every layer of the Offlink transport core.
//!
//! This crate provides:
//! - `Operation`, the closed registry of remote actions
//! - `Tag` and `TransportRequestMeta` for per-call metadata
//! - `QueuedMutation`, the unit of offline work
//! - `CacheKey` and the key factory helpers
//! - `NormalizedError`, the single error shape crossing the transport boundary
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Library code propagates errors instead of panicking
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod error;
mod keys;
mod meta;
mod mutation;
mod operation;

pub use error::{normalize_error, ErrorCode, NormalizedError, RawError};
pub use keys::{by_id_key, infinite_key, list_key, CacheKey};
pub use meta::{Tag, TransportRequestMeta};
pub use mutation::{now_millis, QueuedMutation};
pub use operation::{Operation, UnknownOperation};
