//! # Offlink Testkit
//!
//! Test utilities for Offlink.
//!
//! This crate provides:
//! - Recording and mock adapters
//! - A recording cache client
//! - Feature tag-map fixtures and a fully wired `TestCore`
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offlink_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn queued_write_is_replayed() {
//!     let t = TestCore::new();
//!     t.go_offline();
//!     // ... mutate through t.transport()
//!     t.go_online().await;
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapters;
pub mod cache;
pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapters::*;
    pub use crate::cache::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use adapters::*;
pub use cache::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
