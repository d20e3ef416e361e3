//! # treesync Testkit
//!
//! Test utilities for treesync.
//!
//! This crate provides:
//! - A blog schema and memory-backed repository fixtures
//! - Snapshot files on disk for tooling tests
//! - Polling helpers for asynchronous reconciliation
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use treesync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn test_with_repository() {
//!     let blog = TestBlog::new();
//!     let post = blog.repository.new_record("post").unwrap();
//!     blog.repository.save(&post).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod wait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::wait::*;
}

pub use fixtures::*;
pub use generators::*;
pub use wait::*;
