//! # CatalogDB Testkit
//!
//! Test utilities for CatalogDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - A fault-injecting storage provider for commit atomicity tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catalogdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         let session = db.create_session().unwrap();
//!         session.upsert_entity(&product(1, "phone")).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fault;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fault::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fault::*;
pub use fixtures::*;
pub use generators::*;
