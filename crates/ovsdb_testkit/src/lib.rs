//! # OVSDB Testkit
//!
//! Test utilities for the OVSDB replication engine.
//!
//! This crate provides:
//! - Northbound, southbound and Open vSwitch schema objects
//! - Server fixtures seeded like freshly started databases
//! - Property-based test generators using proptest
//! - Tracing initialisation for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ovsdb_testkit::prelude::*;
//!
//! #[test]
//! fn replicates_switches() {
//!     let server = TestServer::northbound();
//!     let mut filter = server.filter();
//!     filter.register_table("Logical_Switch").unwrap();
//!     let idl = server.connect(filter);
//!     assert!(idl.table("Logical_Switch").unwrap().is_empty());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod schemas;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::schemas;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
