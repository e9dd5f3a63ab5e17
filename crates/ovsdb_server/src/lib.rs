//! # OVSDB Server
//!
//! In-process reference server for the OVSDB-like protocol.
//!
//! This crate provides:
//! - An in-memory database executing transactions atomically
//! - Referential integrity with strong and weak references and garbage
//!   collection of unreferenced non-root rows
//! - Monitors that push committed changes to subscribed sessions
//! - Channel sessions and unix or TCP socket listeners
//! - Fault injection for exercising client retry paths
//!
//! # Architecture
//!
//! One [`HandlerContext`] holds the committed database and the open
//! sessions. Each session has a reply channel; a transaction's updates are
//! queued to every monitoring session before its reply is queued, so a
//! client always observes the change before the commit result.
//!
//! # Transactions
//!
//! A transaction executes its operations in order against a working copy
//! and stops at the first failure. The working copy replaces the committed
//! database only if every operation and every commit check succeeds.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod database;
mod error;
mod handler;
mod listener;
mod server;

pub use config::ServerConfig;
pub use database::{Database, TransactOutcome};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use listener::ListenerHandle;
pub use server::OvsdbServer;
