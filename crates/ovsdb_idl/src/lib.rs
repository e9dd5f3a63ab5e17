//! # OVSDB IDL
//!
//! Client-side replication and transaction engine for OVSDB-like servers.
//!
//! This crate provides:
//! - Schema filter declaring which tables and columns to replicate
//! - Replica cache kept current by server update notifications
//! - Read-only table and row views
//! - Transaction builder with local validation and temporary row UUIDs
//! - Blocking commit with outcome classification
//! - Transport abstraction with channel, socket and mock implementations
//!
//! ## Architecture
//!
//! An [`Idl`] session owns a [`Transport`] and a [`Replica`]. Nothing
//! changes the replica except the session's own event loop
//! ([`Idl::run`], [`Idl::await_change`], [`Idl::commit_block`]), so reads
//! between those calls see one consistent snapshot.
//!
//! ## Key Invariants
//!
//! - The replica only ever holds registered tables and columns
//! - The change counter moves once per applied server update
//! - A transaction never mutates the replica; changes appear only once the
//!   server echoes them back
//! - Every blocking wait is bounded by a timeout

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commit;
mod config;
mod error;
mod filter;
mod idl;
mod replica;
mod row;
mod stream;
mod transport;
mod txn;

pub use commit::{CommitError, CommitReport, Outcome};
pub use config::IdlConfig;
pub use error::{IdlError, IdlResult, RejectReason};
pub use filter::SchemaFilter;
pub use idl::Idl;
pub use replica::Replica;
pub use row::{RowRef, TableRef};
pub use stream::{Remote, StreamTransport};
pub use transport::{ChannelPeer, ChannelTransport, MockTransport, Transport};
pub use txn::{RowHandle, RowTarget, Transaction};
