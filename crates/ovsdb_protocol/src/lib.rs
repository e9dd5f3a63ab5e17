//! # OVSDB Protocol
//!
//! Protocol types shared by the replication engine and the reference server.
//!
//! This crate provides:
//! - `Atom` / `Datum` column values with incremental diffs
//! - The pre-parsed schema model (`DatabaseSchema`, `TableSchema`, ...)
//! - Monitor requests and `TableUpdates` notifications
//! - Transaction operations and results
//! - Length-prefixed CBOR framing for stream transports
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod messages;
mod operation;
mod schema;
mod value;

pub use codec::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ClientMessage, MonitorRequest, MonitorSelect, RowUpdate, ServerMessage, TableUpdates,
};
pub use operation::{
    errors, Columns, Condition, Function, Mutation, Mutator, Operation, OperationResult,
};
pub use schema::{BaseType, ColumnSchema, ColumnType, DatabaseSchema, RefType, TableSchema, UUID_COLUMN};
pub use value::{Atom, AtomType, Datum};

pub use uuid::Uuid;
