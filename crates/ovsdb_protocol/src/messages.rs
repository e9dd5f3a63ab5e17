//! Protocol messages exchanged between a client and the database server.
//!
//! The exchange is: `GetSchema` (schema handshake), `Monitor` (subscribe to a
//! filtered view, receiving the initial snapshot in the reply), then any
//! number of `Transact` requests. The server pushes `Update` notifications
//! whenever monitored rows change, and may probe liveness with `Echo`.

use crate::operation::{Columns, Operation, OperationResult};
use crate::schema::DatabaseSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Columns of one table a monitor subscribes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSelect {
    /// Column names; empty means every column.
    pub columns: Vec<String>,
}

impl MonitorSelect {
    /// Returns true if `column` is covered by this selection.
    pub fn includes(&self, column: &str) -> bool {
        self.columns.is_empty() || self.columns.iter().any(|c| c == column)
    }
}

/// Monitor-setup request: the tables and columns a client replicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorRequest {
    /// Selections by table name.
    pub tables: BTreeMap<String, MonitorSelect>,
}

impl MonitorRequest {
    /// Creates an empty monitor request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table selection.
    pub fn with_table(mut self, table: impl Into<String>, columns: Vec<String>) -> Self {
        self.tables.insert(table.into(), MonitorSelect { columns });
        self
    }

    /// Returns true if the request covers `table`.
    pub fn includes_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Returns true if the request covers `column` of `table`.
    pub fn includes(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|select| select.includes(column))
    }
}

/// Change to one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowUpdate {
    /// Row present when the monitor was set up (full contents).
    Initial(Columns),
    /// Row inserted (full contents).
    Insert(Columns),
    /// Row modified; carries per-column diffs (see `Datum::diff`).
    Modify(Columns),
    /// Row deleted.
    Delete,
}

impl RowUpdate {
    fn project(&self, select: &MonitorSelect) -> Option<RowUpdate> {
        let keep = |columns: &Columns| -> Columns {
            columns
                .iter()
                .filter(|(name, _)| select.includes(name))
                .map(|(name, datum)| (name.clone(), datum.clone()))
                .collect()
        };
        match self {
            RowUpdate::Initial(columns) => Some(RowUpdate::Initial(keep(columns))),
            RowUpdate::Insert(columns) => Some(RowUpdate::Insert(keep(columns))),
            RowUpdate::Modify(diff) => {
                let diff = keep(diff);
                (!diff.is_empty()).then_some(RowUpdate::Modify(diff))
            }
            RowUpdate::Delete => Some(RowUpdate::Delete),
        }
    }
}

/// Row changes grouped by table, then by row UUID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableUpdates {
    /// Updates by table name.
    pub tables: BTreeMap<String, BTreeMap<Uuid, RowUpdate>>,
}

impl TableUpdates {
    /// Creates an empty update set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an update.
    pub fn push(&mut self, table: impl Into<String>, uuid: Uuid, update: RowUpdate) {
        self.tables.entry(table.into()).or_default().insert(uuid, update);
    }

    /// Returns true if no row changed.
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    /// Returns the number of row updates.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Restricts the updates to what `request` subscribes to. Modifications
    /// that touch no subscribed column disappear.
    pub fn project(&self, request: &MonitorRequest) -> TableUpdates {
        let mut projected = TableUpdates::new();
        for (table, rows) in &self.tables {
            let Some(select) = request.tables.get(table) else {
                continue;
            };
            for (uuid, update) in rows {
                if let Some(update) = update.project(select) {
                    projected.push(table.clone(), *uuid, update);
                }
            }
        }
        projected
    }
}

/// Message sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Requests the schema of `database`.
    GetSchema {
        /// Request id echoed in the reply.
        id: u64,
        /// Database name.
        database: String,
    },
    /// Sets up a monitor.
    Monitor {
        /// Request id echoed in the reply.
        id: u64,
        /// Database name.
        database: String,
        /// Tables and columns to replicate.
        request: MonitorRequest,
    },
    /// Executes a transaction atomically.
    Transact {
        /// Request id echoed in the reply.
        id: u64,
        /// Database name.
        database: String,
        /// Operations in execution order.
        operations: Vec<Operation>,
    },
    /// Liveness probe initiated by the client.
    Echo {
        /// Request id echoed in the reply.
        id: u64,
    },
    /// Answer to a server-initiated [`ServerMessage::Echo`].
    EchoReply {
        /// Id of the probe being answered.
        id: u64,
    },
}

impl ClientMessage {
    /// Returns the message name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::GetSchema { .. } => "get_schema",
            ClientMessage::Monitor { .. } => "monitor",
            ClientMessage::Transact { .. } => "transact",
            ClientMessage::Echo { .. } => "echo",
            ClientMessage::EchoReply { .. } => "echo_reply",
        }
    }
}

/// Message sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Reply to `GetSchema`.
    Schema {
        /// Request id.
        id: u64,
        /// Full database schema.
        schema: DatabaseSchema,
    },
    /// Reply to `Monitor`, carrying the initial snapshot.
    Monitored {
        /// Request id.
        id: u64,
        /// Every monitored row as [`RowUpdate::Initial`].
        initial: TableUpdates,
    },
    /// Reply to `Transact`.
    Transacted {
        /// Request id.
        id: u64,
        /// One result per operation, plus an optional trailing commit error.
        results: Vec<OperationResult>,
    },
    /// Asynchronous notification of monitored changes.
    Update {
        /// The changes.
        updates: TableUpdates,
    },
    /// Request-level failure.
    Error {
        /// Request id.
        id: u64,
        /// Error description.
        error: String,
    },
    /// Liveness probe initiated by the server.
    Echo {
        /// Probe id.
        id: u64,
    },
    /// Answer to a client-initiated [`ClientMessage::Echo`].
    EchoReply {
        /// Id of the probe being answered.
        id: u64,
    },
}

impl ServerMessage {
    /// Returns the id of the client request this message answers.
    pub fn reply_id(&self) -> Option<u64> {
        match self {
            ServerMessage::Schema { id, .. }
            | ServerMessage::Monitored { id, .. }
            | ServerMessage::Transacted { id, .. }
            | ServerMessage::Error { id, .. }
            | ServerMessage::EchoReply { id } => Some(*id),
            ServerMessage::Update { .. } | ServerMessage::Echo { .. } => None,
        }
    }

    /// Returns the message name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::Schema { .. } => "schema",
            ServerMessage::Monitored { .. } => "monitored",
            ServerMessage::Transacted { .. } => "transacted",
            ServerMessage::Update { .. } => "update",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Echo { .. } => "echo",
            ServerMessage::EchoReply { .. } => "echo_reply",
        }
    }
}
