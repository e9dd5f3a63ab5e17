//! The IDL session: connection setup, the event loop and blocking waits.

use crate::config::IdlConfig;
use crate::error::{IdlError, IdlResult};
use crate::filter::SchemaFilter;
use crate::replica::Replica;
use crate::row::{RowRef, TableRef};
use crate::transport::Transport;
use crate::txn::Transaction;
use ovsdb_protocol::{ClientMessage, ServerMessage};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// A replication session with one database server.
///
/// The session owns its transport and its [`Replica`]. The replica changes
/// only inside [`Idl::run`] and the blocking calls built on it, so rows read
/// between those calls form a consistent snapshot.
///
/// ```no_run
/// use ovsdb_idl::{Idl, IdlConfig, SchemaFilter, StreamTransport};
/// # fn schema() -> ovsdb_protocol::DatabaseSchema { unimplemented!() }
///
/// let config = IdlConfig::default();
/// let mut filter = SchemaFilter::new(schema());
/// filter.register_columns("Logical_Switch", ["name"])?;
///
/// let transport = StreamTransport::open("unix:/var/run/ovn/ovnnb_db.sock", &config)?;
/// let idl = Idl::connect(transport, filter, config)?;
/// let found = idl.table("Logical_Switch")?.len();
/// # Ok::<(), ovsdb_idl::IdlError>(())
/// ```
pub struct Idl<T: Transport> {
    config: IdlConfig,
    transport: Option<T>,
    replica: Replica,
    next_id: u64,
    replies: HashMap<u64, ServerMessage>,
    monitor_id: Option<u64>,
    peer: String,
}

impl<T: Transport> Idl<T> {
    /// Opens a session: checks the server schema against `filter`, installs
    /// the monitor and waits for the initial snapshot.
    ///
    /// The wait is bounded by [`IdlConfig::sync_timeout`]. On any failure
    /// the transport is closed before the error is returned.
    pub fn connect(transport: T, filter: SchemaFilter, config: IdlConfig) -> IdlResult<Self> {
        if filter.is_empty() {
            return Err(IdlError::Schema(format!(
                "no tables of {} registered",
                filter.database()
            )));
        }

        let peer = transport.peer();
        let mut idl = Self {
            config,
            transport: Some(transport),
            replica: Replica::new(filter.filtered_schema()),
            next_id: 1,
            replies: HashMap::new(),
            monitor_id: None,
            peer,
        };

        match idl.handshake(&filter) {
            Ok(()) => {
                info!(
                    peer = %idl.peer,
                    database = %filter.database(),
                    tables = idl.replica.schema().tables.len(),
                    rows = idl.replica.row_count(),
                    "replica synchronized"
                );
                Ok(idl)
            }
            Err(e) => {
                warn!(peer = %idl.peer, error = %e, "session setup failed");
                idl.close();
                Err(e)
            }
        }
    }

    fn handshake(&mut self, filter: &SchemaFilter) -> IdlResult<()> {
        if !self.is_connected() {
            return Err(IdlError::connection(format!("{} is not connected", self.peer)));
        }

        let database = filter.database().to_string();
        let id = self.request(|id| ClientMessage::GetSchema {
            id,
            database: database.clone(),
        })?;
        let sync_timeout = self.config.sync_timeout;
        match self.await_reply(id, sync_timeout, "schema handshake")? {
            ServerMessage::Schema { schema, .. } => filter.check_compatible(&schema)?,
            ServerMessage::Error { error, .. } => {
                return Err(IdlError::Schema(format!("{database}: {error}")))
            }
            other => return Err(unexpected(&other)),
        }

        let request = filter.monitor_request();
        let id = self.request(|id| ClientMessage::Monitor {
            id,
            database,
            request,
        })?;
        self.monitor_id = Some(id);

        let seqno = self.replica.change_seqno();
        self.block_on(sync_timeout, "initial sync", |idl| {
            (idl.replica.change_seqno() != seqno).then_some(())
        })
    }

    /// Processes every message already received without blocking.
    ///
    /// Returns true if the replica changed.
    pub fn run(&mut self) -> IdlResult<bool> {
        let seqno = self.replica.change_seqno();
        loop {
            let transport = self.transport.as_mut().ok_or(IdlError::Closed)?;
            let Some(message) = transport.try_recv()? else {
                break;
            };
            self.process(message)?;
        }
        Ok(self.replica.change_seqno() != seqno)
    }

    /// Blocks until a message may be pending or `timeout` elapses.
    ///
    /// Returns true if input is available; call [`Idl::run`] to process it.
    pub fn wait(&mut self, timeout: Duration) -> IdlResult<bool> {
        self.transport
            .as_mut()
            .ok_or(IdlError::Closed)?
            .wait_readable(timeout)
    }

    /// Runs the event loop until the replica changes.
    ///
    /// Fails with [`IdlError::Timeout`] if nothing changes within `timeout`.
    pub fn await_change(&mut self, timeout: Duration) -> IdlResult<()> {
        let seqno = self.replica.change_seqno();
        self.block_on(timeout, "await change", |idl| {
            (idl.replica.change_seqno() != seqno).then_some(())
        })
    }

    /// Sends a liveness probe and waits for the answer, returning the round
    /// trip time.
    pub fn echo(&mut self, timeout: Duration) -> IdlResult<Duration> {
        let start = Instant::now();
        let id = self.request(|id| ClientMessage::Echo { id })?;
        match self.await_reply(id, timeout, "echo")? {
            ServerMessage::EchoReply { .. } => Ok(start.elapsed()),
            other => Err(unexpected(&other)),
        }
    }

    /// Closes the session. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!(peer = %self.peer, error = %e, "error closing transport");
            }
            self.replies.clear();
            debug!(peer = %self.peer, "session closed");
        }
    }

    /// Returns true while the session is open and its transport connected.
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_connected())
    }

    /// Returns the replica.
    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IdlConfig {
        &self.config
    }

    /// Returns the change counter of the replica.
    pub fn change_seqno(&self) -> u64 {
        self.replica.change_seqno()
    }

    /// Returns a view of a replicated table.
    pub fn table(&self, name: &str) -> IdlResult<TableRef<'_>> {
        self.replica.table(name)
    }

    /// Returns the first row of `table` matching `predicate`.
    pub fn find_row(
        &self,
        table: &str,
        predicate: impl FnMut(&RowRef<'_>) -> bool,
    ) -> IdlResult<Option<RowRef<'_>>> {
        self.replica.find_row(table, predicate)
    }

    /// Returns the only row of a singleton table.
    pub fn get_singleton(&self, table: &str) -> IdlResult<RowRef<'_>> {
        self.replica.get_singleton(table)
    }

    /// Starts a transaction against this session's replica.
    pub fn transaction(&self) -> Transaction {
        Transaction::begin(&self.replica)
    }

    pub(crate) fn request(&mut self, build: impl FnOnce(u64) -> ClientMessage) -> IdlResult<u64> {
        let id = self.next_id;
        self.next_id += 1;
        let message = build(id);
        trace!(peer = %self.peer, id, message = message.name(), "sending request");
        self.transport
            .as_mut()
            .ok_or(IdlError::Closed)?
            .send(message)?;
        Ok(id)
    }

    pub(crate) fn await_reply(
        &mut self,
        id: u64,
        timeout: Duration,
        operation: &'static str,
    ) -> IdlResult<ServerMessage> {
        self.block_on(timeout, operation, |idl| idl.replies.remove(&id))
    }

    fn block_on<R>(
        &mut self,
        timeout: Duration,
        operation: &'static str,
        mut ready: impl FnMut(&mut Self) -> Option<R>,
    ) -> IdlResult<R> {
        let start = Instant::now();
        loop {
            self.run()?;
            if let Some(result) = ready(self) {
                return Ok(result);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Err(IdlError::Timeout { operation, elapsed });
            }
            self.wait((timeout - elapsed).min(self.config.poll_interval))?;
        }
    }

    fn process(&mut self, message: ServerMessage) -> IdlResult<()> {
        match message {
            ServerMessage::Update { updates } => {
                debug!(rows = updates.row_count(), "applying update");
                self.replica.apply(&updates);
            }
            ServerMessage::Monitored { id, initial } if self.monitor_id == Some(id) => {
                debug!(rows = initial.row_count(), "loading initial snapshot");
                self.replica.load_snapshot(&initial);
            }
            ServerMessage::Error { id, error } if self.monitor_id == Some(id) => {
                return Err(IdlError::Schema(format!("monitor rejected: {error}")));
            }
            ServerMessage::Echo { id } => {
                trace!(id, "answering echo");
                self.transport
                    .as_mut()
                    .ok_or(IdlError::Closed)?
                    .send(ClientMessage::EchoReply { id })?;
            }
            other => match other.reply_id() {
                Some(id) => {
                    self.replies.insert(id, other);
                }
                None => trace!(message = other.name(), "ignoring message"),
            },
        }
        Ok(())
    }
}

impl<T: Transport> Drop for Idl<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: Transport> std::fmt::Debug for Idl<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Idl")
            .field("peer", &self.peer)
            .field("database", &self.replica.database())
            .field("change_seqno", &self.replica.change_seqno())
            .field("open", &self.transport.is_some())
            .finish()
    }
}

fn unexpected(message: &ServerMessage) -> IdlError {
    IdlError::Server(format!("unexpected {} reply", message.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use ovsdb_protocol::{
        BaseType, Columns, ColumnType, DatabaseSchema, Datum, RowUpdate, TableSchema,
        TableUpdates,
    };
    use uuid::Uuid;

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new("OVN_Southbound", "1.0")
            .with_table(
                TableSchema::new("SB_Global").with_column(
                    "connections",
                    ColumnType::set(BaseType::reference("Connection")),
                ),
            )
            .with_table(
                TableSchema::new("Connection")
                    .non_root()
                    .with_column("target", ColumnType::scalar(BaseType::string())),
            )
    }

    fn filter() -> SchemaFilter {
        let mut filter = SchemaFilter::new(schema());
        filter.register_table("Connection").unwrap();
        filter
    }

    fn config() -> IdlConfig {
        IdlConfig::new()
            .with_sync_timeout(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn connection_row(target: &str) -> Columns {
        let mut row = Columns::new();
        row.insert("target".into(), Datum::scalar(target));
        row
    }

    /// A mock that serves `schema()` and an initial snapshot of `initial`.
    fn serving(initial: TableUpdates) -> MockTransport {
        MockTransport::with_responder(move |message| match message {
            ClientMessage::GetSchema { id, .. } => vec![ServerMessage::Schema {
                id: *id,
                schema: schema(),
            }],
            ClientMessage::Monitor { id, .. } => vec![ServerMessage::Monitored {
                id: *id,
                initial: initial.clone(),
            }],
            _ => vec![],
        })
    }

    #[test]
    fn connect_loads_snapshot() {
        let uuid = Uuid::new_v4();
        let mut initial = TableUpdates::new();
        initial.push(
            "Connection",
            uuid,
            RowUpdate::Initial(connection_row("ptcp:6642")),
        );

        let idl = Idl::connect(serving(initial), filter(), config()).unwrap();
        assert_eq!(idl.change_seqno(), 1);
        let row = idl.replica().row("Connection", uuid).unwrap().unwrap();
        assert_eq!(row.get_str("target").unwrap(), Some("ptcp:6642"));
        assert!(matches!(
            idl.table("SB_Global"),
            Err(IdlError::TableNotReplicated(_))
        ));
    }

    #[test]
    fn monitor_request_carries_filter() {
        let mock = serving(TableUpdates::new());
        let handle = mock.clone();
        let _idl = Idl::connect(mock, filter(), config()).unwrap();

        let sent = handle.sent();
        assert_eq!(sent.len(), 2);
        let ClientMessage::Monitor { request, .. } = &sent[1] else {
            panic!("expected monitor, got {:?}", sent[1]);
        };
        assert!(request.includes_table("Connection"));
        assert!(!request.includes_table("SB_Global"));
    }

    #[test]
    fn silent_server_times_out_and_closes() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        let err = Idl::connect(mock, filter(), config()).unwrap_err();
        assert!(matches!(
            err,
            IdlError::Timeout {
                operation: "schema handshake",
                ..
            }
        ));
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn unknown_database_is_schema_error() {
        let mock = MockTransport::with_responder(|message| match message {
            ClientMessage::GetSchema { id, .. } => vec![ServerMessage::Error {
                id: *id,
                error: "unknown database".into(),
            }],
            _ => vec![],
        });
        let handle = mock.clone();
        assert!(matches!(
            Idl::connect(mock, filter(), config()),
            Err(IdlError::Schema(_))
        ));
        assert_eq!(handle.close_count(), 1);
    }

    #[test]
    fn empty_filter_is_rejected() {
        let err = Idl::connect(
            MockTransport::new(),
            SchemaFilter::new(schema()),
            config(),
        )
        .unwrap_err();
        assert!(matches!(err, IdlError::Schema(_)));
    }

    #[test]
    fn updates_advance_seqno_and_echo_is_answered() {
        let mock = serving(TableUpdates::new());
        let handle = mock.clone();
        let mut idl = Idl::connect(mock, filter(), config()).unwrap();

        assert!(!idl.run().unwrap());

        let uuid = Uuid::new_v4();
        let mut updates = TableUpdates::new();
        updates.push("Connection", uuid, RowUpdate::Insert(connection_row("ptcp:6642")));
        handle.push(ServerMessage::Echo { id: 77 });
        handle.push(ServerMessage::Update { updates });

        idl.await_change(Duration::from_millis(200)).unwrap();
        assert_eq!(idl.change_seqno(), 2);
        assert_eq!(idl.table("Connection").unwrap().len(), 1);
        assert!(handle
            .sent()
            .contains(&ClientMessage::EchoReply { id: 77 }));
    }

    #[test]
    fn await_change_times_out_without_updates() {
        let mut idl = Idl::connect(serving(TableUpdates::new()), filter(), config()).unwrap();
        let err = idl.await_change(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(
            err,
            IdlError::Timeout {
                operation: "await change",
                ..
            }
        ));
        assert_eq!(idl.change_seqno(), 1);
    }

    #[test]
    fn close_is_idempotent_and_blocks_further_use() {
        let mock = serving(TableUpdates::new());
        let handle = mock.clone();
        let mut idl = Idl::connect(mock, filter(), config()).unwrap();

        idl.close();
        idl.close();
        drop(idl);
        assert_eq!(handle.close_count(), 1);

        let mut idl = Idl::connect(serving(TableUpdates::new()), filter(), config()).unwrap();
        idl.close();
        assert!(!idl.is_connected());
        assert!(matches!(idl.run(), Err(IdlError::Closed)));
    }

    #[test]
    fn connection_loss_surfaces_from_run() {
        let mock = serving(TableUpdates::new());
        let handle = mock.clone();
        let mut idl = Idl::connect(mock, filter(), config()).unwrap();
        handle.set_connected(false);
        assert!(matches!(idl.run(), Err(IdlError::Connection { .. })));
    }
}
