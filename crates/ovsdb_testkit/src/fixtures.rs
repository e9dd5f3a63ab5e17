//! Server fixtures and replica helpers.
//!
//! A [`TestServer`] wraps an [`OvsdbServer`] seeded the way a freshly
//! started database would be: the southbound and Open vSwitch databases get
//! their singleton rows.

use crate::logging::init_test_logging;
use crate::schemas;
use ovsdb_idl::{ChannelTransport, Idl, IdlConfig, SchemaFilter};
use ovsdb_protocol::{Columns, DatabaseSchema, Datum, Operation, OperationResult};
use ovsdb_server::{OvsdbServer, ServerConfig};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Config with short timeouts so failing tests fail fast.
pub fn test_config() -> IdlConfig {
    IdlConfig::new()
        .with_sync_timeout(Duration::from_secs(5))
        .with_commit_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(20))
}

/// Builds a row from column/value pairs.
pub fn row(pairs: &[(&str, Datum)]) -> Columns {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// An in-process server for one database.
#[derive(Debug, Clone)]
pub struct TestServer {
    server: OvsdbServer,
}

impl TestServer {
    /// Creates an empty server for `schema`.
    pub fn new(schema: DatabaseSchema) -> Self {
        init_test_logging();
        Self {
            server: OvsdbServer::new(schema, ServerConfig::default()),
        }
    }

    /// Northbound server with no rows.
    pub fn northbound() -> Self {
        Self::new(schemas::northbound())
    }

    /// Southbound server holding the `SB_Global` singleton.
    pub fn southbound() -> Self {
        let server = Self::new(schemas::southbound());
        server.insert("SB_Global", Columns::new());
        server
    }

    /// Open vSwitch server holding the `Open_vSwitch` singleton.
    pub fn open_vswitch() -> Self {
        let server = Self::new(schemas::open_vswitch());
        server.insert("Open_vSwitch", Columns::new());
        server
    }

    /// The wrapped server.
    pub fn server(&self) -> &OvsdbServer {
        &self.server
    }

    /// The served schema.
    pub fn schema(&self) -> DatabaseSchema {
        self.server.schema()
    }

    /// A filter over the served schema with nothing registered.
    pub fn filter(&self) -> SchemaFilter {
        SchemaFilter::new(self.schema())
    }

    /// Opens a channel session.
    pub fn transport(&self) -> ChannelTransport {
        let (tx, rx) = self
            .server
            .connect_channel()
            .expect("failed to open channel session");
        ChannelTransport::new(tx, rx).with_peer(format!("channel:{}", self.schema().name))
    }

    /// Connects an IDL through a channel session.
    pub fn connect(&self, filter: SchemaFilter) -> Idl<ChannelTransport> {
        Idl::connect(self.transport(), filter, test_config()).expect("failed to connect")
    }

    /// Inserts a row as another client would and returns its UUID.
    pub fn insert(&self, table: &str, columns: Columns) -> Uuid {
        let outcome = self.server.execute(&[Operation::Insert {
            table: table.to_string(),
            uuid_name: None,
            row: columns,
        }]);
        match outcome.results.as_slice() {
            [OperationResult::Inserted { uuid }] => *uuid,
            other => panic!("insert into {table} failed: {other:?}"),
        }
    }

    /// Executes operations as another client would and asserts success.
    pub fn execute(&self, operations: &[Operation]) -> Vec<OperationResult> {
        let outcome = self.server.execute(operations);
        assert!(outcome.committed(), "transaction failed: {:?}", outcome.results);
        outcome.results
    }

    /// Committed rows of `table`.
    pub fn rows(&self, table: &str) -> BTreeMap<Uuid, Columns> {
        self.server.rows(table)
    }

    /// Committed rows of `table` whose `column` equals `value`.
    pub fn find(&self, table: &str, column: &str, value: &Datum) -> Vec<(Uuid, Columns)> {
        self.rows(table)
            .into_iter()
            .filter(|(_, row)| row.get(column) == Some(value))
            .collect()
    }

    /// Number of transactions the server received.
    pub fn transaction_count(&self) -> u64 {
        self.server.transaction_count()
    }
}

impl std::ops::Deref for TestServer {
    type Target = OvsdbServer;

    fn deref(&self) -> &Self::Target {
        &self.server
    }
}

/// A [`TestServer`] also listening on a unix socket in a temporary
/// directory.
#[cfg(unix)]
#[derive(Debug)]
pub struct SocketServer {
    /// The in-process server.
    pub server: TestServer,
    listener: ovsdb_server::ListenerHandle,
    _dir: tempfile::TempDir,
}

#[cfg(unix)]
impl SocketServer {
    /// Starts listening on `{tempdir}/{socket}`.
    pub fn start(server: TestServer, socket: &str) -> Self {
        let dir = tempfile::TempDir::new().expect("failed to create temp directory");
        let listener = server
            .listen_unix(dir.path().join(socket))
            .expect("failed to listen");
        Self {
            server,
            listener,
            _dir: dir,
        }
    }

    /// Directory holding the socket, usable as an OVN run directory.
    pub fn rundir(&self) -> &std::path::Path {
        self._dir.path()
    }

    /// Remote string clients connect with.
    pub fn remote(&self) -> &str {
        self.listener.remote()
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
