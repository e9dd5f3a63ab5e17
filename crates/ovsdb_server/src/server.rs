//! Reference server wrapper.

use crate::config::ServerConfig;
use crate::database::{Database, TransactOutcome};
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::listener::{self, ListenerHandle};
use ovsdb_protocol::{ClientMessage, Columns, DatabaseSchema, Operation, ServerMessage, Uuid};
use std::collections::BTreeMap;
#[cfg(unix)]
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// In-process OVSDB-like server for one database.
///
/// Clients reach it over in-memory channels ([`OvsdbServer::connect_channel`])
/// or sockets ([`OvsdbServer::listen_unix`], [`OvsdbServer::listen_tcp`]).
#[derive(Debug, Clone)]
pub struct OvsdbServer {
    handler: RequestHandler,
}

impl OvsdbServer {
    /// Creates a server holding an empty database with `schema`.
    pub fn new(schema: DatabaseSchema, config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config, Database::new(schema)));
        Self {
            handler: RequestHandler::new(context),
        }
    }

    /// Returns the served schema.
    pub fn schema(&self) -> DatabaseSchema {
        self.context().with_database(|db| db.schema().clone())
    }

    /// Returns the handler context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        self.handler.context()
    }

    /// Opens a session reached through in-memory channels.
    ///
    /// The session ends when the returned sender is dropped or the
    /// receiver is no longer read.
    pub fn connect_channel(&self) -> ServerResult<(Sender<ClientMessage>, Receiver<ServerMessage>)> {
        let (request_tx, request_rx) = mpsc::channel::<ClientMessage>();
        let (reply_tx, reply_rx) = mpsc::channel();
        let session = self.handler.open_session(reply_tx)?;
        let handler = self.handler.clone();

        thread::Builder::new()
            .name(format!("ovsdb-session-{session}"))
            .spawn(move || {
                for message in request_rx {
                    if let Err(e) = handler.handle(session, message) {
                        debug!(session, error = %e, "session ended");
                        break;
                    }
                }
                handler.close_session(session);
            })
            .map_err(|e| {
                self.handler.close_session(session);
                ServerError::Internal(format!("failed to spawn session: {e}"))
            })?;
        Ok((request_tx, reply_rx))
    }

    /// Serves clients on a unix socket at `path`.
    #[cfg(unix)]
    pub fn listen_unix(&self, path: impl AsRef<Path>) -> ServerResult<ListenerHandle> {
        listener::listen_unix(
            self.handler.clone(),
            path.as_ref().to_path_buf(),
            self.context().config.accept_poll_interval,
        )
    }

    /// Serves clients on a TCP address such as `127.0.0.1:0`.
    pub fn listen_tcp(&self, addr: &str) -> ServerResult<ListenerHandle> {
        listener::listen_tcp(
            self.handler.clone(),
            addr,
            self.context().config.accept_poll_interval,
        )
    }

    /// Executes a transaction directly, as another client would.
    pub fn execute(&self, operations: &[Operation]) -> TransactOutcome {
        let outcome = self.context().execute(operations);
        if !outcome.committed() {
            warn!(results = ?outcome.results, "direct transaction failed");
        }
        outcome
    }

    /// Makes each of the next `count` transactions fail with `error`.
    pub fn fail_next_transactions(&self, count: usize, error: &str) {
        self.context().inject_failures(count, error);
    }

    /// Number of transaction requests received.
    pub fn transaction_count(&self) -> u64 {
        self.context().transaction_count()
    }

    /// Returns a copy of the rows of `table`.
    pub fn rows(&self, table: &str) -> BTreeMap<Uuid, Columns> {
        self.context()
            .with_database(|db| db.rows(table).cloned().unwrap_or_default())
    }

    /// Sends an echo probe to every session.
    pub fn probe(&self) -> usize {
        self.context().probe()
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.context().session_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::{BaseType, ColumnType, Datum, MonitorRequest, TableSchema};
    use std::time::Duration;

    fn create_server() -> OvsdbServer {
        OvsdbServer::new(
            DatabaseSchema::new("Open_vSwitch", "8.0").with_table(
                TableSchema::new("Open_vSwitch").with_column(
                    "external_ids",
                    ColumnType::map(BaseType::string(), BaseType::string()),
                ),
            ),
            ServerConfig::default(),
        )
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn channel_session_round_trip() {
        let server = create_server();
        let (tx, rx) = server.connect_channel().unwrap();

        tx.send(ClientMessage::Monitor {
            id: 1,
            database: "Open_vSwitch".into(),
            request: MonitorRequest::new().with_table("Open_vSwitch", vec![]),
        })
        .unwrap();
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ServerMessage::Monitored { id: 1, .. }));

        let outcome = server.execute(&[Operation::Insert {
            table: "Open_vSwitch".into(),
            uuid_name: None,
            row: [("external_ids".to_string(), Datum::map([("ovn-remote", "tcp:1.2.3.4:6642")]))]
                .into(),
        }]);
        assert!(outcome.committed());
        assert!(matches!(rx.recv_timeout(WAIT).unwrap(), ServerMessage::Update { .. }));
        assert_eq!(server.rows("Open_vSwitch").len(), 1);
        assert_eq!(server.transaction_count(), 1);
    }

    #[test]
    fn dropping_sender_closes_session() {
        let server = create_server();
        let (tx, _rx) = server.connect_channel().unwrap();
        assert_eq!(server.session_count(), 1);
        drop(tx);
        let deadline = std::time::Instant::now() + WAIT;
        while server.session_count() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.session_count(), 0);
    }

    #[test]
    fn unknown_table_rows_are_empty() {
        let server = create_server();
        assert!(server.rows("Bridge").is_empty());
        assert_eq!(server.schema().name, "Open_vSwitch");
    }
}
