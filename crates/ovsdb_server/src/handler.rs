//! Request handling shared by every session.

use crate::config::ServerConfig;
use crate::database::{Database, TransactOutcome};
use crate::error::{ServerError, ServerResult};
use ovsdb_protocol::{
    errors, ClientMessage, MonitorRequest, Operation, OperationResult, ServerMessage,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// State shared by all sessions of one server.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Committed database contents.
    database: Mutex<Database>,
    /// Open sessions (session id -> session).
    sessions: Mutex<HashMap<u64, Session>>,
    /// Errors returned by the next transactions instead of executing them.
    faults: Mutex<VecDeque<String>>,
    next_session: AtomicU64,
    next_probe: AtomicU64,
    transactions: AtomicU64,
}

struct Session {
    sender: Sender<ServerMessage>,
    monitor: Option<MonitorRequest>,
}

impl HandlerContext {
    /// Creates a context serving `database`.
    pub fn new(config: ServerConfig, database: Database) -> Self {
        Self {
            config,
            database: Mutex::new(database),
            sessions: Mutex::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            next_session: AtomicU64::new(1),
            next_probe: AtomicU64::new(1),
            transactions: AtomicU64::new(0),
        }
    }

    /// Runs `f` with the committed database.
    pub fn with_database<R>(&self, f: impl FnOnce(&Database) -> R) -> R {
        f(&self.database.lock())
    }

    /// Number of transaction requests received, including failed ones.
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Makes each of the next `count` transactions fail with `error`
    /// without touching the database.
    pub fn inject_failures(&self, count: usize, error: &str) {
        let mut faults = self.faults.lock();
        faults.extend(std::iter::repeat(error.to_string()).take(count));
    }

    /// Executes a transaction and notifies monitoring sessions.
    ///
    /// Updates are queued to every session before this returns, so a
    /// client that reads its reply afterwards has already received the
    /// matching update.
    pub fn execute(&self, operations: &[Operation]) -> TransactOutcome {
        self.transactions.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self.faults.lock().pop_front() {
            debug!(%error, "injected transaction failure");
            return TransactOutcome {
                results: vec![OperationResult::error(error, "injected failure")],
                updates: Default::default(),
            };
        }

        let mut database = self.database.lock();
        let outcome = database.transact(operations);
        if outcome.committed() && !outcome.updates.is_empty() {
            let mut sessions = self.sessions.lock();
            let mut gone = Vec::new();
            for (id, session) in sessions.iter() {
                let Some(monitor) = &session.monitor else {
                    continue;
                };
                let updates = outcome.updates.project(monitor);
                if updates.is_empty() {
                    continue;
                }
                if session.sender.send(ServerMessage::Update { updates }).is_err() {
                    gone.push(*id);
                }
            }
            for id in gone {
                debug!(session = id, "dropping disconnected session");
                sessions.remove(&id);
            }
        }
        outcome
    }

    /// Sends an echo probe to every session. Returns the number of
    /// sessions probed.
    pub fn probe(&self) -> usize {
        let sessions = self.sessions.lock();
        sessions
            .values()
            .filter(|session| {
                let id = self.next_probe.fetch_add(1, Ordering::SeqCst);
                session.sender.send(ServerMessage::Echo { id }).is_ok()
            })
            .count()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("sessions", &self.session_count())
            .field("transactions", &self.transaction_count())
            .finish_non_exhaustive()
    }
}

/// Handler for client requests.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Registers a session whose replies go to `sender`.
    pub fn open_session(&self, sender: Sender<ServerMessage>) -> ServerResult<u64> {
        let mut sessions = self.context.sessions.lock();
        if sessions.len() >= self.context.config.max_sessions {
            warn!(limit = self.context.config.max_sessions, "session limit reached");
            return Err(ServerError::InvalidRequest("too many sessions".into()));
        }
        let id = self.context.next_session.fetch_add(1, Ordering::SeqCst);
        sessions.insert(
            id,
            Session {
                sender,
                monitor: None,
            },
        );
        info!(session = id, "session opened");
        Ok(id)
    }

    /// Forgets a session.
    pub fn close_session(&self, session: u64) {
        if self.context.sessions.lock().remove(&session).is_some() {
            info!(session, "session closed");
        }
    }

    /// Handles one client message, sending any reply to the session.
    pub fn handle(&self, session: u64, message: ClientMessage) -> ServerResult<()> {
        trace!(session, message = message.name(), "request");
        let reply = match message {
            ClientMessage::GetSchema { id, database } => {
                match self.check_database(&database) {
                    Ok(()) => ServerMessage::Schema {
                        id,
                        schema: self.context.with_database(|db| db.schema().clone()),
                    },
                    Err(e) => error_reply(id, &e),
                }
            }
            ClientMessage::Monitor {
                id,
                database,
                request,
            } => return self.handle_monitor(session, id, &database, request),
            ClientMessage::Transact {
                id,
                database,
                operations,
            } => match self.check_transact(&database, &operations) {
                Ok(()) => ServerMessage::Transacted {
                    id,
                    results: self.context.execute(&operations).results,
                },
                Err(e) => error_reply(id, &e),
            },
            ClientMessage::Echo { id } => ServerMessage::EchoReply { id },
            ClientMessage::EchoReply { id } => {
                trace!(session, probe = id, "echo answered");
                return Ok(());
            }
        };
        self.send(session, reply)
    }

    fn handle_monitor(
        &self,
        session: u64,
        id: u64,
        database: &str,
        request: MonitorRequest,
    ) -> ServerResult<()> {
        if let Err(e) = self.check_database(database) {
            return self.send(session, error_reply(id, &e));
        }

        // The snapshot and the registration happen under the database lock
        // so no committed change falls between them.
        let db = self.context.database.lock();
        if let Err(message) = db.validate_monitor(&request) {
            drop(db);
            return self.send(session, ServerMessage::Error { id, error: message });
        }
        let initial = db.snapshot(&request);
        let mut sessions = self.context.sessions.lock();
        let entry = sessions
            .get_mut(&session)
            .ok_or(ServerError::UnknownSession(session))?;
        debug!(session, tables = request.tables.len(), rows = initial.row_count(), "monitor registered");
        entry.monitor = Some(request);
        entry
            .sender
            .send(ServerMessage::Monitored { id, initial })
            .map_err(|_| ServerError::UnknownSession(session))
    }

    fn check_database(&self, database: &str) -> ServerResult<()> {
        let served = self.context.with_database(|db| db.schema().name == database);
        if served {
            Ok(())
        } else {
            Err(ServerError::UnknownDatabase(database.to_string()))
        }
    }

    fn check_transact(&self, database: &str, operations: &[Operation]) -> ServerResult<()> {
        self.check_database(database)?;
        let limit = self.context.config.max_operations;
        if operations.len() > limit {
            return Err(ServerError::InvalidRequest(format!(
                "{} operations exceed the limit of {limit}",
                operations.len()
            )));
        }
        Ok(())
    }

    fn send(&self, session: u64, message: ServerMessage) -> ServerResult<()> {
        let sessions = self.context.sessions.lock();
        let entry = sessions
            .get(&session)
            .ok_or(ServerError::UnknownSession(session))?;
        entry
            .sender
            .send(message)
            .map_err(|_| ServerError::UnknownSession(session))
    }
}

fn error_reply(id: u64, error: &ServerError) -> ServerMessage {
    let error = match error {
        ServerError::UnknownDatabase(name) => format!("{}: {name}", errors::UNKNOWN_DATABASE),
        other => other.to_string(),
    };
    ServerMessage::Error { id, error }
}
