//! Southbound database listeners (`Connection`, referenced from
//! `SB_Global.connections`).

use super::{existing_row, CONNECTION, SB_GLOBAL};
use crate::endpoints::{Endpoint, SOUTHBOUND};
use crate::error::ReconcileResult;
use crate::handlers::{Prepare, Prepared, Resource, StateHandlers};
use crate::state::LifecycleState;
use ovsdb_idl::{IdlResult, Replica, SchemaFilter, Transaction};
use ovsdb_protocol::{Datum, Uuid};

/// A connection target such as `ptcp:6642`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbConnection {
    /// Connection target.
    pub target: String,
}

impl SbConnection {
    /// Creates a connection description.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// What a connection change needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPlan {
    /// Insert the connection and attach it to the global row.
    Create {
        /// The `SB_Global` row.
        global: Uuid,
    },
    /// Detach the connection and delete it.
    Remove {
        /// The `SB_Global` row.
        global: Uuid,
        /// The connection.
        connection: Uuid,
    },
}

fn register_interest(_: &SbConnection, filter: &mut SchemaFilter) -> IdlResult<()> {
    filter
        .register_columns(CONNECTION, ["target"])?
        .register_columns(SB_GLOBAL, ["connections"])?;
    Ok(())
}

fn lookup(conn: &SbConnection, replica: &Replica) -> ReconcileResult<(Uuid, Option<Uuid>)> {
    let global = replica.get_singleton(SB_GLOBAL)?;
    let existing = replica
        .table(CONNECTION)?
        .find_by("target", &Datum::scalar(conn.target.as_str()))?;
    Ok((global.uuid(), existing.map(|row| row.uuid())))
}

fn prepare_present(conn: &SbConnection, replica: &Replica) -> ReconcileResult<Prepared<ConnectionPlan>> {
    Ok(match lookup(conn, replica)? {
        (_, Some(_)) => Prepared::NoChange,
        (global, None) => Prepared::Change(ConnectionPlan::Create { global }),
    })
}

fn prepare_absent(conn: &SbConnection, replica: &Replica) -> ReconcileResult<Prepared<ConnectionPlan>> {
    Ok(match lookup(conn, replica)? {
        (global, Some(connection)) => Prepared::Change(ConnectionPlan::Remove { global, connection }),
        (_, None) => Prepared::NoChange,
    })
}

fn build(
    conn: &SbConnection,
    plan: &ConnectionPlan,
    replica: &Replica,
    txn: &mut Transaction,
) -> ReconcileResult<()> {
    match *plan {
        ConnectionPlan::Create { global } => {
            let global = existing_row(replica, SB_GLOBAL, global)?;
            let row = txn.insert(CONNECTION)?;
            txn.set_column(&row, "target", Datum::scalar(conn.target.as_str()))?;
            txn.add_to_set(&global, "connections", row.uuid())?;
        }
        ConnectionPlan::Remove { global, connection } => {
            let global = existing_row(replica, SB_GLOBAL, global)?;
            txn.remove_from_set(&global, "connections", connection)?;
            let row = existing_row(replica, CONNECTION, connection)?;
            txn.delete(&row)?;
        }
    }
    Ok(())
}

fn failure_message(conn: &SbConnection, plan: &ConnectionPlan) -> String {
    match plan {
        ConnectionPlan::Create { .. } => format!("Failed to create connection {}", conn.target),
        ConnectionPlan::Remove { connection, .. } => {
            format!("Failed to delete connection {}({connection})", conn.target)
        }
    }
}

impl Resource for SbConnection {
    type Plan = ConnectionPlan;
    const KIND: &'static str = "sb_connection";
    const ENDPOINT: Endpoint = SOUTHBOUND;

    fn handlers(state: LifecycleState) -> StateHandlers<Self> {
        let prepare: Prepare<Self> = match state {
            LifecycleState::Present => prepare_present,
            LifecycleState::Absent => prepare_absent,
        };
        StateHandlers {
            register_interest,
            prepare,
            build_transaction: build,
            failure_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use ovsdb_idl::IdlError;
    use ovsdb_testkit::TestServer;

    fn filter(server: &TestServer) -> SchemaFilter {
        let mut filter = server.filter();
        register_interest(&SbConnection::new("ptcp:6642"), &mut filter).unwrap();
        filter
    }

    #[test]
    fn create_then_remove_plans() {
        let server = TestServer::southbound();
        let mut idl = server.connect(filter(&server));
        let conn = SbConnection::new("ptcp:6642");

        let plan = match prepare_present(&conn, idl.replica()).unwrap() {
            Prepared::Change(plan) => plan,
            Prepared::NoChange => panic!("connection should be missing"),
        };
        let mut txn = idl.transaction();
        build(&conn, &plan, idl.replica(), &mut txn).unwrap();
        assert!(idl.commit_block(txn).unwrap().changed());

        assert_eq!(prepare_present(&conn, idl.replica()).unwrap(), Prepared::NoChange);
        let global = idl.get_singleton(SB_GLOBAL).unwrap();
        assert_eq!(global.get_set("connections").unwrap().len(), 1);

        match prepare_absent(&conn, idl.replica()).unwrap() {
            Prepared::Change(ConnectionPlan::Remove { connection, .. }) => {
                assert_eq!(
                    failure_message(&conn, &ConnectionPlan::Remove { global: global.uuid(), connection }),
                    format!("Failed to delete connection ptcp:6642({connection})")
                );
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn missing_global_row_is_reported() {
        let server = TestServer::new(ovsdb_testkit::schemas::southbound());
        let idl = server.connect(filter(&server));
        let err = prepare_present(&SbConnection::new("ptcp:6642"), idl.replica()).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Idl(IdlError::SingletonViolation { count: 0, .. })
        ));
    }
}
