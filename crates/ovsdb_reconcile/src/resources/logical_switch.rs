//! OVN logical switches (`Logical_Switch` in the northbound database).

use super::{existing_row, LOGICAL_SWITCH};
use crate::endpoints::{Endpoint, NORTHBOUND};
use crate::error::ReconcileResult;
use crate::handlers::{Prepare, Prepared, Resource, StateHandlers};
use crate::state::LifecycleState;
use ovsdb_idl::{IdlResult, Replica, SchemaFilter, Transaction};
use ovsdb_protocol::{Datum, Uuid};

/// A logical switch identified by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalSwitch {
    /// Switch name.
    pub name: String,
}

impl LogicalSwitch {
    /// Creates a switch description.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn find(&self, replica: &Replica) -> ReconcileResult<Option<Uuid>> {
        let table = replica.table(LOGICAL_SWITCH)?;
        let row = table.find_by("name", &Datum::scalar(self.name.as_str()))?;
        Ok(row.map(|r| r.uuid()))
    }
}

/// What a logical switch change needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPlan {
    /// Insert a new switch.
    Create,
    /// Delete the switch with this UUID.
    Delete(Uuid),
}

fn register_interest(_: &LogicalSwitch, filter: &mut SchemaFilter) -> IdlResult<()> {
    filter.register_columns(LOGICAL_SWITCH, ["name"])?;
    Ok(())
}

fn prepare_present(switch: &LogicalSwitch, replica: &Replica) -> ReconcileResult<Prepared<SwitchPlan>> {
    Ok(match switch.find(replica)? {
        Some(_) => Prepared::NoChange,
        None => Prepared::Change(SwitchPlan::Create),
    })
}

fn prepare_absent(switch: &LogicalSwitch, replica: &Replica) -> ReconcileResult<Prepared<SwitchPlan>> {
    Ok(match switch.find(replica)? {
        Some(uuid) => Prepared::Change(SwitchPlan::Delete(uuid)),
        None => Prepared::NoChange,
    })
}

fn build(
    switch: &LogicalSwitch,
    plan: &SwitchPlan,
    replica: &Replica,
    txn: &mut Transaction,
) -> ReconcileResult<()> {
    match plan {
        SwitchPlan::Create => {
            let row = txn.insert(LOGICAL_SWITCH)?;
            txn.set_column(&row, "name", Datum::scalar(switch.name.as_str()))?;
        }
        SwitchPlan::Delete(uuid) => {
            let row = existing_row(replica, LOGICAL_SWITCH, *uuid)?;
            txn.delete(&row)?;
        }
    }
    Ok(())
}

fn failure_message(switch: &LogicalSwitch, plan: &SwitchPlan) -> String {
    match plan {
        SwitchPlan::Create => format!("Failed to create logical switch {}", switch.name),
        SwitchPlan::Delete(uuid) => {
            format!("Failed to delete logical switch {}({uuid})", switch.name)
        }
    }
}

impl Resource for LogicalSwitch {
    type Plan = SwitchPlan;
    const KIND: &'static str = "logical_switch";
    const ENDPOINT: Endpoint = NORTHBOUND;

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
