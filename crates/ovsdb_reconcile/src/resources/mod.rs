//! Entity kinds of the OVN control plane.

mod logical_switch;
mod logical_switch_port;
mod ovn_controller;
mod sb_connection;

pub use logical_switch::{LogicalSwitch, SwitchPlan};
pub use logical_switch_port::{LogicalSwitchPort, PortPlan, PortType};
pub use ovn_controller::{ControllerPlan, OvnController};
pub use sb_connection::{ConnectionPlan, SbConnection};

use crate::error::{ReconcileError, ReconcileResult};
use ovsdb_idl::{Replica, RowRef};
use ovsdb_protocol::Uuid;

pub(crate) const LOGICAL_SWITCH: &str = "Logical_Switch";
pub(crate) const LOGICAL_SWITCH_PORT: &str = "Logical_Switch_Port";
pub(crate) const SB_GLOBAL: &str = "SB_Global";
pub(crate) const CONNECTION: &str = "Connection";
pub(crate) const OPEN_VSWITCH: &str = "Open_vSwitch";

/// Looks up a row `prepare` found in the same replica snapshot.
pub(crate) fn existing_row<'a>(
    replica: &'a Replica,
    table: &str,
    uuid: Uuid,
) -> ReconcileResult<RowRef<'a>> {
    replica.row(table, uuid)?.ok_or_else(|| {
        ReconcileError::precondition(format!("row {uuid} of {table} disappeared"))
    })
}
