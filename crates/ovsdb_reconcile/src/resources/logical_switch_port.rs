//! OVN logical switch ports (`Logical_Switch_Port`, referenced from
//! `Logical_Switch.ports`).

use super::{existing_row, LOGICAL_SWITCH, LOGICAL_SWITCH_PORT};
use crate::endpoints::{Endpoint, NORTHBOUND};
use crate::error::{ReconcileError, ReconcileResult};
use crate::handlers::{Prepare, Prepared, Resource, StateHandlers};
use crate::state::LifecycleState;
use ovsdb_idl::{IdlResult, Replica, RowRef, SchemaFilter, Transaction};
use ovsdb_protocol::{Atom, Datum, Uuid};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Port type stored in `Logical_Switch_Port.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortType {
    /// A VM or container port (empty type).
    #[default]
    Normal,
    /// Connection to a logical router.
    Router,
    /// Connection to a physical network.
    Localnet,
    /// Port present on every chassis.
    Localport,
    /// Connection to a physical network through a gateway chassis.
    L2Gateway,
    /// Port on a VTEP gateway.
    Vtep,
}

impl PortType {
    /// Value stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            PortType::Normal => "",
            PortType::Router => "router",
            PortType::Localnet => "localnet",
            PortType::Localport => "localport",
            PortType::L2Gateway => "l2gateway",
            PortType::Vtep => "vtep",
        }
    }
}

impl FromStr for PortType {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" => PortType::Normal,
            "router" => PortType::Router,
            "localnet" => PortType::Localnet,
            "localport" => PortType::Localport,
            "l2gateway" => PortType::L2Gateway,
            "vtep" => PortType::Vtep,
            other => {
                return Err(ReconcileError::invalid_argument(format!(
                    "unsupported port type {other:?}"
                )))
            }
        })
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port of a logical switch, identified by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalSwitchPort {
    /// Port name.
    pub name: String,
    /// Name of the owning switch.
    pub switch: String,
    /// Port type.
    pub port_type: PortType,
    /// Address entries such as `"00:00:00:00:00:01 10.0.0.1"`.
    pub addresses: Vec<String>,
}

impl LogicalSwitchPort {
    /// Creates a port description with the normal type and no addresses.
    pub fn new(name: impl Into<String>, switch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            switch: switch.into(),
            port_type: PortType::Normal,
            addresses: Vec::new(),
        }
    }

    /// Sets the port type.
    pub fn with_type(mut self, port_type: PortType) -> Self {
        self.port_type = port_type;
        self
    }

    /// Sets the addresses.
    pub fn with_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    fn addresses_datum(&self) -> Datum {
        Datum::set(self.addresses.iter().map(String::as_str))
    }

    fn matches(&self, port: &RowRef<'_>) -> IdlResult<bool> {
        let wanted: BTreeSet<Atom> = self.addresses.iter().map(|a| Atom::from(a.as_str())).collect();
        Ok(port.get_str("type")? == Some(self.port_type.as_str())
            && port.get_set("addresses")? == &wanted)
    }
}

/// What a logical switch port change needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPlan {
    /// Insert the port and attach it to `switch`.
    Add {
        /// Owning switch.
        switch: Uuid,
    },
    /// Rewrite the type and addresses of an attached port.
    Reconfigure {
        /// Owning switch.
        switch: Uuid,
        /// The port.
        port: Uuid,
    },
    /// Detach the port from its switch and delete it.
    Remove {
        /// The port.
        port: Uuid,
        /// Switch holding the port, if any.
        switch: Option<Uuid>,
    },
}

fn register_interest(_: &LogicalSwitchPort, filter: &mut SchemaFilter) -> IdlResult<()> {
    filter
        .register_columns(LOGICAL_SWITCH, ["name", "ports"])?
        .register_table(LOGICAL_SWITCH_PORT)?;
    Ok(())
}

fn find_port<'a>(port: &LogicalSwitchPort, replica: &'a Replica) -> ReconcileResult<Option<RowRef<'a>>> {
    Ok(replica
        .table(LOGICAL_SWITCH_PORT)?
        .find_by("name", &Datum::scalar(port.name.as_str()))?)
}

fn prepare_present(port: &LogicalSwitchPort, replica: &Replica) -> ReconcileResult<Prepared<PortPlan>> {
    let switch = replica
        .table(LOGICAL_SWITCH)?
        .find_by("name", &Datum::scalar(port.switch.as_str()))?
        .ok_or_else(|| {
            ReconcileError::precondition(format!("Switch {} does not exist", port.switch))
        })?;

    let Some(existing) = find_port(port, replica)? else {
        return Ok(Prepared::Change(PortPlan::Add {
            switch: switch.uuid(),
        }));
    };
    if !existing.belongs_to(&switch, "ports")? {
        // Moving a port between switches is not supported.
        return Err(ReconcileError::precondition(format!(
            "Can't reassign port {}",
            port.name
        )));
    }
    if port.matches(&existing)? {
        Ok(Prepared::NoChange)
    } else {
        Ok(Prepared::Change(PortPlan::Reconfigure {
            switch: switch.uuid(),
            port: existing.uuid(),
        }))
    }
}

fn prepare_absent(port: &LogicalSwitchPort, replica: &Replica) -> ReconcileResult<Prepared<PortPlan>> {
    let Some(existing) = find_port(port, replica)? else {
        return Ok(Prepared::NoChange);
    };
    let owner = replica
        .table(LOGICAL_SWITCH)?
        .find(|switch| existing.belongs_to(switch, "ports").unwrap_or(false));
    Ok(Prepared::Change(PortPlan::Remove {
        port: existing.uuid(),
        switch: owner.map(|s| s.uuid()),
    }))
}

fn build(
    port: &LogicalSwitchPort,
    plan: &PortPlan,
    replica: &Replica,
    txn: &mut Transaction,
) -> ReconcileResult<()> {
    match *plan {
        PortPlan::Add { switch } => {
            let switch = existing_row(replica, LOGICAL_SWITCH, switch)?;
            let row = txn.insert(LOGICAL_SWITCH_PORT)?;
            txn.set_column(&row, "name", Datum::scalar(port.name.as_str()))?;
            txn.set_column(&row, "type", Datum::scalar(port.port_type.as_str()))?;
            txn.set_column(&row, "addresses", port.addresses_datum())?;
            txn.add_to_set(&switch, "ports", row.uuid())?;
        }
        PortPlan::Reconfigure { port: uuid, .. } => {
            let row = existing_row(replica, LOGICAL_SWITCH_PORT, uuid)?;
            txn.set_column(&row, "type", Datum::scalar(port.port_type.as_str()))?;
            txn.set_column(&row, "addresses", port.addresses_datum())?;
        }
        PortPlan::Remove { port: uuid, switch } => {
            if let Some(switch) = switch {
                let switch = existing_row(replica, LOGICAL_SWITCH, switch)?;
                txn.remove_from_set(&switch, "ports", uuid)?;
            }
            let row = existing_row(replica, LOGICAL_SWITCH_PORT, uuid)?;
            txn.delete(&row)?;
        }
    }
    Ok(())
}

fn failure_message(port: &LogicalSwitchPort, plan: &PortPlan) -> String {
    match plan {
        PortPlan::Add { .. } => format!("Failed to add port {}", port.name),
        PortPlan::Reconfigure { .. } => format!("Failed to update port {}", port.name),
        PortPlan::Remove {
            port: uuid,
            switch: Some(switch),
        } => format!(
            "Failed to delete port {}({uuid}) from {}({switch})",
            port.name, port.switch
        ),
        PortPlan::Remove { port: uuid, switch: None } => {
            format!("Failed to delete port {}({uuid})", port.name)
        }
    }
}

impl Resource for LogicalSwitchPort {
    type Plan = PortPlan;
    const KIND: &'static str = "logical_switch_port";
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

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_idl::{ChannelTransport, Idl};
    use ovsdb_protocol::{Condition, Mutation, Operation};
    use ovsdb_testkit::{row, TestServer};

    fn connect(server: &TestServer) -> Idl<ChannelTransport> {
        let mut filter = server.filter();
        register_interest(&LogicalSwitchPort::new("p", "s"), &mut filter).unwrap();
        server.connect(filter)
    }

    fn attach(server: &TestServer, switch: Uuid, name: &str, addresses: &[&str]) {
        server.execute(&[
            Operation::Insert {
                table: LOGICAL_SWITCH_PORT.into(),
                uuid_name: Some("port".into()),
                row: row(&[
                    ("name", Datum::scalar(name)),
                    ("addresses", Datum::set(addresses.iter().copied())),
                ]),
            },
            Operation::Mutate {
                table: LOGICAL_SWITCH.into(),
                conditions: vec![Condition::uuid_eq(switch)],
                mutations: vec![Mutation::insert(
                    "ports",
                    Datum::Set([Atom::NamedUuid("port".into())].into()),
                )],
            },
        ]);
    }

    #[test]
    fn port_types_parse() {
        assert_eq!("".parse::<PortType>().unwrap(), PortType::Normal);
        assert_eq!("l2gateway".parse::<PortType>().unwrap(), PortType::L2Gateway);
        assert!("patch".parse::<PortType>().is_err());
        assert_eq!(PortType::Localnet.to_string(), "localnet");
    }

    #[test]
    fn missing_switch_is_a_precondition_error() {
        let server = TestServer::northbound();
        let idl = connect(&server);
        let err = prepare_present(&LogicalSwitchPort::new("p1", "sw0"), idl.replica()).unwrap_err();
        assert_eq!(err.to_string(), "Switch sw0 does not exist");
    }

    #[test]
    fn present_plans() {
        let server = TestServer::northbound();
        let sw0 = server.insert(LOGICAL_SWITCH, row(&[("name", Datum::scalar("sw0"))]));
        let sw1 = server.insert(LOGICAL_SWITCH, row(&[("name", Datum::scalar("sw1"))]));
        attach(&server, sw0, "p1", &["00:00:00:00:00:01"]);
        attach(&server, sw1, "p2", &[]);
        let idl = connect(&server);
        let replica = idl.replica();

        let same = LogicalSwitchPort::new("p1", "sw0").with_addresses(["00:00:00:00:00:01"]);
        assert_eq!(prepare_present(&same, replica).unwrap(), Prepared::NoChange);

        let retyped = same.clone().with_type(PortType::Router);
        assert!(matches!(
            prepare_present(&retyped, replica).unwrap(),
            Prepared::Change(PortPlan::Reconfigure { switch, .. }) if switch == sw0
        ));

        let new = LogicalSwitchPort::new("p3", "sw0");
        assert_eq!(
            prepare_present(&new, replica).unwrap(),
            Prepared::Change(PortPlan::Add { switch: sw0 })
        );

        let moved = LogicalSwitchPort::new("p2", "sw0");
        let err = prepare_present(&moved, replica).unwrap_err();
        assert_eq!(err.to_string(), "Can't reassign port p2");
    }

    #[test]
    fn absent_plan_finds_owner() {
        let server = TestServer::northbound();
        let sw0 = server.insert(LOGICAL_SWITCH, row(&[("name", Datum::scalar("sw0"))]));
        attach(&server, sw0, "p1", &[]);
        let idl = connect(&server);

        match prepare_absent(&LogicalSwitchPort::new("p1", "sw0"), idl.replica()).unwrap() {
            Prepared::Change(PortPlan::Remove { switch, .. }) => assert_eq!(switch, Some(sw0)),
            other => panic!("unexpected plan {other:?}"),
        }
        assert_eq!(
            prepare_absent(&LogicalSwitchPort::new("p9", "sw0"), idl.replica()).unwrap(),
            Prepared::NoChange
        );
    }
}
