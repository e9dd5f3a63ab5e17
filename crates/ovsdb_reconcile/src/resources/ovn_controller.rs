//! The local OVN controller settings, stored as `ovn-*` keys of
//! `Open_vSwitch.external_ids`.

use super::{existing_row, OPEN_VSWITCH};
use crate::endpoints::{Endpoint, OPEN_VSWITCH as OPEN_VSWITCH_ENDPOINT};
use crate::error::{ReconcileError, ReconcileResult};
use crate::handlers::{Prepare, Prepared, Resource, StateHandlers};
use crate::state::LifecycleState;
use ovsdb_idl::{IdlResult, Replica, SchemaFilter, Transaction};
use ovsdb_protocol::Uuid;
use std::collections::BTreeMap;

const EXTERNAL_IDS: &str = "external_ids";

/// Controller settings. `remote`, `encap_type` and `encap_ip` are required
/// for [`LifecycleState::Present`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OvnController {
    /// Southbound database remote (`ovn-remote`).
    pub remote: Option<String>,
    /// Encapsulation type such as `geneve` (`ovn-encap-type`).
    pub encap_type: Option<String>,
    /// Tunnel endpoint address (`ovn-encap-ip`).
    pub encap_ip: Option<String>,
    /// Physical network to bridge mappings (`ovn-bridge-mappings`).
    pub bridge_mappings: Option<BTreeMap<String, String>>,
}

impl OvnController {
    /// Creates settings with the three required arguments.
    pub fn new(
        remote: impl Into<String>,
        encap_type: impl Into<String>,
        encap_ip: impl Into<String>,
    ) -> Self {
        Self {
            remote: Some(remote.into()),
            encap_type: Some(encap_type.into()),
            encap_ip: Some(encap_ip.into()),
            bridge_mappings: None,
        }
    }

    /// Sets the bridge mappings.
    pub fn with_bridge_mappings<I, K, V>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.bridge_mappings = Some(
            mappings
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// The `external_ids` entries these settings stand for. `None` removes
    /// the key.
    pub fn external_ids(&self) -> [(&'static str, Option<String>); 4] {
        [
            ("ovn-remote", self.remote.clone()),
            ("ovn-encap-type", self.encap_type.clone()),
            ("ovn-encap-ip", self.encap_ip.clone()),
            (
                "ovn-bridge-mappings",
                self.bridge_mappings.as_ref().map(join_mappings),
            ),
        ]
    }

    fn check_required(&self) -> ReconcileResult<()> {
        let required = [
            ("remote", &self.remote),
            ("encap_type", &self.encap_type),
            ("encap_ip", &self.encap_ip),
        ];
        match required.iter().find(|(_, value)| value.is_none()) {
            Some((arg, _)) => Err(ReconcileError::invalid_argument(format!(
                "{arg} is required argument for state 'present'"
            ))),
            None => Ok(()),
        }
    }
}

/// Joins mappings as `physnet:bridge` pairs separated by commas, in key
/// order.
fn join_mappings(mappings: &BTreeMap<String, String>) -> String {
    mappings
        .iter()
        .map(|(net, bridge)| format!("{net}:{bridge}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// What a controller change needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPlan {
    /// Write the settings into the root row.
    Configure {
        /// The `Open_vSwitch` row.
        root: Uuid,
    },
    /// Remove every controller key from the root row.
    Remove {
        /// The `Open_vSwitch` row.
        root: Uuid,
    },
}

fn register_interest(_: &OvnController, filter: &mut SchemaFilter) -> IdlResult<()> {
    filter.register_columns(OPEN_VSWITCH, [EXTERNAL_IDS])?;
    Ok(())
}

fn prepare_present(
    controller: &OvnController,
    replica: &Replica,
) -> ReconcileResult<Prepared<ControllerPlan>> {
    controller.check_required()?;
    let root = replica.get_singleton(OPEN_VSWITCH)?;
    for (key, wanted) in controller.external_ids() {
        if root.map_value(EXTERNAL_IDS, key)? != wanted.as_deref() {
            return Ok(Prepared::Change(ControllerPlan::Configure { root: root.uuid() }));
        }
    }
    Ok(Prepared::NoChange)
}

fn prepare_absent(
    controller: &OvnController,
    replica: &Replica,
) -> ReconcileResult<Prepared<ControllerPlan>> {
    let root = replica.get_singleton(OPEN_VSWITCH)?;
    for (key, _) in controller.external_ids() {
        if root.map_value(EXTERNAL_IDS, key)?.is_some() {
            return Ok(Prepared::Change(ControllerPlan::Remove { root: root.uuid() }));
        }
    }
    Ok(Prepared::NoChange)
}

fn build(
    controller: &OvnController,
    plan: &ControllerPlan,
    replica: &Replica,
    txn: &mut Transaction,
) -> ReconcileResult<()> {
    match *plan {
        ControllerPlan::Configure { root } => {
            let root = existing_row(replica, OPEN_VSWITCH, root)?;
            for (key, value) in controller.external_ids() {
                match value {
                    Some(value) => txn.set_key(&root, EXTERNAL_IDS, key, value)?,
                    None => txn.remove_key(&root, EXTERNAL_IDS, key)?,
                }
            }
        }
        ControllerPlan::Remove { root } => {
            let root = existing_row(replica, OPEN_VSWITCH, root)?;
            for (key, _) in controller.external_ids() {
                if root.map_value(EXTERNAL_IDS, key)?.is_some() {
                    txn.remove_key(&root, EXTERNAL_IDS, key)?;
                }
            }
        }
    }
    Ok(())
}

fn failure_message(_: &OvnController, plan: &ControllerPlan) -> String {
    match plan {
        ControllerPlan::Configure { .. } => "Failed to setup OVN controller".to_string(),
        ControllerPlan::Remove { .. } => "Failed to remove OVN controller".to_string(),
    }
}

impl Resource for OvnController {
    type Plan = ControllerPlan;
    const KIND: &'static str = "ovn_controller";
    const ENDPOINT: Endpoint = OPEN_VSWITCH_ENDPOINT;

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
    use ovsdb_protocol::Datum;
    use ovsdb_testkit::{row, TestServer};

    fn server_with(external_ids: &[(&str, &str)]) -> TestServer {
        let server = TestServer::new(ovsdb_testkit::schemas::open_vswitch());
        server.insert(
            OPEN_VSWITCH,
            row(&[(EXTERNAL_IDS, Datum::map(external_ids.iter().copied()))]),
        );
        server
    }

    fn controller() -> OvnController {
        OvnController::new("tcp:10.0.0.1:6642", "geneve", "10.0.0.2")
    }

    #[test]
    fn missing_required_argument() {
        let server = server_with(&[]);
        let mut filter = server.filter();
        register_interest(&controller(), &mut filter).unwrap();
        let idl = server.connect(filter);

        let partial = OvnController {
            encap_type: None,
            ..controller()
        };
        let err = prepare_present(&partial, idl.replica()).unwrap_err();
        assert_eq!(err.to_string(), "encap_type is required argument for state 'present'");
        assert!(err.is_client_error());
    }

    #[test]
    fn mappings_join_in_key_order() {
        let c = controller().with_bridge_mappings([("physnet2", "br-b"), ("physnet1", "br-a")]);
        let ids = c.external_ids();
        assert_eq!(ids[3].1.as_deref(), Some("physnet1:br-a,physnet2:br-b"));
        assert_eq!(controller().external_ids()[3].1, None);
    }

    #[test]
    fn plans_compare_every_key() {
        let configured = server_with(&[
            ("ovn-remote", "tcp:10.0.0.1:6642"),
            ("ovn-encap-type", "geneve"),
            ("ovn-encap-ip", "10.0.0.2"),
            ("system-id", "host-1"),
        ]);
        let mut filter = configured.filter();
        register_interest(&controller(), &mut filter).unwrap();
        let idl = configured.connect(filter);
        let replica = idl.replica();

        assert_eq!(prepare_present(&controller(), replica).unwrap(), Prepared::NoChange);
        let with_mappings = controller().with_bridge_mappings([("physnet1", "br-ex")]);
        assert!(prepare_present(&with_mappings, replica).unwrap().is_change());
        assert!(matches!(
            prepare_absent(&controller(), replica).unwrap(),
            Prepared::Change(ControllerPlan::Remove { .. })
        ));

        let bare = server_with(&[("system-id", "host-1")]);
        let mut filter = bare.filter();
        register_interest(&controller(), &mut filter).unwrap();
        let idl = bare.connect(filter);
        assert_eq!(
            prepare_absent(&OvnController::default(), idl.replica()).unwrap(),
            Prepared::NoChange
        );
    }
}
