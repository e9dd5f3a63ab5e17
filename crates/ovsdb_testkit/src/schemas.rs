//! Schema objects for the OVN and Open vSwitch databases.
//!
//! These carry the tables and columns the reconciliation layer touches plus
//! a few neighbours, which is enough to exercise filtering and referential
//! integrity.

use ovsdb_protocol::{BaseType, ColumnType, DatabaseSchema, TableSchema};

/// Name of the OVN northbound database.
pub const NORTHBOUND: &str = "OVN_Northbound";
/// Name of the OVN southbound database.
pub const SOUTHBOUND: &str = "OVN_Southbound";
/// Name of the Open vSwitch database.
pub const OPEN_VSWITCH: &str = "Open_vSwitch";

fn string_map() -> ColumnType {
    ColumnType::map(BaseType::string(), BaseType::string())
}

/// OVN northbound schema.
pub fn northbound() -> DatabaseSchema {
    DatabaseSchema::new(NORTHBOUND, "7.3.0")
        .with_table(
            TableSchema::new("NB_Global")
                .with_column("name", ColumnType::scalar(BaseType::string()))
                .with_column("nb_cfg", ColumnType::scalar(BaseType::integer()))
                .with_column("external_ids", string_map()),
        )
        .with_table(
            TableSchema::new("Logical_Switch")
                .with_column("name", ColumnType::scalar(BaseType::string()))
                .with_column(
                    "ports",
                    ColumnType::set(BaseType::reference("Logical_Switch_Port")),
                )
                .with_column("other_config", string_map())
                .with_column("external_ids", string_map()),
        )
        .with_table(
            TableSchema::new("Logical_Switch_Port")
                .non_root()
                .with_column("name", ColumnType::scalar(BaseType::string()))
                .with_column("type", ColumnType::scalar(BaseType::string()))
                .with_column("addresses", ColumnType::set(BaseType::string()))
                .with_column("port_security", ColumnType::set(BaseType::string()))
                .with_column("enabled", ColumnType::optional(BaseType::boolean()))
                .with_column("up", ColumnType::optional(BaseType::boolean()))
                .with_column("options", string_map())
                .with_column("external_ids", string_map()),
        )
        .with_table(
            TableSchema::new("Logical_Router")
                .with_column("name", ColumnType::scalar(BaseType::string()))
                .with_column("enabled", ColumnType::optional(BaseType::boolean()))
                .with_column("external_ids", string_map()),
        )
}

/// OVN southbound schema.
pub fn southbound() -> DatabaseSchema {
    DatabaseSchema::new(SOUTHBOUND, "20.33.0")
        .with_table(
            TableSchema::new("SB_Global")
                .with_column("nb_cfg", ColumnType::scalar(BaseType::integer()))
                .with_column(
                    "connections",
                    ColumnType::set(BaseType::reference("Connection")),
                )
                .with_column("options", string_map())
                .with_column("external_ids", string_map()),
        )
        .with_table(
            TableSchema::new("Connection")
                .non_root()
                .with_column("target", ColumnType::scalar(BaseType::string()))
                .with_column("max_backoff", ColumnType::optional(BaseType::integer()))
                .with_column(
                    "inactivity_probe",
                    ColumnType::optional(BaseType::integer()),
                )
                .with_column("is_connected", ColumnType::scalar(BaseType::boolean()))
                .with_column("other_config", string_map())
                .with_column("external_ids", string_map()),
        )
        .with_table(
            TableSchema::new("Chassis")
                .with_column("name", ColumnType::scalar(BaseType::string()))
                .with_column("hostname", ColumnType::scalar(BaseType::string()))
                .with_column("external_ids", string_map()),
        )
}

/// Open vSwitch schema.
pub fn open_vswitch() -> DatabaseSchema {
    DatabaseSchema::new(OPEN_VSWITCH, "8.3.0")
        .with_table(
            TableSchema::new("Open_vSwitch")
                .with_column("bridges", ColumnType::set(BaseType::reference("Bridge")))
                .with_column("ovs_version", ColumnType::optional(BaseType::string()))
                .with_column("other_config", string_map())
                .with_column("external_ids", string_map()),
        )
        .with_table(
            TableSchema::new("Bridge")
                .non_root()
                .with_immutable_column("name", ColumnType::scalar(BaseType::string()))
                .with_column("external_ids", string_map()),
        )
}
