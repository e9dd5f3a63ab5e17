//! Replication interest: which tables and columns a session mirrors.
//!
//! A [`SchemaFilter`] starts empty. Registering a table means "all its
//! columns"; registering columns narrows a table to those columns. Repeated
//! registrations merge, and a whole-table registration always wins. The
//! filter is consumed by [`Idl::connect`](crate::Idl::connect), so interest
//! cannot change once a session exists.

use crate::error::{IdlError, IdlResult};
use ovsdb_protocol::{DatabaseSchema, MonitorRequest};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Interest {
    All,
    Columns(BTreeSet<String>),
}

/// Declared replication interest over a database schema.
#[derive(Debug, Clone)]
pub struct SchemaFilter {
    schema: DatabaseSchema,
    interest: BTreeMap<String, Interest>,
}

impl SchemaFilter {
    /// Creates a filter with no interest over `schema`.
    pub fn new(schema: DatabaseSchema) -> Self {
        Self {
            schema,
            interest: BTreeMap::new(),
        }
    }

    /// Registers every column of `table`.
    pub fn register_table(&mut self, table: &str) -> IdlResult<&mut Self> {
        self.check_table(table)?;
        self.interest.insert(table.to_string(), Interest::All);
        Ok(self)
    }

    /// Registers the listed columns of `table`. An empty list registers the
    /// whole table.
    pub fn register_columns<I, S>(&mut self, table: &str, columns: I) -> IdlResult<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table_schema = self.check_table(table)?;
        let mut requested = BTreeSet::new();
        for column in columns {
            let column = column.as_ref();
            if table_schema.column(column).is_none() {
                return Err(IdlError::Schema(format!(
                    "table {table} has no column {column}"
                )));
            }
            requested.insert(column.to_string());
        }

        if requested.is_empty() {
            return self.register_table(table);
        }

        match self.interest.get_mut(table) {
            Some(Interest::All) => {}
            Some(Interest::Columns(existing)) => existing.extend(requested),
            None => {
                self.interest
                    .insert(table.to_string(), Interest::Columns(requested));
            }
        }
        Ok(self)
    }

    fn check_table(&self, table: &str) -> IdlResult<&ovsdb_protocol::TableSchema> {
        self.schema.table(table).ok_or_else(|| {
            IdlError::Schema(format!(
                "database {} has no table {table}",
                self.schema.name
            ))
        })
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.schema.name
    }

    /// Returns the full local schema.
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.interest.is_empty()
    }

    /// Returns true if `table` is registered.
    pub fn includes_table(&self, table: &str) -> bool {
        self.interest.contains_key(table)
    }

    /// Returns true if `column` of `table` is registered.
    pub fn includes_column(&self, table: &str, column: &str) -> bool {
        match self.interest.get(table) {
            Some(Interest::All) => self.schema.column(table, column).is_some(),
            Some(Interest::Columns(columns)) => columns.contains(column),
            None => false,
        }
    }

    /// Returns the registered column names of `table`.
    pub fn columns(&self, table: &str) -> Option<BTreeSet<String>> {
        match self.interest.get(table)? {
            Interest::All => self
                .schema
                .table(table)
                .map(|t| t.columns.keys().cloned().collect()),
            Interest::Columns(columns) => Some(columns.clone()),
        }
    }

    /// Builds the monitor request for this interest. Whole-table interest
    /// is spelled out as the local schema's columns.
    pub fn monitor_request(&self) -> MonitorRequest {
        self.interest
            .keys()
            .fold(MonitorRequest::new(), |request, table| {
                let columns = self
                    .columns(table)
                    .map(|c| c.into_iter().collect())
                    .unwrap_or_default();
                request.with_table(table.clone(), columns)
            })
    }

    /// Returns the schema restricted to the registered tables and columns.
    pub fn filtered_schema(&self) -> DatabaseSchema {
        let mut filtered = DatabaseSchema::new(&self.schema.name, &self.schema.version);
        for table in self.interest.keys() {
            if let Some(table_schema) = self.schema.table(table) {
                let columns = self.columns(table);
                filtered = filtered.with_table(table_schema.restricted(columns.as_ref()));
            }
        }
        filtered
    }

    /// Checks that `remote` serves every registered table and column with
    /// the same types as the local schema.
    pub fn check_compatible(&self, remote: &DatabaseSchema) -> IdlResult<()> {
        if remote.name != self.schema.name {
            return Err(IdlError::Schema(format!(
                "server offered database {} instead of {}",
                remote.name, self.schema.name
            )));
        }
        for table in self.interest.keys() {
            let remote_table = remote.table(table).ok_or_else(|| {
                IdlError::Schema(format!("server database {} has no table {table}", remote.name))
            })?;
            for column in self.columns(table).unwrap_or_default() {
                let Some(local) = self.schema.column(table, &column) else {
                    continue;
                };
                match remote_table.column(&column) {
                    Some(served) if served.column_type == local.column_type => {}
                    Some(_) => {
                        return Err(IdlError::Schema(format!(
                            "column {column} of table {table} has a different type on the server"
                        )))
                    }
                    None => {
                        return Err(IdlError::Schema(format!(
                            "server table {table} has no column {column}"
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::{BaseType, ColumnType, TableSchema};

    fn schema() -> DatabaseSchema {
        DatabaseSchema::new("OVN_Northbound", "1.0")
            .with_table(
                TableSchema::new("Logical_Switch")
                    .with_column("name", ColumnType::scalar(BaseType::string()))
                    .with_column(
                        "ports",
                        ColumnType::set(BaseType::reference("Logical_Switch_Port")),
                    )
                    .with_column(
                        "other_config",
                        ColumnType::map(BaseType::string(), BaseType::string()),
                    ),
            )
            .with_table(
                TableSchema::new("Logical_Switch_Port")
                    .non_root()
                    .with_column("name", ColumnType::scalar(BaseType::string()))
                    .with_column("type", ColumnType::scalar(BaseType::string())),
            )
            .with_table(
                TableSchema::new("ACL")
                    .with_column("priority", ColumnType::scalar(BaseType::integer())),
            )
    }

    #[test]
    fn unknown_table_or_column_is_schema_error() {
        let mut filter = SchemaFilter::new(schema());
        assert!(matches!(
            filter.register_table("Nope"),
            Err(IdlError::Schema(_))
        ));
        assert!(matches!(
            filter.register_columns("Logical_Switch", ["nope"]),
            Err(IdlError::Schema(_))
        ));
        assert!(filter.is_empty());
    }

    #[test]
    fn column_registrations_merge() {
        let mut filter = SchemaFilter::new(schema());
        filter.register_columns("Logical_Switch", ["name"]).unwrap();
        filter.register_columns("Logical_Switch", ["ports"]).unwrap();

        assert!(filter.includes_column("Logical_Switch", "name"));
        assert!(filter.includes_column("Logical_Switch", "ports"));
        assert!(!filter.includes_column("Logical_Switch", "other_config"));
        assert!(!filter.includes_table("ACL"));
    }

    #[test]
    fn whole_table_wins() {
        let mut filter = SchemaFilter::new(schema());
        filter.register_columns("Logical_Switch", ["name"]).unwrap();
        filter.register_table("Logical_Switch").unwrap();
        filter.register_columns("Logical_Switch", ["ports"]).unwrap();
        assert!(filter.includes_column("Logical_Switch", "other_config"));

        let mut empty_list = SchemaFilter::new(schema());
        empty_list
            .register_columns("Logical_Switch", Vec::<String>::new())
            .unwrap();
        assert!(empty_list.includes_column("Logical_Switch", "other_config"));
    }

    #[test]
    fn monitor_request_spells_out_columns() {
        let mut filter = SchemaFilter::new(schema());
        filter
            .register_columns("Logical_Switch", ["name", "ports"])
            .unwrap()
            .register_table("Logical_Switch_Port")
            .unwrap();

        let request = filter.monitor_request();
        assert_eq!(request.tables.len(), 2);
        assert_eq!(
            request.tables["Logical_Switch"].columns,
            vec!["name".to_string(), "ports".to_string()]
        );
        assert_eq!(
            request.tables["Logical_Switch_Port"].columns,
            vec!["name".to_string(), "type".to_string()]
        );
    }

    #[test]
    fn filtered_schema_contains_only_interest() {
        let mut filter = SchemaFilter::new(schema());
        filter.register_columns("Logical_Switch", ["name"]).unwrap();
        let filtered = filter.filtered_schema();

        assert_eq!(filtered.tables.len(), 1);
        let table = filtered.table("Logical_Switch").unwrap();
        assert!(table.column("name").is_some());
        assert!(table.column("ports").is_none());
    }

    #[test]
    fn compatibility_check() {
        let mut filter = SchemaFilter::new(schema());
        filter.register_columns("Logical_Switch", ["name"]).unwrap();
        filter.check_compatible(&schema()).unwrap();

        let wrong_db = DatabaseSchema::new("OVN_Southbound", "1.0");
        assert!(matches!(
            filter.check_compatible(&wrong_db),
            Err(IdlError::Schema(_))
        ));

        let retyped = DatabaseSchema::new("OVN_Northbound", "1.0").with_table(
            TableSchema::new("Logical_Switch")
                .with_column("name", ColumnType::scalar(BaseType::integer())),
        );
        assert!(matches!(
            filter.check_compatible(&retyped),
            Err(IdlError::Schema(_))
        ));

        // Columns outside the interest may differ freely.
        let narrower = DatabaseSchema::new("OVN_Northbound", "2.0").with_table(
            TableSchema::new("Logical_Switch")
                .with_column("name", ColumnType::scalar(BaseType::string())),
        );
        filter.check_compatible(&narrower).unwrap();
    }
}
