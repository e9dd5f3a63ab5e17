//! Read-only views over replicated tables and rows.
//!
//! Views borrow the replica, so they can only be held between calls that
//! advance the session; the borrow checker rules out reading a row while
//! an update is being applied.

use crate::error::{IdlError, IdlResult};
use ovsdb_protocol::{Atom, Columns, Datum, TableSchema};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// View of one replicated table.
#[derive(Debug, Clone, Copy)]
pub struct TableRef<'a> {
    schema: &'a TableSchema,
    rows: &'a BTreeMap<Uuid, Columns>,
}

impl<'a> TableRef<'a> {
    pub(crate) fn new(schema: &'a TableSchema, rows: &'a BTreeMap<Uuid, Columns>) -> Self {
        Self { schema, rows }
    }

    /// Table name.
    pub fn name(&self) -> &'a str {
        &self.schema.name
    }

    /// Replicated schema of the table.
    pub fn schema(&self) -> &'a TableSchema {
        self.schema
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over the rows in UUID order.
    pub fn rows(&self) -> impl Iterator<Item = RowRef<'a>> + 'a {
        let schema = self.schema;
        self.rows
            .iter()
            .map(move |(uuid, columns)| RowRef::new(schema, *uuid, columns))
    }

    /// Looks up a row by UUID.
    pub fn get(&self, uuid: Uuid) -> Option<RowRef<'a>> {
        self.rows
            .get(&uuid)
            .map(|columns| RowRef::new(self.schema, uuid, columns))
    }

    /// Returns the first row matching `predicate`.
    pub fn find(&self, mut predicate: impl FnMut(&RowRef<'a>) -> bool) -> Option<RowRef<'a>> {
        self.rows().find(|row| predicate(row))
    }

    /// Returns the first row whose `column` equals `value`.
    ///
    /// Fails if `column` is not replicated.
    pub fn find_by(&self, column: &str, value: &Datum) -> IdlResult<Option<RowRef<'a>>> {
        self.check_column(column)?;
        Ok(self.find(|row| row.columns.get(column) == Some(value)))
    }

    /// Returns the only row of the table.
    pub fn singleton(&self) -> IdlResult<RowRef<'a>> {
        let mut rows = self.rows();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            _ => Err(IdlError::SingletonViolation {
                table: self.schema.name.clone(),
                count: self.rows.len(),
            }),
        }
    }

    fn check_column(&self, column: &str) -> IdlResult<()> {
        if self.schema.column(column).is_none() {
            return Err(IdlError::ColumnNotReplicated {
                table: self.schema.name.clone(),
                column: column.to_string(),
            });
        }
        Ok(())
    }
}

/// View of one replicated row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    schema: &'a TableSchema,
    uuid: Uuid,
    columns: &'a Columns,
}

impl<'a> RowRef<'a> {
    pub(crate) fn new(schema: &'a TableSchema, uuid: Uuid, columns: &'a Columns) -> Self {
        Self {
            schema,
            uuid,
            columns,
        }
    }

    /// Row UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Name of the table the row belongs to.
    pub fn table(&self) -> &'a str {
        &self.schema.name
    }

    /// Returns a column value.
    pub fn get(&self, column: &str) -> IdlResult<&'a Datum> {
        self.columns
            .get(column)
            .ok_or_else(|| IdlError::ColumnNotReplicated {
                table: self.schema.name.clone(),
                column: column.to_string(),
            })
    }

    /// Returns a string column value; `None` for an empty optional column.
    pub fn get_str(&self, column: &str) -> IdlResult<Option<&'a str>> {
        Ok(self.get(column)?.as_str())
    }

    /// Returns a UUID column value; `None` for an empty optional column.
    pub fn get_uuid(&self, column: &str) -> IdlResult<Option<Uuid>> {
        Ok(self.get(column)?.as_uuid())
    }

    /// Returns the atoms of a set column (optional scalars included).
    pub fn get_set(&self, column: &str) -> IdlResult<&'a BTreeSet<Atom>> {
        let datum = self.get(column)?;
        datum
            .as_set()
            .ok_or_else(|| self.shape_error(column, "set", datum))
    }

    /// Returns the pairs of a map column.
    pub fn get_map(&self, column: &str) -> IdlResult<&'a BTreeMap<Atom, Atom>> {
        let datum = self.get(column)?;
        datum
            .as_map()
            .ok_or_else(|| self.shape_error(column, "map", datum))
    }

    /// Returns the string value stored under `key` in a map column.
    pub fn map_value(&self, column: &str, key: &str) -> IdlResult<Option<&'a str>> {
        let map = self.get_map(column)?;
        Ok(map.get(&Atom::from(key)).and_then(Atom::as_str))
    }

    /// Returns true if `column` of `other` references this row.
    pub fn belongs_to(&self, other: &RowRef<'_>, column: &str) -> IdlResult<bool> {
        Ok(other.get(column)?.contains(&Atom::Uuid(self.uuid)))
    }

    /// Iterates over the replicated columns.
    pub fn columns(&self) -> impl Iterator<Item = (&'a str, &'a Datum)> + 'a {
        self.columns.iter().map(|(name, datum)| (name.as_str(), datum))
    }

    fn shape_error(&self, column: &str, expected: &str, found: &Datum) -> IdlError {
        IdlError::InvalidOperation(format!(
            "column {column} of table {} is a {}, not a {expected}",
            self.schema.name,
            found.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_protocol::{BaseType, ColumnType};

    fn switch_schema() -> TableSchema {
        TableSchema::new("Logical_Switch")
            .with_column("name", ColumnType::scalar(BaseType::string()))
            .with_column(
                "ports",
                ColumnType::set(BaseType::reference("Logical_Switch_Port")),
            )
            .with_column(
                "external_ids",
                ColumnType::map(BaseType::string(), BaseType::string()),
            )
    }

    fn switch(name: &str, ports: &[Uuid]) -> Columns {
        let mut row = switch_schema().default_row();
        row.insert("name".into(), Datum::scalar(name));
        row.insert("ports".into(), Datum::uuid_set(ports.iter().copied()));
        row.insert("external_ids".into(), Datum::map([("owner", "test")]));
        row
    }

    #[test]
    fn finds_rows_by_column() {
        let schema = switch_schema();
        let mut rows = BTreeMap::new();
        rows.insert(Uuid::new_v4(), switch("sw0", &[]));
        rows.insert(Uuid::new_v4(), switch("sw1", &[]));
        let table = TableRef::new(&schema, &rows);

        let found = table.find_by("name", &Datum::scalar("sw1")).unwrap().unwrap();
        assert_eq!(found.get_str("name").unwrap(), Some("sw1"));
        assert!(table
            .find_by("name", &Datum::scalar("sw9"))
            .unwrap()
            .is_none());
        assert!(matches!(
            table.find_by("other_config", &Datum::empty_map()),
            Err(IdlError::ColumnNotReplicated { .. })
        ));
    }

    #[test]
    fn singleton_requires_exactly_one_row() {
        let schema = switch_schema();
        let mut rows = BTreeMap::new();
        assert!(matches!(
            TableRef::new(&schema, &rows).singleton(),
            Err(IdlError::SingletonViolation { count: 0, .. })
        ));

        rows.insert(Uuid::new_v4(), switch("sw0", &[]));
        assert!(TableRef::new(&schema, &rows).singleton().is_ok());

        rows.insert(Uuid::new_v4(), switch("sw1", &[]));
        assert!(matches!(
            TableRef::new(&schema, &rows).singleton(),
            Err(IdlError::SingletonViolation { count: 2, .. })
        ));
    }

    #[test]
    fn typed_accessors() {
        let schema = switch_schema();
        let port = Uuid::new_v4();
        let columns = switch("sw0", &[port]);
        let row = RowRef::new(&schema, Uuid::new_v4(), &columns);

        assert!(row.get_set("ports").unwrap().contains(&Atom::Uuid(port)));
        assert_eq!(row.map_value("external_ids", "owner").unwrap(), Some("test"));
        assert_eq!(row.map_value("external_ids", "missing").unwrap(), None);
        assert!(matches!(
            row.get_map("ports"),
            Err(IdlError::InvalidOperation(_))
        ));
        assert!(matches!(
            row.get("acls"),
            Err(IdlError::ColumnNotReplicated { .. })
        ));
    }

    #[test]
    fn membership_through_reference_column() {
        let switch_table = switch_schema();
        let port_table = TableSchema::new("Logical_Switch_Port")
            .with_column("name", ColumnType::scalar(BaseType::string()));

        let port_uuid = Uuid::new_v4();
        let port_columns = port_table.default_row();
        let port = RowRef::new(&port_table, port_uuid, &port_columns);

        let owner_columns = switch("sw0", &[port_uuid]);
        let owner = RowRef::new(&switch_table, Uuid::new_v4(), &owner_columns);
        let other_columns = switch("sw1", &[]);
        let other = RowRef::new(&switch_table, Uuid::new_v4(), &other_columns);

        assert!(port.belongs_to(&owner, "ports").unwrap());
        assert!(!port.belongs_to(&other, "ports").unwrap());
    }
}
