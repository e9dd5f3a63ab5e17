//! Local mirror of the filtered database view.

use crate::error::{IdlError, IdlResult};
use crate::row::{RowRef, TableRef};
use ovsdb_protocol::{Columns, DatabaseSchema, RowUpdate, TableSchema, TableUpdates};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Replicated rows of the registered tables.
///
/// The replica only holds registered tables and columns. It changes only
/// when the owning [`Idl`](crate::Idl) applies a server update, and
/// [`Replica::change_seqno`] moves exactly once per applied update.
#[derive(Debug)]
pub struct Replica {
    schema: DatabaseSchema,
    tables: BTreeMap<String, BTreeMap<Uuid, Columns>>,
    change_seqno: u64,
    session: Uuid,
}

impl Replica {
    pub(crate) fn new(schema: DatabaseSchema) -> Self {
        let tables = schema
            .tables
            .keys()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        Self {
            schema,
            tables,
            change_seqno: 0,
            session: Uuid::new_v4(),
        }
    }

    /// Returns the replicated (filtered) schema.
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.schema.name
    }

    /// Returns the change counter.
    pub fn change_seqno(&self) -> u64 {
        self.change_seqno
    }

    pub(crate) fn session(&self) -> Uuid {
        self.session
    }

    /// Returns a view of a replicated table.
    pub fn table(&self, name: &str) -> IdlResult<TableRef<'_>> {
        let schema = self.table_schema(name)?;
        let rows = self
            .tables
            .get(name)
            .ok_or_else(|| IdlError::TableNotReplicated(name.to_string()))?;
        Ok(TableRef::new(schema, rows))
    }

    pub(crate) fn table_schema(&self, name: &str) -> IdlResult<&TableSchema> {
        self.schema
            .table(name)
            .ok_or_else(|| IdlError::TableNotReplicated(name.to_string()))
    }

    /// Looks up a row by table and UUID.
    pub fn row(&self, table: &str, uuid: Uuid) -> IdlResult<Option<RowRef<'_>>> {
        Ok(self.table(table)?.get(uuid))
    }

    /// Returns the first row of `table` matching `predicate`.
    pub fn find_row(
        &self,
        table: &str,
        predicate: impl FnMut(&RowRef<'_>) -> bool,
    ) -> IdlResult<Option<RowRef<'_>>> {
        Ok(self.table(table)?.find(predicate))
    }

    /// Returns the only row of a singleton table.
    pub fn get_singleton(&self, table: &str) -> IdlResult<RowRef<'_>> {
        self.table(table)?.singleton()
    }

    /// Returns the total number of replicated rows.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Replaces the contents with an initial snapshot.
    pub(crate) fn load_snapshot(&mut self, snapshot: &TableUpdates) {
        for rows in self.tables.values_mut() {
            rows.clear();
        }
        self.apply(snapshot);
    }

    /// Applies one server update and advances the change counter.
    ///
    /// Tables and columns outside the filtered schema are ignored.
    pub(crate) fn apply(&mut self, updates: &TableUpdates) {
        let mut applied = 0usize;
        for (table, rows) in &updates.tables {
            let (Some(schema), Some(replica)) =
                (self.schema.tables.get(table), self.tables.get_mut(table))
            else {
                debug!(table = %table, "ignoring update for unreplicated table");
                continue;
            };

            for (uuid, update) in rows {
                match update {
                    RowUpdate::Initial(columns) | RowUpdate::Insert(columns) => {
                        let mut row = schema.default_row();
                        for (name, datum) in columns {
                            if let Some(slot) = row.get_mut(name) {
                                *slot = datum.clone();
                            }
                        }
                        replica.insert(*uuid, row);
                    }
                    RowUpdate::Modify(diff) => {
                        let Some(row) = replica.get_mut(uuid) else {
                            warn!(table = %table, row = %uuid, "modify for unknown row");
                            continue;
                        };
                        for (name, change) in diff {
                            if let Some(datum) = row.get_mut(name) {
                                datum.apply_diff(change);
                            }
                        }
                    }
                    RowUpdate::Delete => {
                        if replica.remove(uuid).is_none() {
                            warn!(table = %table, row = %uuid, "delete for unknown row");
                        }
                    }
                }
                applied += 1;
            }
        }

        self.change_seqno += 1;
        trace!(
            rows = applied,
            seqno = self.change_seqno,
            "applied server update"
        );
    }
}
