//! Transaction builder.
//!
//! A [`Transaction`] stages row changes against the replica without
//! touching it. Staged changes are validated locally (replicated table and
//! column, mutability, value types) and turned into wire operations only at
//! commit time. Rows inserted by the transaction get a temporary UUID that
//! other staged values may reference; the server assigns the real UUID.

use crate::error::{IdlError, IdlResult};
use crate::replica::Replica;
use crate::row::RowRef;
use ovsdb_protocol::{
    Atom, ColumnSchema, Columns, Condition, DatabaseSchema, Datum, Mutation, Operation,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;
use uuid::Uuid;

/// Handle to a row inserted by a pending transaction.
///
/// The handle's UUID is temporary; after a successful commit the real UUID
/// is available from [`CommitReport::inserted_uuid`](crate::CommitReport::inserted_uuid).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowHandle {
    table: String,
    uuid: Uuid,
}

impl RowHandle {
    /// Temporary UUID, usable as a reference value inside the same
    /// transaction.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Table the row is inserted into.
    pub fn table(&self) -> &str {
        &self.table
    }
}

/// A row a transaction can change: a replicated row or one the
/// transaction inserts.
pub trait RowTarget {
    /// Table name.
    fn target_table(&self) -> &str;
    /// Row UUID (temporary for inserted rows).
    fn target_uuid(&self) -> Uuid;
    /// Returns true for rows inserted by a transaction.
    fn is_new(&self) -> bool;
}

impl RowTarget for RowRef<'_> {
    fn target_table(&self) -> &str {
        self.table()
    }

    fn target_uuid(&self) -> Uuid {
        self.uuid()
    }

    fn is_new(&self) -> bool {
        false
    }
}

impl RowTarget for RowHandle {
    fn target_table(&self) -> &str {
        &self.table
    }

    fn target_uuid(&self) -> Uuid {
        self.uuid
    }

    fn is_new(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum Change {
    SetColumn { column: String, value: Datum },
    AddToSet { column: String, value: Atom },
    RemoveFromSet { column: String, value: Atom },
    SetKey { column: String, key: Atom, value: Atom },
    RemoveKey { column: String, key: Atom },
    Delete,
    Verify { column: String, value: Datum },
}

#[derive(Debug, Clone)]
struct Staged {
    table: String,
    uuid: Uuid,
    change: Change,
}

/// Wire operations of a transaction, ready to send.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommitPlan {
    pub(crate) operations: Vec<Operation>,
    /// Index of each insert operation and the temporary UUID it resolves.
    pub(crate) inserts: Vec<(usize, Uuid)>,
}

impl CommitPlan {
    pub(crate) fn is_empty(&self) -> bool {
        !self.operations.iter().any(Operation::is_mutating)
    }
}

/// Staged changes against one session's replica.
#[derive(Debug, Clone)]
pub struct Transaction {
    session: Uuid,
    schema: DatabaseSchema,
    staged: Vec<Staged>,
    inserted: Vec<RowHandle>,
    deleted: BTreeSet<Uuid>,
    comment: Option<String>,
}

impl Transaction {
    /// Starts an empty transaction against `replica`.
    pub fn begin(replica: &Replica) -> Self {
        Self {
            session: replica.session(),
            schema: replica.schema().clone(),
            staged: Vec::new(),
            inserted: Vec::new(),
            deleted: BTreeSet::new(),
            comment: None,
        }
    }

    pub(crate) fn session(&self) -> Uuid {
        self.session
    }

    /// Returns true if nothing that changes the database is staged.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self
                .staged
                .iter()
                .all(|s| matches!(s.change, Change::Verify { .. }))
    }

    /// Returns the rows inserted by this transaction.
    pub fn inserted(&self) -> &[RowHandle] {
        &self.inserted
    }

    /// Attaches a comment recorded with the transaction.
    pub fn comment(&mut self, comment: impl Into<String>) {
        self.comment = Some(comment.into());
    }

    /// Stages a new row in `table`. Unset columns take their defaults.
    pub fn insert(&mut self, table: &str) -> IdlResult<RowHandle> {
        if self.schema.table(table).is_none() {
            return Err(IdlError::TableNotReplicated(table.to_string()));
        }
        let handle = RowHandle {
            table: table.to_string(),
            uuid: Uuid::new_v4(),
        };
        trace!(table = %table, row = %handle.uuid, "staged insert");
        self.inserted.push(handle.clone());
        Ok(handle)
    }

    /// Stages deletion of a row.
    pub fn delete(&mut self, row: &impl RowTarget) -> IdlResult<()> {
        self.check_target(row)?;
        self.deleted.insert(row.target_uuid());
        self.push(row, Change::Delete);
        Ok(())
    }

    /// Stages a new value for a column.
    pub fn set_column(&mut self, row: &impl RowTarget, column: &str, value: Datum) -> IdlResult<()> {
        let schema = self.writable_column(row, column)?;
        schema
            .column_type
            .check(&value)
            .map_err(|e| invalid_value(row, column, e))?;
        self.push(
            row,
            Change::SetColumn {
                column: column.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Stages adding `value` to a set column.
    pub fn add_to_set(
        &mut self,
        row: &impl RowTarget,
        column: &str,
        value: impl Into<Atom>,
    ) -> IdlResult<()> {
        let value = value.into();
        self.check_set_atom(row, column, &value)?;
        self.push(
            row,
            Change::AddToSet {
                column: column.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Stages removing `value` from a set column.
    pub fn remove_from_set(
        &mut self,
        row: &impl RowTarget,
        column: &str,
        value: impl Into<Atom>,
    ) -> IdlResult<()> {
        let value = value.into();
        self.check_set_atom(row, column, &value)?;
        self.push(
            row,
            Change::RemoveFromSet {
                column: column.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Stages setting `key` to `value` in a map column, replacing any
    /// previous value of `key`.
    pub fn set_key(
        &mut self,
        row: &impl RowTarget,
        column: &str,
        key: impl Into<Atom>,
        value: impl Into<Atom>,
    ) -> IdlResult<()> {
        let (key, value) = (key.into(), value.into());
        let schema = self.map_column(row, column)?;
        let column_type = &schema.column_type;
        column_type
            .key
            .check_atom(&key)
            .and_then(|()| match &column_type.value {
                Some(value_type) => value_type.check_atom(&value),
                None => Ok(()),
            })
            .map_err(|e| invalid_value(row, column, e))?;
        self.push(
            row,
            Change::SetKey {
                column: column.to_string(),
                key,
                value,
            },
        );
        Ok(())
    }

    /// Stages removing `key` from a map column.
    pub fn remove_key(
        &mut self,
        row: &impl RowTarget,
        column: &str,
        key: impl Into<Atom>,
    ) -> IdlResult<()> {
        let key = key.into();
        let schema = self.map_column(row, column)?;
        schema
            .column_type
            .key
            .check_atom(&key)
            .map_err(|e| invalid_value(row, column, e))?;
        self.push(
            row,
            Change::RemoveKey {
                column: column.to_string(),
                key,
            },
        );
        Ok(())
    }

    /// Makes the commit fail with a retryable conflict if `column` of `row`
    /// no longer holds the value currently replicated.
    pub fn verify(&mut self, row: &RowRef<'_>, column: &str) -> IdlResult<()> {
        self.check_target(row)?;
        let value = row.get(column)?.clone();
        self.push(
            row,
            Change::Verify {
                column: column.to_string(),
                value,
            },
        );
        Ok(())
    }

    fn push(&mut self, row: &impl RowTarget, change: Change) {
        trace!(table = %row.target_table(), row = %row.target_uuid(), change = ?change, "staged change");
        self.staged.push(Staged {
            table: row.target_table().to_string(),
            uuid: row.target_uuid(),
            change,
        });
    }

    fn check_target(&self, row: &impl RowTarget) -> IdlResult<()> {
        let table = row.target_table();
        if self.schema.table(table).is_none() {
            return Err(IdlError::TableNotReplicated(table.to_string()));
        }
        let uuid = row.target_uuid();
        if row.is_new() && !self.inserted.iter().any(|h| h.uuid == uuid && h.table == table) {
            return Err(IdlError::InvalidOperation(format!(
                "row {uuid} was not inserted by this transaction"
            )));
        }
        if self.deleted.contains(&uuid) {
            return Err(IdlError::InvalidOperation(format!(
                "row {uuid} of table {table} is already deleted in this transaction"
            )));
        }
        Ok(())
    }

    fn writable_column(&self, row: &impl RowTarget, column: &str) -> IdlResult<&ColumnSchema> {
        self.check_target(row)?;
        let table = row.target_table();
        let schema = self
            .schema
            .column(table, column)
            .ok_or_else(|| IdlError::ColumnNotReplicated {
                table: table.to_string(),
                column: column.to_string(),
            })?;
        if !schema.mutable && !row.is_new() {
            return Err(IdlError::InvalidOperation(format!(
                "column {column} of table {table} is immutable"
            )));
        }
        Ok(schema)
    }

    fn check_set_atom(&self, row: &impl RowTarget, column: &str, value: &Atom) -> IdlResult<()> {
        let schema = self.writable_column(row, column)?;
        if !schema.column_type.is_set() {
            return Err(IdlError::InvalidOperation(format!(
                "column {column} of table {} is not a set",
                row.target_table()
            )));
        }
        schema
            .column_type
            .key
            .check_atom(value)
            .map_err(|e| invalid_value(row, column, e))
    }

    fn map_column(&self, row: &impl RowTarget, column: &str) -> IdlResult<&ColumnSchema> {
        let schema = self.writable_column(row, column)?;
        if !schema.column_type.is_map() {
            return Err(IdlError::InvalidOperation(format!(
                "column {column} of table {} is not a map",
                row.target_table()
            )));
        }
        Ok(schema)
    }

    /// Turns the staged changes into wire operations.
    ///
    /// Verifications come first, then one insert per new row with every
    /// change to that row folded in, then the remaining changes in staging
    /// order.
    pub(crate) fn into_plan(self) -> IdlResult<CommitPlan> {
        let names: BTreeMap<Uuid, String> = self
            .inserted
            .iter()
            .filter(|h| !self.deleted.contains(&h.uuid))
            .map(|h| (h.uuid, format!("row{}", h.uuid.simple())))
            .collect();
        let is_new = |uuid: &Uuid| self.inserted.iter().any(|h| h.uuid == *uuid);
        let named = |datum: Datum| name_atoms(datum, &names);
        let named_atom = |atom: Atom| name_atom(atom, &names);

        let mut plan = CommitPlan::default();

        for staged in &self.staged {
            if let Change::Verify { column, value } = &staged.change {
                let mut expected = Columns::new();
                expected.insert(column.clone(), value.clone());
                plan.operations.push(Operation::Wait {
                    table: staged.table.clone(),
                    conditions: vec![Condition::uuid_eq(staged.uuid)],
                    columns: vec![column.clone()],
                    rows: vec![expected],
                    timeout_ms: 0,
                });
            }
        }

        for handle in &self.inserted {
            if self.deleted.contains(&handle.uuid) {
                continue;
            }
            let mut row = Columns::new();
            for staged in self.staged.iter().filter(|s| s.uuid == handle.uuid) {
                self.fold_into(&mut row, &staged.table, &staged.change)?;
            }
            let row = row
                .into_iter()
                .map(|(column, datum)| (column, named(datum)))
                .collect();
            plan.inserts.push((plan.operations.len(), handle.uuid));
            plan.operations.push(Operation::Insert {
                table: handle.table.clone(),
                uuid_name: names.get(&handle.uuid).cloned(),
                row,
            });
        }

        for staged in self.staged.iter().filter(|s| !is_new(&s.uuid)) {
            let table = staged.table.clone();
            let conditions = vec![Condition::uuid_eq(staged.uuid)];
            let mutate = |mutations| Operation::Mutate {
                table: table.clone(),
                conditions: conditions.clone(),
                mutations,
            };
            let operation = match &staged.change {
                Change::Verify { .. } => continue,
                Change::SetColumn { column, value } => {
                    let mut row = Columns::new();
                    row.insert(column.clone(), named(value.clone()));
                    Operation::Update {
                        table: table.clone(),
                        conditions: conditions.clone(),
                        row,
                    }
                }
                Change::AddToSet { column, value } => mutate(vec![Mutation::insert(
                    column.clone(),
                    Datum::Set([named_atom(value.clone())].into()),
                )]),
                Change::RemoveFromSet { column, value } => mutate(vec![Mutation::delete(
                    column.clone(),
                    Datum::Set([named_atom(value.clone())].into()),
                )]),
                Change::SetKey { column, key, value } => {
                    let pair = Datum::Map([(key.clone(), named_atom(value.clone()))].into());
                    mutate(vec![
                        Mutation::delete(column.clone(), Datum::Set([key.clone()].into())),
                        Mutation::insert(column.clone(), pair),
                    ])
                }
                Change::RemoveKey { column, key } => mutate(vec![Mutation::delete(
                    column.clone(),
                    Datum::Set([key.clone()].into()),
                )]),
                Change::Delete => Operation::Delete {
                    table: table.clone(),
                    conditions: conditions.clone(),
                },
            };
            plan.operations.push(operation);
        }

        if let Some(comment) = self.comment {
            if !plan.is_empty() {
                plan.operations.push(Operation::Comment { comment });
            }
        }
        Ok(plan)
    }

    fn fold_into(&self, row: &mut Columns, table: &str, change: &Change) -> IdlResult<()> {
        let default = |column: &str| {
            self.schema
                .column(table, column)
                .map(|c| c.column_type.default_datum())
                .unwrap_or_else(Datum::empty_set)
        };
        match change {
            Change::SetColumn { column, value } => {
                row.insert(column.clone(), value.clone());
            }
            Change::AddToSet { column, value } => {
                row.entry(column.clone())
                    .or_insert_with(|| default(column))
                    .insert_atoms(&Datum::Scalar(value.clone()))?;
            }
            Change::RemoveFromSet { column, value } => {
                row.entry(column.clone())
                    .or_insert_with(|| default(column))
                    .remove_atoms(&Datum::Scalar(value.clone()))?;
            }
            Change::SetKey { column, key, value } => {
                let map = row.entry(column.clone()).or_insert_with(|| default(column));
                map.remove_atoms(&Datum::Scalar(key.clone()))?;
                map.insert_atoms(&Datum::Map([(key.clone(), value.clone())].into()))?;
            }
            Change::RemoveKey { column, key } => {
                row.entry(column.clone())
                    .or_insert_with(|| default(column))
                    .remove_atoms(&Datum::Scalar(key.clone()))?;
            }
            Change::Delete | Change::Verify { .. } => {}
        }
        Ok(())
    }
}

fn invalid_value(
    row: &impl RowTarget,
    column: &str,
    err: ovsdb_protocol::ProtocolError,
) -> IdlError {
    IdlError::InvalidOperation(format!(
        "bad value for column {column} of table {}: {err}",
        row.target_table()
    ))
}

fn name_atom(atom: Atom, names: &BTreeMap<Uuid, String>) -> Atom {
    match atom {
        Atom::Uuid(uuid) => match names.get(&uuid) {
            Some(name) => Atom::NamedUuid(name.clone()),
            None => Atom::Uuid(uuid),
        },
        other => other,
    }
}

fn name_atoms(datum: Datum, names: &BTreeMap<Uuid, String>) -> Datum {
    datum.map_atoms(|atom| name_atom(atom, names))
}
