//! In-memory database and transaction execution.
//!
//! A transaction runs against a working copy of every table. Operations are
//! executed in order; the first failing operation aborts the transaction.
//! After the last operation the commit checks run:
//!
//! 1. dangling weak references are dropped,
//! 2. unreferenced rows of non-root tables are garbage collected (repeated
//!    until nothing changes),
//! 3. every strong reference must resolve, and
//! 4. every changed row must satisfy its column constraints.
//!
//! A failing commit check appends a trailing error result. Only a
//! transaction that passes every check replaces the committed tables.

use ovsdb_protocol::{
    errors, Atom, ColumnSchema, Columns, Condition, DatabaseSchema, Datum, MonitorRequest,
    Mutation, Mutator, Operation, OperationResult, RefType, RowUpdate, TableSchema, TableUpdates,
    UUID_COLUMN,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, trace};
use uuid::Uuid;

type Tables = BTreeMap<String, BTreeMap<Uuid, Columns>>;

/// Result of executing one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactOutcome {
    /// One result per executed operation, plus a trailing commit error if
    /// a commit check failed.
    pub results: Vec<OperationResult>,
    /// Row changes of a committed transaction; empty otherwise.
    pub updates: TableUpdates,
}

impl TransactOutcome {
    /// Returns true if the transaction was committed.
    pub fn committed(&self) -> bool {
        !self.results.iter().any(OperationResult::is_error)
    }
}

#[derive(Debug)]
struct Failure {
    error: &'static str,
    details: String,
}

impl Failure {
    fn new(error: &'static str, details: impl Into<String>) -> Self {
        Self {
            error,
            details: details.into(),
        }
    }

    fn into_result(self) -> OperationResult {
        OperationResult::error(self.error, self.details)
    }
}

type Exec<T> = Result<T, Failure>;

/// Committed contents of one database.
#[derive(Debug, Clone)]
pub struct Database {
    schema: DatabaseSchema,
    tables: Tables,
}

impl Database {
    /// Creates an empty database.
    pub fn new(schema: DatabaseSchema) -> Self {
        let tables = schema
            .tables
            .keys()
            .map(|name| (name.clone(), BTreeMap::new()))
            .collect();
        Self { schema, tables }
    }

    /// Returns the schema.
    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    /// Returns the rows of a table.
    pub fn rows(&self, table: &str) -> Option<&BTreeMap<Uuid, Columns>> {
        self.tables.get(table)
    }

    /// Returns the total number of rows.
    pub fn row_count(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Checks that every table and column of `request` exists.
    pub fn validate_monitor(&self, request: &MonitorRequest) -> Result<(), String> {
        for (table, select) in &request.tables {
            let schema = self
                .schema
                .table(table)
                .ok_or_else(|| format!("{}: no table {table}", errors::SYNTAX))?;
            for column in &select.columns {
                if schema.column(column).is_none() {
                    return Err(format!(
                        "{}: table {table} has no column {column}",
                        errors::SYNTAX
                    ));
                }
            }
        }
        Ok(())
    }

    /// Returns every row covered by `request` as initial updates.
    pub fn snapshot(&self, request: &MonitorRequest) -> TableUpdates {
        let mut updates = TableUpdates::new();
        for (table, rows) in &self.tables {
            if !request.includes_table(table) {
                continue;
            }
            for (uuid, row) in rows {
                updates.push(table.clone(), *uuid, RowUpdate::Initial(row.clone()));
            }
        }
        updates.project(request)
    }

    /// Executes a transaction atomically.
    pub fn transact(&mut self, operations: &[Operation]) -> TransactOutcome {
        let mut txn = Txn {
            schema: &self.schema,
            tables: self.tables.clone(),
            names: HashMap::new(),
        };

        let mut results = Vec::with_capacity(operations.len());
        if let Err(failure) = txn.assign_names(operations) {
            results.push(failure.into_result());
            return TransactOutcome {
                results,
                updates: TableUpdates::new(),
            };
        }

        for operation in operations {
            match txn.execute(operation) {
                Ok(result) => results.push(result),
                Err(failure) => {
                    debug!(
                        op = operation.name(),
                        error = failure.error,
                        details = %failure.details,
                        "operation failed"
                    );
                    results.push(failure.into_result());
                    return TransactOutcome {
                        results,
                        updates: TableUpdates::new(),
                    };
                }
            }
        }

        if let Err(failure) = txn.commit_checks(&self.tables) {
            debug!(error = failure.error, details = %failure.details, "commit check failed");
            results.push(failure.into_result());
            return TransactOutcome {
                results,
                updates: TableUpdates::new(),
            };
        }

        let tables = txn.tables;
        let updates = diff_tables(&self.tables, &tables);
        trace!(rows = updates.row_count(), "transaction committed");
        self.tables = tables;
        TransactOutcome { results, updates }
    }
}

struct Txn<'a> {
    schema: &'a DatabaseSchema,
    tables: Tables,
    names: HashMap<String, Uuid>,
}

impl<'a> Txn<'a> {
    fn assign_names(&mut self, operations: &[Operation]) -> Exec<()> {
        for operation in operations {
            if let Operation::Insert {
                uuid_name: Some(name),
                ..
            } = operation
            {
                if self.names.insert(name.clone(), Uuid::new_v4()).is_some() {
                    return Err(Failure::new(
                        errors::SYNTAX,
                        format!("duplicate uuid-name {name}"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn table_schema(&self, table: &str) -> Exec<&'a TableSchema> {
        self.schema
            .table(table)
            .ok_or_else(|| Failure::new(errors::SYNTAX, format!("no table {table}")))
    }

    fn column_schema<'s>(table: &'s TableSchema, column: &str) -> Exec<&'s ColumnSchema> {
        table.column(column).ok_or_else(|| {
            Failure::new(
                errors::SYNTAX,
                format!("table {} has no column {column}", table.name),
            )
        })
    }

    fn resolve(&self, datum: &Datum) -> Exec<Datum> {
        let unknown = datum.atoms().find_map(|atom| match atom {
            Atom::NamedUuid(name) if !self.names.contains_key(name) => Some(name.clone()),
            _ => None,
        });
        if let Some(name) = unknown {
            return Err(Failure::new(
                errors::SYNTAX,
                format!("unknown uuid-name {name}"),
            ));
        }
        Ok(datum.clone().map_atoms(|atom| match atom {
            Atom::NamedUuid(name) => match self.names.get(&name) {
                Some(uuid) => Atom::Uuid(*uuid),
                None => Atom::NamedUuid(name),
            },
            other => other,
        }))
    }

    fn matching(&self, table: &str, conditions: &[Condition]) -> Exec<Vec<Uuid>> {
        let schema = self.table_schema(table)?;
        let mut resolved = Vec::with_capacity(conditions.len());
        for condition in conditions {
            if condition.column != UUID_COLUMN {
                Self::column_schema(schema, &condition.column)?;
            }
            resolved.push(Condition {
                column: condition.column.clone(),
                function: condition.function,
                value: self.resolve(&condition.value)?,
            });
        }
        Ok(self
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|(uuid, row)| resolved.iter().all(|c| c.matches(**uuid, row)))
                    .map(|(uuid, _)| *uuid)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn execute(&mut self, operation: &Operation) -> Exec<OperationResult> {
        match operation {
            Operation::Insert {
                table,
                uuid_name,
                row,
            } => self.insert(table, uuid_name.as_deref(), row),
            Operation::Update {
                table,
                conditions,
                row,
            } => self.update(table, conditions, row),
            Operation::Mutate {
                table,
                conditions,
                mutations,
            } => self.mutate(table, conditions, mutations),
            Operation::Delete { table, conditions } => {
                let uuids = self.matching(table, conditions)?;
                if let Some(rows) = self.tables.get_mut(table) {
                    for uuid in &uuids {
                        rows.remove(uuid);
                    }
                }
                Ok(OperationResult::Count {
                    count: uuids.len() as u64,
                })
            }
            Operation::Wait {
                table,
                conditions,
                columns,
                rows,
                ..
            } => self.wait(table, conditions, columns, rows),
            Operation::Comment { .. } => Ok(OperationResult::Empty),
        }
    }

    fn insert(&mut self, table: &str, uuid_name: Option<&str>, values: &Columns) -> Exec<OperationResult> {
        let schema = self.table_schema(table)?;
        let mut row = schema.default_row();
        for (column, datum) in values {
            let column_schema = Self::column_schema(schema, column)?;
            let datum = self.resolve(datum)?;
            check_value(table, column_schema, &datum)?;
            row.insert(column.clone(), datum);
        }

        let uuid = match uuid_name {
            Some(name) => self.names.get(name).copied().unwrap_or_else(Uuid::new_v4),
            None => Uuid::new_v4(),
        };
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(uuid, row);
        Ok(OperationResult::Inserted { uuid })
    }

    fn update(&mut self, table: &str, conditions: &[Condition], values: &Columns) -> Exec<OperationResult> {
        let schema = self.table_schema(table)?;
        let mut resolved = Columns::new();
        for (column, datum) in values {
            let column_schema = Self::column_schema(schema, column)?;
            if !column_schema.mutable {
                return Err(Failure::new(
                    errors::CONSTRAINT,
                    format!("column {column} of table {table} is immutable"),
                ));
            }
            let datum = self.resolve(datum)?;
            check_value(table, column_schema, &datum)?;
            resolved.insert(column.clone(), datum);
        }

        let uuids = self.matching(table, conditions)?;
        if let Some(rows) = self.tables.get_mut(table) {
            for uuid in &uuids {
                if let Some(row) = rows.get_mut(uuid) {
                    row.extend(resolved.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        Ok(OperationResult::Count {
            count: uuids.len() as u64,
        })
    }

    fn mutate(&mut self, table: &str, conditions: &[Condition], mutations: &[Mutation]) -> Exec<OperationResult> {
        let schema = self.table_schema(table)?;
        let mut resolved = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            let column_schema = Self::column_schema(schema, &mutation.column)?;
            if !column_schema.mutable {
                return Err(Failure::new(
                    errors::CONSTRAINT,
                    format!("column {} of table {table} is immutable", mutation.column),
                ));
            }
            let value = self.resolve(&mutation.value)?;
            check_mutation_atoms(table, column_schema, mutation.mutator, &value)?;
            resolved.push((mutation.column.clone(), mutation.mutator, value));
        }

        let uuids = self.matching(table, conditions)?;
        if let Some(rows) = self.tables.get_mut(table) {
            for uuid in &uuids {
                let Some(row) = rows.get_mut(uuid) else {
                    continue;
                };
                for (column, mutator, value) in &resolved {
                    let Some(datum) = row.get_mut(column) else {
                        continue;
                    };
                    let applied = match mutator {
                        Mutator::Insert => datum.insert_atoms(value),
                        Mutator::Delete => datum.remove_atoms(value),
                    };
                    applied.map_err(|e| {
                        Failure::new(
                            errors::CONSTRAINT,
                            format!("column {column} of table {table}: {e}"),
                        )
                    })?;
                }
            }
        }
        Ok(OperationResult::Count {
            count: uuids.len() as u64,
        })
    }

    fn wait(
        &self,
        table: &str,
        conditions: &[Condition],
        columns: &[String],
        expected: &[Columns],
    ) -> Exec<OperationResult> {
        let schema = self.table_schema(table)?;
        for column in columns {
            Self::column_schema(schema, column)?;
        }
        let uuids = self.matching(table, conditions)?;
        let Some(rows) = self.tables.get(table) else {
            return Ok(OperationResult::Empty);
        };

        let project = |row: &Columns| -> Columns {
            columns
                .iter()
                .filter_map(|c| row.get(c).map(|d| (c.clone(), d.clone())))
                .collect()
        };
        let mut actual: Vec<Columns> = uuids
            .iter()
            .filter_map(|uuid| rows.get(uuid))
            .map(project)
            .collect();
        let mut wanted = Vec::with_capacity(expected.len());
        for row in expected {
            let mut resolved = Columns::new();
            for (column, datum) in row {
                resolved.insert(column.clone(), self.resolve(datum)?);
            }
            wanted.push(resolved);
        }
        actual.sort();
        wanted.sort();

        if actual == wanted {
            Ok(OperationResult::Empty)
        } else {
            Err(Failure::new(
                errors::TIMED_OUT,
                format!("wait on table {table} did not match"),
            ))
        }
    }

    fn commit_checks(&mut self, committed: &Tables) -> Exec<()> {
        loop {
            let dropped = self.drop_weak_references();
            let collected = self.collect_garbage();
            if dropped == 0 && collected == 0 {
                break;
            }
            trace!(dropped, collected, "reference cleanup pass");
        }
        self.check_strong_references()?;
        self.check_constraints(committed)
    }

    fn exists(&self, table: &str, uuid: &Uuid) -> bool {
        self.tables
            .get(table)
            .is_some_and(|rows| rows.contains_key(uuid))
    }

    fn drop_weak_references(&mut self) -> usize {
        let mut dangling: Vec<(String, Uuid, String, Atom)> = Vec::new();
        for (table, rows) in &self.tables {
            let Some(schema) = self.schema.table(table) else {
                continue;
            };
            for column in schema.columns.values() {
                let weak: Vec<&str> = column
                    .column_type
                    .references()
                    .filter(|base| base.ref_type == RefType::Weak)
                    .filter_map(|base| base.ref_table.as_deref())
                    .collect();
                if weak.is_empty() {
                    continue;
                }
                for (uuid, row) in rows {
                    let Some(datum) = row.get(&column.name) else {
                        continue;
                    };
                    for atom in datum.atoms() {
                        if let Atom::Uuid(target) = atom {
                            if weak.iter().all(|t| !self.exists(t, target)) {
                                dangling.push((
                                    table.clone(),
                                    *uuid,
                                    column.name.clone(),
                                    atom.clone(),
                                ));
                            }
                        }
                    }
                }
            }
        }

        let count = dangling.len();
        for (table, uuid, column, atom) in dangling {
            let Some(datum) = self
                .tables
                .get_mut(&table)
                .and_then(|rows| rows.get_mut(&uuid))
                .and_then(|row| row.get_mut(&column))
            else {
                continue;
            };
            match datum {
                Datum::Set(set) => {
                    set.remove(&atom);
                }
                Datum::Map(map) => map.retain(|k, v| *k != atom && *v != atom),
                // Scalars cannot lose their atom; the constraint check
                // reports them.
                Datum::Scalar(_) => {}
            }
        }
        count
    }

    fn collect_garbage(&mut self) -> usize {
        let mut referenced: BTreeSet<Uuid> = BTreeSet::new();
        for (table, rows) in &self.tables {
            let Some(schema) = self.schema.table(table) else {
                continue;
            };
            for column in schema.columns.values() {
                let strong = column
                    .column_type
                    .references()
                    .any(|base| base.ref_type == RefType::Strong);
                if !strong {
                    continue;
                }
                for row in rows.values() {
                    if let Some(datum) = row.get(&column.name) {
                        referenced.extend(datum.atoms().filter_map(Atom::as_uuid));
                    }
                }
            }
        }

        let mut collected = 0;
        for (table, rows) in self.tables.iter_mut() {
            if self.schema.table(table).map_or(true, |t| t.is_root) {
                continue;
            }
            let before = rows.len();
            rows.retain(|uuid, _| referenced.contains(uuid));
            collected += before - rows.len();
        }
        collected
    }

    fn check_strong_references(&self) -> Exec<()> {
        for (table, rows) in &self.tables {
            let Some(schema) = self.schema.table(table) else {
                continue;
            };
            for column in schema.columns.values() {
                let strong: Vec<&str> = column
                    .column_type
                    .references()
                    .filter(|base| base.ref_type == RefType::Strong)
                    .filter_map(|base| base.ref_table.as_deref())
                    .collect();
                if strong.is_empty() {
                    continue;
                }
                for (uuid, row) in rows {
                    let Some(datum) = row.get(&column.name) else {
                        continue;
                    };
                    for target in datum.atoms().filter_map(Atom::as_uuid) {
                        if strong.iter().all(|t| !self.exists(t, &target)) {
                            return Err(Failure::new(
                                errors::REFERENTIAL_INTEGRITY,
                                format!(
                                    "column {} of row {uuid} in table {table} references missing row {target}",
                                    column.name
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn check_constraints(&self, committed: &Tables) -> Exec<()> {
        for (table, rows) in &self.tables {
            let Some(schema) = self.schema.table(table) else {
                continue;
            };
            let before = committed.get(table);
            for (uuid, row) in rows {
                if before.and_then(|b| b.get(uuid)) == Some(row) {
                    continue;
                }
                for column in schema.columns.values() {
                    if let Some(datum) = row.get(&column.name) {
                        column.column_type.check(datum).map_err(|e| {
                            Failure::new(
                                errors::CONSTRAINT,
                                format!(
                                    "column {} of row {uuid} in table {table}: {e}",
                                    column.name
                                ),
                            )
                        })?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_value(table: &str, column: &ColumnSchema, datum: &Datum) -> Exec<()> {
    column.column_type.check(datum).map_err(|e| {
        Failure::new(
            errors::CONSTRAINT,
            format!("column {} of table {table}: {e}", column.name),
        )
    })
}

fn check_mutation_atoms(
    table: &str,
    column: &ColumnSchema,
    mutator: Mutator,
    value: &Datum,
) -> Exec<()> {
    let column_type = &column.column_type;
    let checked = match (value, &column_type.value) {
        (Datum::Map(pairs), Some(value_type)) => pairs.iter().try_for_each(|(k, v)| {
            column_type
                .key
                .check_atom(k)
                .and_then(|()| value_type.check_atom(v))
        }),
        (Datum::Map(_), None) => Err(ovsdb_protocol::ProtocolError::invalid_mutation(
            "map operand for a set column",
        )),
        (other, _) if mutator == Mutator::Insert && column_type.is_map() => {
            Err(ovsdb_protocol::ProtocolError::invalid_mutation(format!(
                "cannot insert a {} into a map",
                other.kind()
            )))
        }
        (other, _) => other
            .atoms()
            .try_for_each(|atom| column_type.key.check_atom(atom)),
    };
    checked.map_err(|e| {
        Failure::new(
            errors::CONSTRAINT,
            format!("column {} of table {table}: {e}", column.name),
        )
    })
}

fn diff_tables(old: &Tables, new: &Tables) -> TableUpdates {
    let mut updates = TableUpdates::new();
    let empty = BTreeMap::new();
    for (table, new_rows) in new {
        let old_rows = old.get(table).unwrap_or(&empty);
        for (uuid, row) in new_rows {
            match old_rows.get(uuid) {
                None => updates.push(table.clone(), *uuid, RowUpdate::Insert(row.clone())),
                Some(previous) if previous != row => {
                    let diff: Columns = row
                        .iter()
                        .filter_map(|(column, datum)| {
                            let before = previous.get(column)?;
                            Datum::diff(before, datum).map(|d| (column.clone(), d))
                        })
                        .collect();
                    updates.push(table.clone(), *uuid, RowUpdate::Modify(diff));
                }
                Some(_) => {}
            }
        }
        for uuid in old_rows.keys() {
            if !new_rows.contains_key(uuid) {
                updates.push(table.clone(), *uuid, RowUpdate::Delete);
            }
        }
    }
    updates
}
