//! Transaction operations and their results.

use crate::schema::UUID_COLUMN;
use crate::value::{Atom, Datum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Column values of a row, keyed by column name.
pub type Columns = BTreeMap<String, Datum>;

/// Error strings carried in [`OperationResult::Error`].
pub mod errors {
    /// A `wait` operation's condition did not hold.
    pub const TIMED_OUT: &str = "timed out";
    /// The transaction was explicitly aborted.
    pub const ABORTED: &str = "aborted";
    /// A strong reference pointed at a missing row.
    pub const REFERENTIAL_INTEGRITY: &str = "referential integrity violation";
    /// A value violated its column's type or mutability constraints.
    pub const CONSTRAINT: &str = "constraint violation";
    /// The request named an unknown table or column, or was malformed.
    pub const SYNTAX: &str = "syntax error";
    /// The request named an unknown database.
    pub const UNKNOWN_DATABASE: &str = "unknown database";
}

/// Comparison function of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    /// Column equals value.
    Equal,
    /// Column differs from value.
    NotEqual,
    /// Column contains every atom of value.
    Includes,
    /// Column contains no atom of value.
    Excludes,
}

/// A row selection predicate: `column function value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Column name, or `_uuid`.
    pub column: String,
    /// Comparison.
    pub function: Function,
    /// Operand.
    pub value: Datum,
}

impl Condition {
    /// Selects the row with the given UUID.
    pub fn uuid_eq(uuid: Uuid) -> Self {
        Self {
            column: UUID_COLUMN.to_string(),
            function: Function::Equal,
            value: Datum::Scalar(Atom::Uuid(uuid)),
        }
    }

    /// Selects rows whose column equals `value`.
    pub fn eq(column: impl Into<String>, value: Datum) -> Self {
        Self {
            column: column.into(),
            function: Function::Equal,
            value,
        }
    }

    /// Evaluates the condition against a row.
    ///
    /// A condition on a column the row lacks never matches.
    pub fn matches(&self, uuid: Uuid, row: &Columns) -> bool {
        let uuid_datum;
        let actual = if self.column == UUID_COLUMN {
            uuid_datum = Datum::Scalar(Atom::Uuid(uuid));
            &uuid_datum
        } else {
            match row.get(&self.column) {
                Some(datum) => datum,
                None => return false,
            }
        };

        match self.function {
            Function::Equal => *actual == self.value,
            Function::NotEqual => *actual != self.value,
            Function::Includes => self.operand_atoms().all(|a| actual.contains(a)),
            Function::Excludes => !self.operand_atoms().any(|a| actual.contains(a)),
        }
    }

    fn operand_atoms(&self) -> Box<dyn Iterator<Item = &Atom> + '_> {
        match &self.value {
            Datum::Map(map) => Box::new(map.keys()),
            other => other.atoms(),
        }
    }
}

/// Kind of a [`Mutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutator {
    /// Add atoms to a set, or absent keys to a map.
    Insert,
    /// Remove atoms from a set, or keys/pairs from a map.
    Delete,
}

/// An in-place change to a set or map column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Column name.
    pub column: String,
    /// Insert or delete.
    pub mutator: Mutator,
    /// Atoms, keys or pairs to insert or delete.
    pub value: Datum,
}

impl Mutation {
    /// Creates an insert mutation.
    pub fn insert(column: impl Into<String>, value: Datum) -> Self {
        Self {
            column: column.into(),
            mutator: Mutator::Insert,
            value,
        }
    }

    /// Creates a delete mutation.
    pub fn delete(column: impl Into<String>, value: Datum) -> Self {
        Self {
            column: column.into(),
            mutator: Mutator::Delete,
            value,
        }
    }
}

/// One operation of a transaction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Inserts a row. `uuid_name` lets later atoms refer to it as a
    /// [`Atom::NamedUuid`].
    Insert {
        /// Target table.
        table: String,
        /// Transaction-local name of the new row.
        uuid_name: Option<String>,
        /// Initial column values; missing columns take their default.
        row: Columns,
    },
    /// Replaces columns of every matching row.
    Update {
        /// Target table.
        table: String,
        /// Row selection.
        conditions: Vec<Condition>,
        /// New column values.
        row: Columns,
    },
    /// Mutates set and map columns of every matching row.
    Mutate {
        /// Target table.
        table: String,
        /// Row selection.
        conditions: Vec<Condition>,
        /// Mutations applied in order.
        mutations: Vec<Mutation>,
    },
    /// Deletes every matching row.
    Delete {
        /// Target table.
        table: String,
        /// Row selection.
        conditions: Vec<Condition>,
    },
    /// Asserts that the matching rows, projected on `columns`, equal `rows`.
    Wait {
        /// Target table.
        table: String,
        /// Row selection.
        conditions: Vec<Condition>,
        /// Projected columns.
        columns: Vec<String>,
        /// Expected projected rows.
        rows: Vec<Columns>,
        /// How long the server may wait for the condition; zero fails
        /// immediately.
        timeout_ms: u64,
    },
    /// Free-form annotation recorded with the transaction.
    Comment {
        /// Annotation text.
        comment: String,
    },
}

impl Operation {
    /// Returns the target table, if the operation has one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::Insert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. }
            | Operation::Wait { table, .. } => Some(table),
            Operation::Comment { .. } => None,
        }
    }

    /// Returns the operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Insert { .. } => "insert",
            Operation::Update { .. } => "update",
            Operation::Mutate { .. } => "mutate",
            Operation::Delete { .. } => "delete",
            Operation::Wait { .. } => "wait",
            Operation::Comment { .. } => "comment",
        }
    }

    /// Returns true if the operation can change database contents.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Operation::Wait { .. } | Operation::Comment { .. })
    }
}

/// Result of one operation, or a transaction-level error appended after
/// the per-operation results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    /// An insert succeeded and the row received `uuid`.
    Inserted {
        /// Server-assigned row UUID.
        uuid: Uuid,
    },
    /// An update, mutate or delete matched `count` rows.
    Count {
        /// Number of rows affected.
        count: u64,
    },
    /// A wait or comment succeeded.
    Empty,
    /// The operation (or the commit) failed.
    Error {
        /// One of the strings in [`errors`].
        error: String,
        /// Human-readable detail.
        details: Option<String>,
    },
}

impl OperationResult {
    /// Creates an error result.
    pub fn error(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            details: Some(details.into()),
        }
    }

    /// Returns true for error results.
    pub fn is_error(&self) -> bool {
        matches!(self, OperationResult::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_row() -> Columns {
        let mut row = Columns::new();
        row.insert("name".into(), Datum::scalar("p1"));
        row.insert("addresses".into(), Datum::set(["00:00:00:00:00:01", "dynamic"]));
        row
    }

    #[test]
    fn uuid_condition_matches_only_that_row() {
        let uuid = Uuid::new_v4();
        let cond = Condition::uuid_eq(uuid);
        assert!(cond.matches(uuid, &port_row()));
        assert!(!cond.matches(Uuid::new_v4(), &port_row()));
    }

    #[test]
    fn includes_and_excludes() {
        let uuid = Uuid::new_v4();
        let includes = Condition {
            column: "addresses".into(),
            function: Function::Includes,
            value: Datum::set(["dynamic"]),
        };
        assert!(includes.matches(uuid, &port_row()));

        let excludes = Condition {
            column: "addresses".into(),
            function: Function::Excludes,
            value: Datum::set(["dynamic"]),
        };
        assert!(!excludes.matches(uuid, &port_row()));
    }

    #[test]
    fn missing_column_never_matches() {
        let cond = Condition::eq("type", Datum::scalar("router"));
        assert!(!cond.matches(Uuid::new_v4(), &port_row()));
    }

    #[test]
    fn operation_metadata() {
        let op = Operation::Delete {
            table: "Logical_Switch".into(),
            conditions: vec![],
        };
        assert_eq!(op.table(), Some("Logical_Switch"));
        assert_eq!(op.name(), "delete");
        assert!(op.is_mutating());

        let comment = Operation::Comment {
            comment: "reconcile".into(),
        };
        assert_eq!(comment.table(), None);
        assert!(!comment.is_mutating());
    }
}
