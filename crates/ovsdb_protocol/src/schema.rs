//! Pre-parsed database schema model.
//!
//! Schemas are supplied as already-validated objects; this crate does not
//! parse schema definition files. The model covers what the replication
//! engine needs: table and column names, column types (including
//! cross-table references), mutability and the root-table flag that drives
//! server-side garbage collection.

use crate::error::{ProtocolError, ProtocolResult};
use crate::value::{Atom, AtomType, Datum};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of the implicit row identifier column present in every table.
pub const UUID_COLUMN: &str = "_uuid";

/// Strength of a reference between tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefType {
    /// Dangling strong references make a transaction fail.
    Strong,
    /// Dangling weak references are silently dropped.
    Weak,
}

/// Type of a column key or map value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseType {
    /// Atom type.
    pub atom_type: AtomType,
    /// Referenced table, for UUID atoms that point at rows.
    pub ref_table: Option<String>,
    /// Reference strength (meaningful only with `ref_table`).
    pub ref_type: RefType,
}

impl BaseType {
    fn plain(atom_type: AtomType) -> Self {
        Self {
            atom_type,
            ref_table: None,
            ref_type: RefType::Strong,
        }
    }

    /// Integer base type.
    pub fn integer() -> Self {
        Self::plain(AtomType::Integer)
    }

    /// Real base type.
    pub fn real() -> Self {
        Self::plain(AtomType::Real)
    }

    /// Boolean base type.
    pub fn boolean() -> Self {
        Self::plain(AtomType::Boolean)
    }

    /// String base type.
    pub fn string() -> Self {
        Self::plain(AtomType::String)
    }

    /// Unconstrained UUID base type.
    pub fn uuid() -> Self {
        Self::plain(AtomType::Uuid)
    }

    /// Strong reference to rows of `table`.
    pub fn reference(table: impl Into<String>) -> Self {
        Self {
            atom_type: AtomType::Uuid,
            ref_table: Some(table.into()),
            ref_type: RefType::Strong,
        }
    }

    /// Weak reference to rows of `table`.
    pub fn weak_reference(table: impl Into<String>) -> Self {
        Self {
            atom_type: AtomType::Uuid,
            ref_table: Some(table.into()),
            ref_type: RefType::Weak,
        }
    }

    /// Checks that `atom` has this base type's atom type.
    pub fn check_atom(&self, atom: &Atom) -> ProtocolResult<()> {
        if atom.atom_type() == self.atom_type {
            Ok(())
        } else {
            Err(ProtocolError::type_mismatch(
                self.atom_type.to_string(),
                atom.atom_type().to_string(),
            ))
        }
    }
}

/// Type of a column: a key type, an optional value type (maps), and
/// cardinality bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnType {
    /// Key (or element) type.
    pub key: BaseType,
    /// Value type for map columns.
    pub value: Option<BaseType>,
    /// Minimum number of elements.
    pub min: usize,
    /// Maximum number of elements, `None` for unlimited.
    pub max: Option<usize>,
}

impl ColumnType {
    /// Exactly one atom.
    pub fn scalar(key: BaseType) -> Self {
        Self {
            key,
            value: None,
            min: 1,
            max: Some(1),
        }
    }

    /// Zero or one atom.
    pub fn optional(key: BaseType) -> Self {
        Self {
            key,
            value: None,
            min: 0,
            max: Some(1),
        }
    }

    /// Any number of atoms.
    pub fn set(key: BaseType) -> Self {
        Self {
            key,
            value: None,
            min: 0,
            max: None,
        }
    }

    /// Any number of key/value pairs.
    pub fn map(key: BaseType, value: BaseType) -> Self {
        Self {
            key,
            value: Some(value),
            min: 0,
            max: None,
        }
    }

    /// Returns true for single-atom columns.
    pub fn is_scalar(&self) -> bool {
        self.value.is_none() && self.min == 1 && self.max == Some(1)
    }

    /// Returns true for map columns.
    pub fn is_map(&self) -> bool {
        self.value.is_some()
    }

    /// Returns true for set columns (including optional scalars).
    pub fn is_set(&self) -> bool {
        !self.is_scalar() && !self.is_map()
    }

    /// Returns the value a freshly inserted row holds in this column.
    pub fn default_datum(&self) -> Datum {
        if self.is_map() {
            Datum::empty_map()
        } else if self.is_scalar() {
            Datum::Scalar(self.key.atom_type.default_atom())
        } else {
            Datum::empty_set()
        }
    }

    /// Iterates over the base types that reference other tables.
    pub fn references(&self) -> impl Iterator<Item = &BaseType> {
        std::iter::once(&self.key)
            .chain(self.value.iter())
            .filter(|base| base.ref_table.is_some())
    }

    /// Checks that `datum` has the shape, atom types and cardinality this
    /// column requires.
    pub fn check(&self, datum: &Datum) -> ProtocolResult<()> {
        match (datum, &self.value) {
            (Datum::Map(map), Some(value_type)) => {
                for (k, v) in map {
                    self.key.check_atom(k)?;
                    value_type.check_atom(v)?;
                }
                self.check_len(map.len())
            }
            (Datum::Scalar(atom), None) if self.is_scalar() => self.key.check_atom(atom),
            (Datum::Set(set), None) if !self.is_scalar() => {
                for atom in set {
                    self.key.check_atom(atom)?;
                }
                self.check_len(set.len())
            }
            (other, _) => Err(ProtocolError::type_mismatch(
                self.shape(),
                other.kind().to_string(),
            )),
        }
    }

    fn check_len(&self, len: usize) -> ProtocolResult<()> {
        let too_many = self.max.is_some_and(|max| len > max);
        if len < self.min || too_many {
            return Err(ProtocolError::type_mismatch(
                format!(
                    "{} to {} elements",
                    self.min,
                    self.max.map_or("unlimited".to_string(), |m| m.to_string())
                ),
                format!("{len} elements"),
            ));
        }
        Ok(())
    }

    fn shape(&self) -> String {
        if self.is_map() {
            "map".to_string()
        } else if self.is_scalar() {
            "scalar".to_string()
        } else {
            "set".to_string()
        }
    }
}

/// Schema of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Whether the column may be changed after insert.
    pub mutable: bool,
}

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns by name (excluding the implicit `_uuid`).
    pub columns: BTreeMap<String, ColumnSchema>,
    /// Root tables keep rows that nothing references; rows of non-root
    /// tables are garbage collected once unreferenced.
    pub is_root: bool,
}

impl TableSchema {
    /// Creates an empty root table schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: BTreeMap::new(),
            is_root: true,
        }
    }

    /// Marks the table as non-root.
    pub fn non_root(mut self) -> Self {
        self.is_root = false;
        self
    }

    /// Adds a mutable column.
    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        let name = name.into();
        self.columns.insert(
            name.clone(),
            ColumnSchema {
                name,
                column_type,
                mutable: true,
            },
        );
        self
    }

    /// Adds a column that cannot change after insert.
    pub fn with_immutable_column(
        mut self,
        name: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        let name = name.into();
        self.columns.insert(
            name.clone(),
            ColumnSchema {
                name,
                column_type,
                mutable: false,
            },
        );
        self
    }

    /// Looks up a column.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    /// Returns the default value of every column.
    pub fn default_row(&self) -> BTreeMap<String, Datum> {
        self.columns
            .values()
            .map(|c| (c.name.clone(), c.column_type.default_datum()))
            .collect()
    }

    /// Returns a copy restricted to `columns` (all columns when `None`).
    pub fn restricted(&self, columns: Option<&BTreeSet<String>>) -> TableSchema {
        match columns {
            None => self.clone(),
            Some(keep) => TableSchema {
                name: self.name.clone(),
                columns: self
                    .columns
                    .iter()
                    .filter(|(name, _)| keep.contains(*name))
                    .map(|(name, c)| (name.clone(), c.clone()))
                    .collect(),
                is_root: self.is_root,
            },
        }
    }
}

/// Schema of a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Database name (e.g. `OVN_Northbound`).
    pub name: String,
    /// Schema version string.
    pub version: String,
    /// Tables by name.
    pub tables: BTreeMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tables: BTreeMap::new(),
        }
    }

    /// Adds a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Looks up a column of a table.
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnSchema> {
        self.table(table).and_then(|t| t.column(column))
    }
}
