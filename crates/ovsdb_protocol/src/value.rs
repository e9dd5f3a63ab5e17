//! Atoms and datums: the values stored in database columns.
//!
//! An [`Atom`] is a single scalar. A [`Datum`] is the value of one column of
//! one row and is either a scalar, a set of atoms, or a map from atoms to
//! atoms. Sets of UUID atoms are how rows reference rows of other tables.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// The type of an atom as declared by a column schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AtomType {
    /// 64-bit signed integer.
    Integer,
    /// Double precision float.
    Real,
    /// Boolean.
    Boolean,
    /// UTF-8 string.
    String,
    /// Row identifier.
    Uuid,
}

impl AtomType {
    /// Returns the default atom of this type.
    pub fn default_atom(self) -> Atom {
        match self {
            AtomType::Integer => Atom::Integer(0),
            AtomType::Real => Atom::Real(0.0),
            AtomType::Boolean => Atom::Boolean(false),
            AtomType::String => Atom::String(String::new()),
            AtomType::Uuid => Atom::Uuid(Uuid::nil()),
        }
    }
}

impl fmt::Display for AtomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AtomType::Integer => "integer",
            AtomType::Real => "real",
            AtomType::Boolean => "boolean",
            AtomType::String => "string",
            AtomType::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// A single scalar value.
///
/// `NamedUuid` only appears inside transaction requests: it names a row
/// inserted earlier in the same transaction and is replaced by the real UUID
/// when the server executes the transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Atom {
    /// Integer atom.
    Integer(i64),
    /// Real atom. Ordered with `f64::total_cmp`.
    Real(f64),
    /// Boolean atom.
    Boolean(bool),
    /// String atom.
    String(String),
    /// Reference to a committed row.
    Uuid(Uuid),
    /// Reference to a row inserted by the same transaction.
    NamedUuid(String),
}

impl Atom {
    /// Returns the type of this atom. Named UUIDs report [`AtomType::Uuid`].
    pub fn atom_type(&self) -> AtomType {
        match self {
            Atom::Integer(_) => AtomType::Integer,
            Atom::Real(_) => AtomType::Real,
            Atom::Boolean(_) => AtomType::Boolean,
            Atom::String(_) => AtomType::String,
            Atom::Uuid(_) | Atom::NamedUuid(_) => AtomType::Uuid,
        }
    }

    /// Returns the string content, if this is a string atom.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer atom.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Atom::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a boolean atom.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the UUID, if this is a (resolved) UUID atom.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Atom::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Atom::Integer(_) => 0,
            Atom::Real(_) => 1,
            Atom::Boolean(_) => 2,
            Atom::String(_) => 3,
            Atom::Uuid(_) => 4,
            Atom::NamedUuid(_) => 5,
        }
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Atom {}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Atom::Integer(a), Atom::Integer(b)) => a.cmp(b),
            (Atom::Real(a), Atom::Real(b)) => a.total_cmp(b),
            (Atom::Boolean(a), Atom::Boolean(b)) => a.cmp(b),
            (Atom::String(a), Atom::String(b)) => a.cmp(b),
            (Atom::Uuid(a), Atom::Uuid(b)) => a.cmp(b),
            (Atom::NamedUuid(a), Atom::NamedUuid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Integer(i) => write!(f, "{i}"),
            Atom::Real(r) => write!(f, "{r}"),
            Atom::Boolean(b) => write!(f, "{b}"),
            Atom::String(s) => write!(f, "{s:?}"),
            Atom::Uuid(u) => write!(f, "{u}"),
            Atom::NamedUuid(name) => write!(f, "@{name}"),
        }
    }
}

impl From<i64> for Atom {
    fn from(value: i64) -> Self {
        Atom::Integer(value)
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::Real(value)
    }
}

impl From<bool> for Atom {
    fn from(value: bool) -> Self {
        Atom::Boolean(value)
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::String(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Atom::String(value)
    }
}

impl From<Uuid> for Atom {
    fn from(value: Uuid) -> Self {
        Atom::Uuid(value)
    }
}

/// The value of one column of one row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Datum {
    /// Exactly one atom.
    Scalar(Atom),
    /// Zero or more distinct atoms. Optional scalars are sets of at most one.
    Set(BTreeSet<Atom>),
    /// Key/value pairs with distinct keys.
    Map(BTreeMap<Atom, Atom>),
}

impl Datum {
    /// Creates a scalar datum.
    pub fn scalar(atom: impl Into<Atom>) -> Self {
        Datum::Scalar(atom.into())
    }

    /// Creates a set datum from any iterator of atoms.
    pub fn set<I, A>(atoms: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Atom>,
    {
        Datum::Set(atoms.into_iter().map(Into::into).collect())
    }

    /// Creates an empty set datum.
    pub fn empty_set() -> Self {
        Datum::Set(BTreeSet::new())
    }

    /// Creates a map datum from key/value pairs.
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Atom>,
        V: Into<Atom>,
    {
        Datum::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Creates an empty map datum.
    pub fn empty_map() -> Self {
        Datum::Map(BTreeMap::new())
    }

    /// Creates a set of UUID references.
    pub fn uuid_set(uuids: impl IntoIterator<Item = Uuid>) -> Self {
        Datum::Set(uuids.into_iter().map(Atom::Uuid).collect())
    }

    /// Returns the single atom of a scalar, or of a set holding exactly one
    /// atom (an optional scalar that is present).
    pub fn as_scalar(&self) -> Option<&Atom> {
        match self {
            Datum::Scalar(atom) => Some(atom),
            Datum::Set(set) if set.len() == 1 => set.iter().next(),
            _ => None,
        }
    }

    /// Returns the string content of a scalar string datum.
    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Atom::as_str)
    }

    /// Returns the integer content of a scalar integer datum.
    pub fn as_integer(&self) -> Option<i64> {
        self.as_scalar().and_then(Atom::as_integer)
    }

    /// Returns the UUID of a scalar UUID datum.
    pub fn as_uuid(&self) -> Option<Uuid> {
        self.as_scalar().and_then(Atom::as_uuid)
    }

    /// Returns the atoms of a set datum.
    pub fn as_set(&self) -> Option<&BTreeSet<Atom>> {
        match self {
            Datum::Set(set) => Some(set),
            _ => None,
        }
    }

    /// Returns the pairs of a map datum.
    pub fn as_map(&self) -> Option<&BTreeMap<Atom, Atom>> {
        match self {
            Datum::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true if the datum holds `atom`: equal scalar, set member or
    /// map key.
    pub fn contains(&self, atom: &Atom) -> bool {
        match self {
            Datum::Scalar(a) => a == atom,
            Datum::Set(set) => set.contains(atom),
            Datum::Map(map) => map.contains_key(atom),
        }
    }

    /// Returns the number of atoms (scalars count as one, maps count pairs).
    pub fn len(&self) -> usize {
        match self {
            Datum::Scalar(_) => 1,
            Datum::Set(set) => set.len(),
            Datum::Map(map) => map.len(),
        }
    }

    /// Returns true for empty sets and maps.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a short description of the datum's shape.
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Scalar(_) => "scalar",
            Datum::Set(_) => "set",
            Datum::Map(_) => "map",
        }
    }

    /// Iterates over every atom, including map keys and values.
    pub fn atoms(&self) -> Box<dyn Iterator<Item = &Atom> + '_> {
        match self {
            Datum::Scalar(atom) => Box::new(std::iter::once(atom)),
            Datum::Set(set) => Box::new(set.iter()),
            Datum::Map(map) => Box::new(map.iter().flat_map(|(k, v)| [k, v])),
        }
    }

    /// Rebuilds the datum with every atom passed through `f`.
    pub fn map_atoms(self, mut f: impl FnMut(Atom) -> Atom) -> Datum {
        match self {
            Datum::Scalar(atom) => Datum::Scalar(f(atom)),
            Datum::Set(set) => Datum::Set(set.into_iter().map(&mut f).collect()),
            Datum::Map(map) => Datum::Map(map.into_iter().map(|(k, v)| (f(k), f(v))).collect()),
        }
    }

    /// Inserts the atoms of `other` (mutator "insert").
    ///
    /// Sets take the union. Maps gain the pairs whose key is not already
    /// present; existing keys keep their value.
    pub fn insert_atoms(&mut self, other: &Datum) -> ProtocolResult<()> {
        match (self, other) {
            (Datum::Set(set), Datum::Set(add)) => {
                set.extend(add.iter().cloned());
                Ok(())
            }
            (Datum::Set(set), Datum::Scalar(atom)) => {
                set.insert(atom.clone());
                Ok(())
            }
            (Datum::Map(map), Datum::Map(add)) => {
                for (k, v) in add {
                    map.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Ok(())
            }
            (target, other) => Err(ProtocolError::invalid_mutation(format!(
                "cannot insert {} into {}",
                other.kind(),
                target.kind()
            ))),
        }
    }

    /// Removes the atoms of `other` (mutator "delete").
    ///
    /// Sets lose the given atoms. Maps lose the given keys when `other` is a
    /// set, or the exactly matching pairs when `other` is a map.
    pub fn remove_atoms(&mut self, other: &Datum) -> ProtocolResult<()> {
        match (self, other) {
            (Datum::Set(set), Datum::Set(remove)) => {
                set.retain(|atom| !remove.contains(atom));
                Ok(())
            }
            (Datum::Set(set), Datum::Scalar(atom)) => {
                set.remove(atom);
                Ok(())
            }
            (Datum::Map(map), Datum::Set(keys)) => {
                map.retain(|k, _| !keys.contains(k));
                Ok(())
            }
            (Datum::Map(map), Datum::Scalar(key)) => {
                map.remove(key);
                Ok(())
            }
            (Datum::Map(map), Datum::Map(pairs)) => {
                map.retain(|k, v| pairs.get(k) != Some(v));
                Ok(())
            }
            (target, other) => Err(ProtocolError::invalid_mutation(format!(
                "cannot delete {} from {}",
                other.kind(),
                target.kind()
            ))),
        }
    }

    /// Computes the incremental diff turning `old` into `new`.
    ///
    /// Returns `None` when the values are equal. Set diffs are the
    /// symmetric difference; map diffs carry removed pairs with their old
    /// value and added or changed pairs with their new value; anything else
    /// carries the new value.
    pub fn diff(old: &Datum, new: &Datum) -> Option<Datum> {
        if old == new {
            return None;
        }
        match (old, new) {
            (Datum::Set(a), Datum::Set(b)) => {
                Some(Datum::Set(a.symmetric_difference(b).cloned().collect()))
            }
            (Datum::Map(a), Datum::Map(b)) => {
                let mut diff = BTreeMap::new();
                for (k, v) in a {
                    if !b.contains_key(k) {
                        diff.insert(k.clone(), v.clone());
                    }
                }
                for (k, v) in b {
                    if a.get(k) != Some(v) {
                        diff.insert(k.clone(), v.clone());
                    }
                }
                Some(Datum::Map(diff))
            }
            _ => Some(new.clone()),
        }
    }

    /// Applies a diff produced by [`Datum::diff`].
    pub fn apply_diff(&mut self, diff: &Datum) {
        match (self, diff) {
            (Datum::Set(set), Datum::Set(changes)) => {
                for atom in changes {
                    if !set.remove(atom) {
                        set.insert(atom.clone());
                    }
                }
            }
            (Datum::Map(map), Datum::Map(changes)) => {
                for (k, v) in changes {
                    match map.get(k) {
                        Some(current) if current == v => {
                            map.remove(k);
                        }
                        _ => {
                            map.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
            (target, _) => *target = diff.clone(),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Scalar(atom) => write!(f, "{atom}"),
            Datum::Set(set) => {
                f.write_str("[")?;
                for (i, atom) in set.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{atom}")?;
                }
                f.write_str("]")
            }
            Datum::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                f.write_str("}")
            }
        }
    }
}
