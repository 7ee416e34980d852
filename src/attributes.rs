//! Attributes
//!
//! Typed key/value pairs and the canonical `AttributeSet` used as the
//! aggregation key inside an instrument.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

// =============================================================================
// Attribute Value
// =============================================================================

/// Value half of an attribute pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl AttributeValue {
    fn rank(&self) -> u8 {
        match self {
            AttributeValue::Bool(_) => 0,
            AttributeValue::I64(_) => 1,
            AttributeValue::F64(_) => 2,
            AttributeValue::String(_) => 3,
        }
    }
}

// F64 compares by bit pattern so a set can be hashed and used as a map key.
impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a == b,
            (AttributeValue::I64(a), AttributeValue::I64(b)) => a == b,
            (AttributeValue::F64(a), AttributeValue::F64(b)) => a.to_bits() == b.to_bits(),
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AttributeValue {}

impl Hash for AttributeValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            AttributeValue::Bool(v) => v.hash(state),
            AttributeValue::I64(v) => v.hash(state),
            AttributeValue::F64(v) => v.to_bits().hash(state),
            AttributeValue::String(v) => v.hash(state),
        }
    }
}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (AttributeValue::Bool(a), AttributeValue::Bool(b)) => a.cmp(b),
            (AttributeValue::I64(a), AttributeValue::I64(b)) => a.cmp(b),
            (AttributeValue::F64(a), AttributeValue::F64(b)) => a.total_cmp(b),
            (AttributeValue::String(a), AttributeValue::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::I64(v) => write!(f, "{}", v),
            AttributeValue::F64(v) => write!(f, "{}", v),
            AttributeValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::I64(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::F64(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

// =============================================================================
// Key Value
// =============================================================================

/// A single attribute pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Shorthand for a string-valued attribute
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, AttributeValue::String(value.into()))
    }
}

// =============================================================================
// Attribute Set
// =============================================================================

/// Canonical set of attributes: sorted by key, one value per key.
///
/// When the same key is supplied more than once the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributeSet(Vec<KeyValue>);

impl AttributeSet {
    /// The empty set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Canonicalize a list of pairs
    pub fn new(pairs: impl IntoIterator<Item = KeyValue>) -> Self {
        let mut pairs: Vec<KeyValue> = pairs.into_iter().collect();
        // Stable sort keeps supply order among equal keys, so the last one is kept below.
        pairs.sort_by(|a, b| a.key.cmp(&b.key));

        let mut canonical: Vec<KeyValue> = Vec::with_capacity(pairs.len());
        for kv in pairs {
            match canonical.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => canonical.push(kv),
            }
        }
        Self(canonical)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|idx| &self.0[idx].value)
    }
}

impl From<&[KeyValue]> for AttributeSet {
    fn from(pairs: &[KeyValue]) -> Self {
        Self::new(pairs.iter().cloned())
    }
}

impl<const N: usize> From<[KeyValue; N]> for AttributeSet {
    fn from(pairs: [KeyValue; N]) -> Self {
        Self::new(pairs)
    }
}

impl FromIterator<KeyValue> for AttributeSet {
    fn from_iter<I: IntoIterator<Item = KeyValue>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, kv) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}=\"{}\"", kv.key, kv.value)?;
        }
        write!(f, "}}")
    }
}

// =============================================================================
// Tests
// =============================================================================
