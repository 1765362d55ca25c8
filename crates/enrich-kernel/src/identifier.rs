//! Component identifiers.
//!
//! A component is addressed either by an opaque string token or by a flat,
//! ordered key → value mapping. Structured identifiers may carry one of the
//! host's three wildcard markers in place of a concrete value, which turns
//! them into patterns that match a whole "class" of components.
//!
//! Wire shape (must stay compatible with the host's client-side matcher):
//!
//! ```text
//! "log"                                  simple
//! {"index":3,"type":"button"}            structured, concrete
//! {"index":["ALL"],"type":"button"}      structured, pattern
//! ```
//!
//! Keys are kept sorted so that serialization is canonical.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One of the host's reserved wildcard markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Wildcard {
    All,
    Match,
    AllSmaller,
}

pub const ALL: Wildcard = Wildcard::All;
pub const MATCH: Wildcard = Wildcard::Match;
pub const ALL_SMALLER: Wildcard = Wildcard::AllSmaller;

impl Wildcard {
    /// The reserved token used on the wire.
    pub fn token(self) -> &'static str {
        match self {
            Wildcard::All => "ALL",
            Wildcard::Match => "MATCH",
            Wildcard::AllSmaller => "ALLSMALLER",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ALL" => Some(Wildcard::All),
            "MATCH" => Some(Wildcard::Match),
            "ALLSMALLER" => Some(Wildcard::AllSmaller),
            _ => None,
        }
    }

    /// Whether the marker can select several components at once.
    pub fn is_multi(self) -> bool {
        matches!(self, Wildcard::All | Wildcard::AllSmaller)
    }
}

impl fmt::Display for Wildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A value inside a structured identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Wildcard(Wildcard),
}

impl IdValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            IdValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn wildcard(&self) -> Option<Wildcard> {
        match self {
            IdValue::Wildcard(w) => Some(*w),
            _ => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, IdValue::Wildcard(_))
    }
}

impl Serialize for IdValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IdValue::Str(s) => serializer.serialize_str(s),
            IdValue::Int(n) => serializer.serialize_i64(*n),
            IdValue::Bool(b) => serializer.serialize_bool(*b),
            IdValue::Wildcard(w) => [w.token()].serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Marker((String,)),
}

impl<'de> Deserialize<'de> for IdValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawIdValue::deserialize(deserializer)? {
            RawIdValue::Str(s) => Ok(IdValue::Str(s)),
            RawIdValue::Int(n) => Ok(IdValue::Int(n)),
            RawIdValue::Bool(b) => Ok(IdValue::Bool(b)),
            RawIdValue::Marker((token,)) => Wildcard::from_token(&token)
                .map(IdValue::Wildcard)
                .ok_or_else(|| D::Error::custom(format!("unknown wildcard marker: {token}"))),
        }
    }
}

impl From<&str> for IdValue {
    fn from(value: &str) -> Self {
        IdValue::Str(value.to_string())
    }
}

impl From<String> for IdValue {
    fn from(value: String) -> Self {
        IdValue::Str(value)
    }
}

impl From<i64> for IdValue {
    fn from(value: i64) -> Self {
        IdValue::Int(value)
    }
}

impl From<i32> for IdValue {
    fn from(value: i32) -> Self {
        IdValue::Int(i64::from(value))
    }
}

impl From<bool> for IdValue {
    fn from(value: bool) -> Self {
        IdValue::Bool(value)
    }
}

impl From<Wildcard> for IdValue {
    fn from(value: Wildcard) -> Self {
        IdValue::Wildcard(value)
    }
}

/// A flat key → value identifier, sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredId(BTreeMap<String, IdValue>);

impl StructuredId {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<IdValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<IdValue>) -> Option<IdValue> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<IdValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&IdValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IdValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut IdValue> {
        self.0.values_mut()
    }

    /// Overwrite (or add) every entry of `other`.
    pub fn extend_from(&mut self, other: &StructuredId) {
        for (k, v) in other.iter() {
            self.0.insert(k.to_string(), v.clone());
        }
    }

    /// Wildcards present in this identifier, in key order.
    pub fn wildcards(&self) -> Vec<Wildcard> {
        self.0.values().filter_map(IdValue::wildcard).collect()
    }

    pub fn is_pattern(&self) -> bool {
        self.0.values().any(IdValue::is_wildcard)
    }

    /// Two identifiers have the same shape when their key sets are equal.
    pub fn same_shape(&self, other: &StructuredId) -> bool {
        self.0.len() == other.0.len() && self.0.keys().zip(other.0.keys()).all(|(a, b)| a == b)
    }

    /// Pattern match `concrete` against `self`.
    ///
    /// Shapes must agree; every non-wildcard value must be equal. `ALLSMALLER`
    /// only matches integers (its ordering constraint is evaluated relative
    /// to a `MATCH` sibling by the host, not here).
    pub fn matches(&self, concrete: &StructuredId) -> bool {
        if !self.same_shape(concrete) {
            return false;
        }
        self.0.iter().all(|(key, pattern)| {
            let Some(value) = concrete.0.get(key) else {
                return false;
            };
            match pattern {
                IdValue::Wildcard(Wildcard::AllSmaller) => matches!(value, IdValue::Int(_)),
                IdValue::Wildcard(_) => true,
                other => other == value,
            }
        })
    }

    /// Copy of this identifier with the given keys dropped.
    pub fn without_keys(&self, drop: impl Fn(&str, &IdValue) -> bool) -> StructuredId {
        StructuredId(
            self.0
                .iter()
                .filter(|(k, v)| !drop(k, v))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<IdValue>> FromIterator<(K, V)> for StructuredId {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        StructuredId(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for StructuredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// The identifier of a component: simple token or structured mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComponentId {
    Simple(String),
    Structured(StructuredId),
}

impl ComponentId {
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            ComponentId::Simple(s) => Some(s),
            ComponentId::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredId> {
        match self {
            ComponentId::Simple(_) => None,
            ComponentId::Structured(id) => Some(id),
        }
    }

    pub fn is_pattern(&self) -> bool {
        self.as_structured().is_some_and(StructuredId::is_pattern)
    }

    pub fn wildcards(&self) -> Vec<Wildcard> {
        self.as_structured()
            .map(StructuredId::wildcards)
            .unwrap_or_default()
    }

    /// Whether `concrete` is selected by this (possibly pattern) identifier.
    pub fn matches(&self, concrete: &ComponentId) -> bool {
        match (self, concrete) {
            (ComponentId::Simple(a), ComponentId::Simple(b)) => a == b,
            (ComponentId::Structured(pattern), ComponentId::Structured(id)) => pattern.matches(id),
            _ => false,
        }
    }

    /// Structured view, wrapping a simple token under `key`.
    pub fn to_structured(&self, key: &str) -> StructuredId {
        match self {
            ComponentId::Simple(s) => StructuredId::new().with(key, s.as_str()),
            ComponentId::Structured(id) => id.clone(),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentId::Simple(s) => f.write_str(s),
            ComponentId::Structured(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        ComponentId::Simple(value.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        ComponentId::Simple(value)
    }
}

impl From<&String> for ComponentId {
    fn from(value: &String) -> Self {
        ComponentId::Simple(value.clone())
    }
}

impl From<StructuredId> for ComponentId {
    fn from(value: StructuredId) -> Self {
        ComponentId::Structured(value)
    }
}
