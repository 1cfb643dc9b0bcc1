//! Parameter values and per-session snapshots

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single modifier input as sent by the client.
///
/// Numbers keep their JSON representation so integers reach the engine as
/// integers. Nulls, objects and nested arrays do not deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    Vector(Vec<f64>),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Number(_) => "number",
            ParameterValue::Text(_) => "string",
            ParameterValue::Vector(_) => "array",
        }
    }

    /// `None` for NaN and infinities, which JSON cannot carry.
    pub fn float(v: f64) -> Option<Self> {
        serde_json::Number::from_f64(v).map(ParameterValue::Number)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Number(v.into())
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

/// Partial update carried by a `set` message.
pub type ParameterMap = BTreeMap<String, ParameterValue>;

/// Complete identifier -> value mapping for one session.
///
/// Snapshots are never edited in place: [`ParameterSnapshot::merged`] returns
/// a new one, so a copy handed to a running build stays as it was.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSnapshot(ParameterMap);

impl ParameterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<&ParameterValue> {
        self.0.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterValue)> {
        self.0.iter()
    }

    /// Last writer wins per key, keys from both sides are kept.
    pub fn merged(&self, updates: &ParameterMap) -> Self {
        let mut values = self.0.clone();
        values.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self(values)
    }

    /// Compact JSON object, keys in sorted order.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }
}

impl From<ParameterMap> for ParameterSnapshot {
    fn from(values: ParameterMap) -> Self {
        Self(values)
    }
}

impl<K: Into<String>, V: Into<ParameterValue>> FromIterator<(K, V)> for ParameterSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
