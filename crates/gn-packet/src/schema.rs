//! Parameter schema reported by the engine for the target modifier

use crate::params::{ParameterSnapshot, ParameterValue};
use crate::protocol::{ProtocolError, ServerMessage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Input socket type as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    Float,
    Int,
    Bool,
    #[serde(rename = "string")]
    Text,
    FloatArray,
    #[serde(other)]
    Unknown,
}

/// One modifier input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Key used in `set` messages
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_max: Option<f64>,
    /// Engine-side range the UI range is scaled into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_max: Option<f64>,
    /// Element count for `float_array`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

/// Why a value does not fit its descriptor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterIssue {
    #[error("'{0}' is not a parameter of this modifier")]
    Unknown(String),
    #[error("'{identifier}' expects {expected}, got {found}")]
    WrongType {
        identifier: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("'{identifier}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        identifier: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("'{identifier}' expects {expected} components, got {found}")]
    WrongLength {
        identifier: String,
        expected: usize,
        found: usize,
    },
}

impl ParameterIssue {
    pub fn identifier(&self) -> &str {
        match self {
            ParameterIssue::Unknown(identifier)
            | ParameterIssue::WrongType { identifier, .. }
            | ParameterIssue::OutOfRange { identifier, .. }
            | ParameterIssue::WrongLength { identifier, .. } => identifier,
        }
    }
}

impl ParameterDescriptor {
    /// Identifier, falling back to the name for engines that only send one.
    pub fn key(&self) -> &str {
        if self.identifier.is_empty() {
            &self.name
        } else {
            &self.identifier
        }
    }

    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(display) if !display.is_empty() => display,
            _ if !self.name.is_empty() => &self.name,
            _ => &self.identifier,
        }
    }

    /// Integer socket with an engine range of exactly 0..1, shown as a checkbox.
    pub fn is_toggle(&self) -> bool {
        self.kind == ParameterKind::Int
            && self.original_min == Some(0.0)
            && self.original_max == Some(1.0)
    }

    /// Slider range: soft bounds, then hard bounds, then 0..1.
    pub fn control_range(&self) -> (f64, f64) {
        let lo = self.soft_min.or(self.min).unwrap_or(0.0);
        let hi = self.soft_max.or(self.max).unwrap_or(1.0);
        (lo, hi)
    }

    pub fn default_value(&self) -> Option<ParameterValue> {
        if let Some(default) = &self.default {
            return Some(default.clone());
        }
        match self.kind {
            ParameterKind::Bool => Some(ParameterValue::Bool(false)),
            ParameterKind::Text => Some(ParameterValue::Text(String::new())),
            ParameterKind::FloatArray => {
                Some(ParameterValue::Vector(vec![0.0; self.length.unwrap_or(3)]))
            }
            ParameterKind::Int if self.is_toggle() => Some(ParameterValue::from(0i64)),
            ParameterKind::Int | ParameterKind::Float => {
                ParameterValue::float(self.soft_min.or(self.min).unwrap_or(0.0))
            }
            ParameterKind::Unknown => None,
        }
    }

    pub fn check(&self, value: &ParameterValue) -> Result<(), ParameterIssue> {
        let wrong_type = |expected| ParameterIssue::WrongType {
            identifier: self.key().to_string(),
            expected,
            found: value.kind_name(),
        };

        match (self.kind, value) {
            (ParameterKind::Unknown, _) => Ok(()),
            (ParameterKind::Bool, ParameterValue::Bool(_)) => Ok(()),
            (ParameterKind::Text, ParameterValue::Text(_)) => Ok(()),
            (ParameterKind::FloatArray, ParameterValue::Vector(items)) => match self.length {
                Some(expected) if expected != items.len() => Err(ParameterIssue::WrongLength {
                    identifier: self.key().to_string(),
                    expected,
                    found: items.len(),
                }),
                _ => Ok(()),
            },
            (ParameterKind::Int | ParameterKind::Float, ParameterValue::Number(n)) => {
                let v = n.as_f64().unwrap_or(f64::NAN);
                if self.kind == ParameterKind::Int && v.fract() != 0.0 {
                    return Err(wrong_type("an integer"));
                }
                let min = self.min.unwrap_or(f64::NEG_INFINITY);
                let max = self.max.unwrap_or(f64::INFINITY);
                if v < min || v > max {
                    return Err(ParameterIssue::OutOfRange {
                        identifier: self.key().to_string(),
                        value: v,
                        min,
                        max,
                    });
                }
                Ok(())
            }
            (ParameterKind::Bool, _) => Err(wrong_type("a bool")),
            (ParameterKind::Text, _) => Err(wrong_type("a string")),
            (ParameterKind::FloatArray, _) => Err(wrong_type("an array")),
            (ParameterKind::Int, _) => Err(wrong_type("an integer")),
            (ParameterKind::Float, _) => Err(wrong_type("a number")),
        }
    }
}

/// The `{"type":"schema", ...}` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifier: Option<String>,
    #[serde(default)]
    pub params: Vec<ParameterDescriptor>,
}

impl SchemaDescription {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        match ServerMessage::parse(text)? {
            ServerMessage::Schema(schema) => Ok(schema),
            ServerMessage::Error { message } => Err(ProtocolError::Remote(message)),
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&ParameterDescriptor> {
        self.params.iter().find(|p| p.key() == identifier)
    }

    /// Defaults for every parameter that has one, keyed by identifier.
    pub fn defaults(&self) -> ParameterSnapshot {
        self.params
            .iter()
            .filter_map(|p| p.default_value().map(|v| (p.key().to_string(), v)))
            .collect()
    }

    /// Every problem with `snapshot`, in identifier order.
    pub fn check_snapshot(&self, snapshot: &ParameterSnapshot) -> Vec<ParameterIssue> {
        snapshot
            .iter()
            .filter_map(|(identifier, value)| match self.get(identifier) {
                Some(descriptor) => descriptor.check(value).err(),
                None => Some(ParameterIssue::Unknown(identifier.clone())),
            })
            .collect()
    }
}
