use crate::{
    node::{ast::Expr, types::TypeName},
    value::Value,
};
use derive_more::IntoIterator;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error as ThisError;

///
/// ArgValue
///
/// A captured argument as it travels on the wire: a scalar, a wrapped
/// record (property bag), a list of either, a nested expression tree, or a
/// resource placeholder.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ArgValue {
    Scalar(Value),
    Record(Record),
    List(Vec<ArgValue>),
    Expr(Box<Expr>),
    Resource(ResourceRef),
}

impl ArgValue {
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Record(_) => "record",
            Self::List(_) => "list",
            Self::Expr(_) => "expr",
            Self::Resource(_) => "resource",
        }
    }

    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Value> {
        if let Self::Scalar(v) = self { Some(v) } else { None }
    }
}

impl From<Value> for ArgValue {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

///
/// Record
///
/// The generic property bag a non-primitive captured constant is deep-copied
/// into, so the wire never carries arbitrary user types. Field order is
/// insertion order; duplicate field names are rejected at decode time.
///

#[derive(Clone, Debug, PartialEq, IntoIterator, Serialize)]
pub struct Record {
    pub type_name: TypeName,
    #[into_iterator(owned, ref)]
    pub fields: Vec<(String, ArgValue)>,
}

///
/// RecordError
///

#[derive(Debug, ThisError)]
pub enum RecordError {
    #[error("record {type_name} has duplicate field {name}")]
    DuplicateField { type_name: String, name: String },
}

impl Record {
    #[must_use]
    pub fn new(type_name: TypeName) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: ArgValue) {
        self.fields.push((name.into(), value));
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: ArgValue) -> Self {
        self.push(name, value);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.fields
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn check_fields(&self) -> Result<(), RecordError> {
        for (i, (name, _)) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|(n, _)| n == name) {
                return Err(RecordError::DuplicateField {
                    type_name: self.type_name.to_string(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }
}

///
/// RecordWire
///
/// Decode shadow for `Record`: the wire shape matches the struct, and
/// invariants are re-checked before the value is admitted.
///

#[derive(Deserialize)]
struct RecordWire {
    type_name: TypeName,
    #[serde(default)]
    fields: Vec<(String, ArgValue)>,
}

impl RecordWire {
    fn into_record(self) -> Result<Record, RecordError> {
        let record = Record {
            type_name: self.type_name,
            fields: self.fields,
        };
        record.check_fields()?;

        Ok(record)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = RecordWire::deserialize(deserializer)?;
        wire.into_record().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{ ", self.type_name)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                ArgValue::Scalar(v) => write!(f, "{name}: {v}")?,
                other => write!(f, "{name}: <{}>", other.kind_label())?,
            }
        }
        write!(f, " }}")
    }
}

///
/// ResourceRef
///
/// Placeholder for a live queryable source. One ref per distinct source;
/// bound back to a live queryable by element type during pipeline prepare.
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub element: TypeName,
}

impl ResourceRef {
    #[must_use]
    pub const fn new(element: TypeName) -> Self {
        Self { element }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource<{}>", self.element)
    }
}

// ============================================================================
// Tests
// ============================================================================
