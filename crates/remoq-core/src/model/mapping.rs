use crate::{
    model::registry::Described,
    node::{ArgValue, Record, TypeName},
    value::Value,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as Json;
use thiserror::Error as ThisError;

///
/// Value mapping
///
/// Converts between user types and the generic record transfer form, with
/// `serde_json::Value` as the intermediate. Consulted wherever a captured
/// constant is wrapped or a result row is mapped back into a typed object.
///

/// Type path given to anonymous records: projection results and nested
/// object fields, which carry no descriptor of their own.
pub const ANON_RECORD_PATH: &str = "record";

///
/// MapError
///

#[derive(Debug, ThisError)]
pub enum MapError {
    #[error("failed to serialize {type_name}: {message}")]
    Serialize { type_name: String, message: String },

    #[error("failed to deserialize {type_name}: {message}")]
    Deserialize { type_name: String, message: String },

    #[error("{type_name} did not serialize to an object")]
    NotAnObject { type_name: String },

    #[error("non-finite float in field {field}")]
    NonFinite { field: String },

    #[error("field {field} holds an expression and cannot map back to data")]
    ExprField { field: String },

    #[error("field {field} holds a resource placeholder and cannot map back to data")]
    ResourceField { field: String },
}

///
/// ValueMapper
///

pub trait ValueMapper: Send + Sync {
    fn record_from_json(&self, ty: TypeName, json: &Json) -> Result<Record, MapError>;

    fn json_from_record(&self, record: &Record) -> Result<Json, MapError>;
}

///
/// SerdeMapper
///
/// Default mapper: object keys become record fields in object order.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct SerdeMapper;

impl ValueMapper for SerdeMapper {
    fn record_from_json(&self, ty: TypeName, json: &Json) -> Result<Record, MapError> {
        let Json::Object(map) = json else {
            return Err(MapError::NotAnObject {
                type_name: ty.to_string(),
            });
        };

        let mut record = Record::new(ty);
        for (name, value) in map {
            record.push(name.clone(), arg_from_json(value));
        }

        Ok(record)
    }

    fn json_from_record(&self, record: &Record) -> Result<Json, MapError> {
        let mut map = serde_json::Map::with_capacity(record.len());
        for (name, value) in &record.fields {
            map.insert(name.clone(), json_from_arg(name, value)?);
        }

        Ok(Json::Object(map))
    }
}

/// Wrap a typed value into a record via its serde object form.
pub fn to_record<T>(mapper: &dyn ValueMapper, value: &T) -> Result<Record, MapError>
where
    T: Described + Serialize,
{
    let json = serde_json::to_value(value).map_err(|err| MapError::Serialize {
        type_name: T::PATH.to_string(),
        message: err.to_string(),
    })?;

    mapper.record_from_json(T::type_name(), &json)
}

/// Re-hydrate a typed value from a record via its serde object form.
pub fn from_record<T>(mapper: &dyn ValueMapper, record: &Record) -> Result<T, MapError>
where
    T: Described + DeserializeOwned,
{
    let json = mapper.json_from_record(record)?;
    serde_json::from_value(json).map_err(|err| MapError::Deserialize {
        type_name: T::PATH.to_string(),
        message: err.to_string(),
    })
}

///
/// JSON <-> value bridges
///

fn arg_from_json(json: &Json) -> ArgValue {
    match json {
        Json::Array(items) => {
            if items.iter().all(is_scalar_json) {
                ArgValue::Scalar(Value::List(items.iter().map(scalar_from_json).collect()))
            } else {
                ArgValue::List(items.iter().map(arg_from_json).collect())
            }
        }
        Json::Object(map) => {
            let mut record = Record::new(TypeName::new(ANON_RECORD_PATH));
            for (name, value) in map {
                record.push(name.clone(), arg_from_json(value));
            }
            ArgValue::Record(record)
        }
        scalar => ArgValue::Scalar(scalar_from_json(scalar)),
    }
}

const fn is_scalar_json(json: &Json) -> bool {
    !matches!(json, Json::Array(_) | Json::Object(_))
}

fn scalar_from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        // callers filter these out via is_scalar_json
        Json::Array(_) | Json::Object(_) => Value::Null,
    }
}

fn json_from_arg(field: &str, arg: &ArgValue) -> Result<Json, MapError> {
    match arg {
        ArgValue::Scalar(v) => json_from_value(field, v),
        ArgValue::Record(r) => SerdeMapper.json_from_record(r),
        ArgValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_from_arg(field, item)?);
            }
            Ok(Json::Array(out))
        }
        ArgValue::Expr(_) => Err(MapError::ExprField {
            field: field.to_string(),
        }),
        ArgValue::Resource(_) => Err(MapError::ResourceField {
            field: field.to_string(),
        }),
    }
}

/// Map a scalar into its JSON form. Temporal and identity scalars map to
/// their canonical text forms.
pub fn json_from_value(field: &str, value: &Value) -> Result<Json, MapError> {
    let json = match value {
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Uint(u) => Json::from(*u),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(Json::Number)
            .ok_or_else(|| MapError::NonFinite {
                field: field.to_string(),
            })?,
        Value::BigInt(b) => Json::String(b.to_string()),
        Value::Text(s) => Json::String(s.clone()),
        Value::Char(c) => Json::String(c.to_string()),
        Value::Bytes(b) => Json::Array(b.iter().map(|byte| Json::from(*byte)).collect()),
        Value::Date(d) => Json::String(d.to_string()),
        Value::Timestamp(t) => Json::String(t.to_string()),
        Value::Ulid(u) => Json::String(u.to_string()),
        Value::Null => Json::Null,
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_from_value(field, item)?);
            }
            Json::Array(out)
        }
    };

    Ok(json)
}

// ============================================================================
// Tests
// ============================================================================
