use crate::node::TypeName;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error as ThisError;

///
/// Described
///
/// Implemented by user types that cross the pipeline boundary. The path is
/// the stable wire identity; it never has to match the Rust module path,
/// only be unique within one registry.
///

pub trait Described {
    const PATH: &'static str;

    #[must_use]
    fn type_name() -> TypeName {
        TypeName::new(Self::PATH)
    }
}

///
/// TypeModel
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TypeModel {
    pub name: TypeName,
    /// Field names in declaration order. Positional constructor arguments
    /// map onto this list.
    pub fields: Vec<String>,
    pub scalar: bool,
}

/// Shared handle to a resolved type model.
pub type ResolvedType = Arc<TypeModel>;

impl TypeModel {
    #[must_use]
    pub fn new(name: TypeName, fields: Vec<String>) -> Self {
        Self {
            name,
            fields,
            scalar: false,
        }
    }

    #[must_use]
    pub fn scalar(name: TypeName) -> Self {
        Self {
            name,
            fields: Vec::new(),
            scalar: true,
        }
    }

    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

///
/// ModelError
///

#[derive(Debug, ThisError)]
pub enum ModelError {
    #[error("type {path} is already registered")]
    DuplicatePath { path: String },

    #[error("cannot derive a field list for {path}: sample did not serialize to an object")]
    NotAnObject { path: String },

    #[error("failed to serialize sample for {path}: {message}")]
    SampleSerialize { path: String, message: String },
}

///
/// TypeRegistry
///
/// The set of types one translation endpoint knows. Built once at
/// composition time and shared behind an `Arc`; resolution is read-only.
///

#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    by_path: BTreeMap<String, ResolvedType>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an explicit model.
    pub fn register(&mut self, model: TypeModel) -> Result<(), ModelError> {
        let path = model.name.path.clone();
        if self.by_path.contains_key(&path) {
            return Err(ModelError::DuplicatePath { path });
        }
        self.by_path.insert(path, Arc::new(model));

        Ok(())
    }

    /// Register a described type, deriving its field list from a sample
    /// value's serialized object form.
    pub fn register_sample<T>(&mut self, sample: &T) -> Result<(), ModelError>
    where
        T: Described + Serialize,
    {
        let json = serde_json::to_value(sample).map_err(|err| ModelError::SampleSerialize {
            path: T::PATH.to_string(),
            message: err.to_string(),
        })?;
        let serde_json::Value::Object(map) = json else {
            return Err(ModelError::NotAnObject {
                path: T::PATH.to_string(),
            });
        };

        let fields = map.keys().cloned().collect();
        self.register(TypeModel::new(T::type_name(), fields))
    }

    /// Exact path lookup.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<ResolvedType> {
        self.by_path.get(path).cloned()
    }

    /// Find by short-name suffix. Returns `Err(count)` when the suffix is
    /// ambiguous.
    pub(crate) fn find_by_suffix(&self, short: &str) -> Result<Option<ResolvedType>, usize> {
        let mut hits = self
            .by_path
            .values()
            .filter(|model| model.name.short() == short);

        let first = hits.next().cloned();
        let extra = hits.count();
        if extra > 0 {
            return Err(extra + 1);
        }

        Ok(first)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Default)]
    struct Person {
        name: String,
        age: i64,
    }

    impl Described for Person {
        const PATH: &'static str = "people::Person";
    }

    #[test]
    fn register_sample_derives_fields() {
        let mut reg = TypeRegistry::new();
        reg.register_sample(&Person::default()).unwrap();

        let model = reg.get("people::Person").unwrap();
        assert!(model.has_field("name"));
        assert!(model.has_field("age"));
        assert!(!model.has_field("height"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = TypeRegistry::new();
        reg.register_sample(&Person::default()).unwrap();
        let err = reg.register_sample(&Person::default()).unwrap_err();
        assert!(matches!(err, ModelError::DuplicatePath { .. }));
    }

    #[test]
    fn suffix_lookup_detects_ambiguity() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeModel::new(TypeName::new("a::Person"), vec![]))
            .unwrap();
        reg.register(TypeModel::new(TypeName::new("b::Person"), vec![]))
            .unwrap();

        assert_eq!(reg.find_by_suffix("Person"), Err(2));
        assert!(reg.find_by_suffix("Missing").unwrap().is_none());
    }
}
