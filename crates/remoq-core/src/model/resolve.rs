use crate::{
    model::{
        mapping::ANON_RECORD_PATH,
        registry::{ResolvedType, TypeModel, TypeRegistry},
    },
    node::{CtorDesc, MemberRef, TypeName},
};
use std::sync::Arc;
use thiserror::Error as ThisError;

///
/// ResolveError
///
/// Every variant carries the unresolved descriptor's textual form, so a
/// caller can tell a missing registration from a malformed tree.
///

#[derive(Debug, ThisError)]
pub enum ResolveError {
    #[error("unresolved type: {descriptor}")]
    Type { descriptor: String },

    #[error("ambiguous type: {descriptor} matches {count} registered types")]
    AmbiguousType { descriptor: String, count: usize },

    #[error("unresolved member: {descriptor}")]
    Member { descriptor: String },

    #[error("unresolved method: {descriptor}")]
    Method { descriptor: String },

    #[error("unresolved constructor: {descriptor}")]
    Ctor { descriptor: String },
}

///
/// TypeResolver
///
/// The pluggable resolution strategy consumed by the reverse translator.
/// Injected explicitly at construction; there is no process-wide default.
///

pub trait TypeResolver: Send + Sync {
    fn resolve_type(&self, name: &TypeName) -> Result<ResolvedType, ResolveError>;

    /// Validate a member against its declaring type, when that type is
    /// known. Unknown declaring types pass: the member may live on an
    /// anonymous projection.
    fn resolve_member(&self, member: &MemberRef) -> Result<(), ResolveError> {
        let Some(declaring) = &member.declaring else {
            return Ok(());
        };
        if declaring.path == ANON_RECORD_PATH {
            return Ok(());
        }
        let model = self.resolve_type(declaring)?;
        if model.scalar || model.has_field(&member.name) {
            Ok(())
        } else {
            Err(ResolveError::Member {
                descriptor: member.to_string(),
            })
        }
    }

    /// Resolve a constructor descriptor to its declaring type, checking the
    /// declared arity fits the model's field list. Anonymous records take
    /// no positional arguments; their fields arrive through init bindings.
    fn resolve_ctor(&self, ctor: &CtorDesc) -> Result<ResolvedType, ResolveError> {
        let model = self.resolve_type(&ctor.declaring)?;
        if ctor.params.len() > model.fields.len() && !model.scalar {
            return Err(ResolveError::Ctor {
                descriptor: ctor.to_string(),
            });
        }

        Ok(model)
    }
}

/// The model behind every anonymous projection result.
#[must_use]
pub fn anonymous_record_model() -> ResolvedType {
    Arc::new(TypeModel::new(TypeName::new(ANON_RECORD_PATH), Vec::new()))
}

/// Built-in scalar type names every resolver understands without
/// registration.
const SCALAR_PATHS: &[&str] = &[
    "bool", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "char", "str",
    "String", "bytes", "bigint", "Date", "Timestamp", "Ulid",
];

/// Built-in collection container, resolvable whenever its element is.
pub const COLLECTION_PATH: &str = "Vec";

fn builtin_scalar(name: &TypeName) -> Option<ResolvedType> {
    if name.is_generic() {
        return None;
    }
    SCALAR_PATHS
        .contains(&name.path.as_str())
        .then(|| Arc::new(TypeModel::scalar(name.clone())))
}

///
/// RegistryResolver
///
/// Default strategy: builtin scalars, then exact path, then unique
/// short-name suffix.
///

#[derive(Clone, Debug)]
pub struct RegistryResolver {
    registry: Arc<TypeRegistry>,
}

impl RegistryResolver {
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }
}

impl TypeResolver for RegistryResolver {
    fn resolve_type(&self, name: &TypeName) -> Result<ResolvedType, ResolveError> {
        if name.path == ANON_RECORD_PATH {
            return Ok(anonymous_record_model());
        }
        if let Some(scalar) = builtin_scalar(name) {
            return Ok(scalar);
        }
        if name.path == COLLECTION_PATH && name.is_generic() {
            for arg in &name.args {
                self.resolve_type(arg).map_err(|_| ResolveError::Type {
                    descriptor: name.to_string(),
                })?;
            }
            return Ok(Arc::new(TypeModel::new(name.clone(), Vec::new())));
        }
        if let Some(model) = self.registry.get(&name.path) {
            return Ok(model);
        }

        match self.registry.find_by_suffix(name.short()) {
            Ok(Some(model)) => Ok(model),
            Ok(None) => Err(ResolveError::Type {
                descriptor: name.to_string(),
            }),
            Err(count) => Err(ResolveError::AmbiguousType {
                descriptor: name.to_string(),
                count,
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
