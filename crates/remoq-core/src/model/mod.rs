//! Type models and resolution strategies.
//!
//! The wire carries type descriptors, not types. This module holds the
//! registry those descriptors resolve against, the pluggable resolver seam,
//! and the serde bridge between user types and the record transfer form.

pub mod mapping;
pub mod registry;
pub mod resolve;

pub use mapping::{ANON_RECORD_PATH, MapError, SerdeMapper, ValueMapper, from_record, to_record};
pub use registry::{Described, ModelError, ResolvedType, TypeModel, TypeRegistry};
pub use resolve::{
    COLLECTION_PATH, RegistryResolver, ResolveError, TypeResolver, anonymous_record_model,
};
