//! Translation between the native and serializable expression trees.
//!
//! [`forward`] lowers a native tree to its wire form, running the local
//! partial evaluation pass first. [`reverse`] rebuilds an executable tree
//! from the wire form, resolving every descriptor against the active
//! [`crate::model::TypeResolver`]. Both directions keep binding identity
//! through per-pass caches in [`arena`].

pub mod arena;
pub mod forward;
pub mod reverse;

#[cfg(test)]
mod property;

pub use arena::{LabelArena, LabelIds, ParamArena, ParamIds};
pub use forward::{Forward, to_wire, to_wire_with};
pub use reverse::{Reverse, from_wire, from_wire_bound};

use crate::{model::ResolveError, node::InstanceId};
use thiserror::Error as ThisError;

///
/// TranslateError
///
/// Resolution failures keep their own variant so callers can tell a
/// missing registration from a malformed tree.
///

#[derive(Debug, ThisError)]
pub enum TranslateError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("binding id {id} is outside the arena range")]
    BindingRange { id: InstanceId },

    #[error("constant sequence items must be data, found an expression")]
    ExprInConstant,

    #[error("expression tree exceeds the maximum depth of {max}")]
    DepthExceeded { max: usize },
}
