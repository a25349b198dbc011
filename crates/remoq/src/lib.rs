//! Remote query facade for remoq.
//!
//! ## Crate layout
//! - `core`: expression trees, translators, query values, and the staged
//!   execution pipeline.
//!
//! The `prelude` module mirrors the surface used when composing and running
//! queries against a remote service.

pub use remoq_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use core::{Error, MAX_TREE_DEPTH};

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::core::{
        client::{AsyncRemoteClient, AsyncRemoteQueryable, RemoteClient, RemoteQueryable},
        exec::{ExecutionContext, QueryResult},
        expr::{Expr, lambda, lit},
        model::{Described, TypeRegistry},
        node,
        ops::{BinaryOp, QueryOp, UnaryOp},
        query::Query,
        source::{SourceHandle, SourceRegistry},
        value::Value,
    };
    pub use serde::{Deserialize, Serialize};
}
