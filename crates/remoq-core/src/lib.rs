//! Core engine for remoq: the native and serializable expression trees, the
//! forward/reverse translators between them, the immutable query value
//! object, and the staged execution pipeline (sync, async, streaming).
#![warn(unreachable_pub)]

// public exports are one module level down
pub mod client;
pub mod error;
pub mod exec;
pub mod expr;
pub mod model;
pub mod node;
pub mod ops;
pub mod query;
pub mod source;
pub mod trace;
pub mod translate;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

pub use error::Error;

///
/// CONSTANTS
///

/// Maximum recursion depth accepted when decoding or translating a wire
/// expression tree.
///
/// Deep trees arrive from untrusted peers; bounding the depth keeps the
/// recursive visitors within stack limits.
pub const MAX_TREE_DEPTH: usize = 512;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, translators, pipelines, or helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        client::RemoteQueryable,
        expr::Expr,
        model::{Described, TypeRegistry},
        node,
        ops::{BinaryOp, QueryOp, UnaryOp},
        query::Query,
        value::Value,
    };
}
