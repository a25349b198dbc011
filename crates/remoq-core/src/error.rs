use crate::{
    exec::ExecError,
    expr::EvalError,
    model::{MapError, ModelError, ResolveError},
    node::RecordError,
    query::QueryError,
    source::SourceError,
    translate::TranslateError,
    value::{ArithError, ScalarError},
};
use thiserror::Error as ThisError;

///
/// Error
///
/// Top-level aggregate over the per-module error enums. Library code
/// returns the module enums; hosts that mix surfaces collect into this.
///

#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Scalar(#[from] ScalarError),

    #[error(transparent)]
    Arith(#[from] ArithError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

// ============================================================================
// Tests
// ============================================================================
