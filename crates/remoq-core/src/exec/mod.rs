//! The staged execution pipeline.
//!
//! A received wire tree passes through seven stages on its way to a
//! transfer-shaped result: canonicalize and bind sources (remote prepare),
//! rebuild the native tree (transform), fold closed subtrees (native
//! prepare), evaluate, then two processing hooks around result conversion.
//! The stages live on one [`ExecutionStages`] trait as default methods;
//! the three run shapes (sync, async, streaming) are thin orchestrators
//! over the same trait.

pub mod context;
pub mod convert;
pub mod normalize;
pub mod prepare;
pub mod run;
pub mod stages;
pub mod stream;

pub use context::ExecutionContext;
pub use convert::{QueryResult, ResultItem, ResultPayload};
pub use run::{run, run_async};
pub use stages::{DefaultStages, ExecutionStages};
pub use stream::{ResultStream, run_stream};

use crate::{
    expr::eval::EvalError, model::MapError, source::SourceError, translate::TranslateError,
};
use thiserror::Error as ThisError;

///
/// ExecError
///
/// Everything a pipeline run can fail with. `NoElements` and
/// `MoreThanOneElement` are raised on the consuming side when a
/// single-result sentinel is mapped back into a typed outcome.
///

#[derive(Debug, ThisError)]
pub enum ExecError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error("execution was cancelled")]
    Cancelled,

    #[error("the query yielded no elements")]
    NoElements,

    #[error("the query yielded more than one element")]
    MoreThanOneElement,

    #[error("unexpected result shape: expected {expected}, got {actual}")]
    ResultShape {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("remote execution failed: {message}")]
    Remote { message: String },
}
