//! The native expression tree.
//!
//! Nodes here hold live state: shared parameter handles compared by
//! pointer identity, resolved type models, and source handles. Trees are
//! built directly or by the closure helpers in [`builder`], reduced by
//! [`reduce`] before translation, and run by the [`eval`] interpreter.

pub mod ast;
pub mod builder;
pub mod eval;
pub mod reduce;

pub use ast::{
    CallKind, CatchClause, ConstValue, CtorRef, Expr, FieldValue, LabelDef, LabelRef, MemberAssign,
    ParamDef, ParamRef, RecordValue, Sequence, SwitchArm,
};
pub use builder::{Var, lambda, lambda2, lit};
pub use eval::{EvalError, Evaluated, Evaluator, Item, item_eq};
pub use reduce::{FoldAll, LocalEvalPolicy, reduce, reduce_with};
