//! The serializable expression tree.
//!
//! Everything in this module is plain data: operator enums, descriptors, and
//! nested nodes. No closures, no live type handles, no source handles. A
//! tree decoded from the wire is translated back into an executable
//! [`crate::expr::Expr`] by the reverse translator.

pub mod arg;
pub mod ast;
pub mod display;
pub mod fingerprint;
pub mod types;

pub use arg::{ArgValue, Record, RecordError, ResourceRef};
pub use ast::{
    CatchBlock, ElementInit, Expr, LabelNode, MemberBinding, MethodRef, ParamNode, SwitchCase,
};
pub use fingerprint::ExprFingerprint;
pub use types::{CtorDesc, InstanceId, MemberRef, MethodDesc, TypeName};
