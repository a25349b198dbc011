use crate::{
    model::ResolvedType,
    node::{MemberRef, ResourceRef, TypeName},
    ops::{BinaryOp, GotoKind, KnownMethod, QueryOp, UnaryOp},
    source::SourceHandle,
    value::Value,
};
use std::{
    ops::{BitAnd, BitOr},
    sync::Arc,
};

///
/// Native expression AST
///
/// The executable counterpart of the wire tree. Descriptors that the wire
/// carries as names are resolved here: constructor calls hold their
/// `ResolvedType`, parameters and labels are shared `Arc` bindings so one
/// logical binding is one object, and the captured-constant payload can
/// hold live source handles that never cross the wire.
///
/// Child collections mirror the wire's optionality. A constructor call
/// with no argument list and one with an empty list are different trees
/// and stay different through translation.
///

///
/// ParamDef
///
/// One lambda/block binding. References share the definition through
/// `ParamRef`; identity is pointer identity, not name equality.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub ty: Option<TypeName>,
}

/// Shared handle to a parameter binding.
pub type ParamRef = Arc<ParamDef>;

impl ParamDef {
    #[must_use]
    pub fn fresh(name: impl Into<String>) -> ParamRef {
        Arc::new(Self {
            name: name.into(),
            ty: None,
        })
    }

    #[must_use]
    pub fn fresh_typed(name: impl Into<String>, ty: TypeName) -> ParamRef {
        Arc::new(Self {
            name: name.into(),
            ty: Some(ty),
        })
    }
}

///
/// LabelDef
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabelDef {
    pub name: Option<String>,
}

/// Shared handle to a jump target.
pub type LabelRef = Arc<LabelDef>;

impl LabelDef {
    #[must_use]
    pub fn named(name: impl Into<String>) -> LabelRef {
        Arc::new(Self {
            name: Some(name.into()),
        })
    }

    #[must_use]
    pub fn anonymous() -> LabelRef {
        Arc::new(Self { name: None })
    }
}

///
/// CallKind
///
/// Calls the engine can execute. By-name descriptors do not survive
/// reverse translation; they either land in the catalog or fail there.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallKind {
    Query(QueryOp),
    Known(KnownMethod),
}

impl CallKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Query(op) => op.name(),
            Self::Known(m) => m.name(),
        }
    }
}

///
/// CtorRef
///
/// A constructor bound to its resolved declaring type. The parameter
/// signature is kept verbatim so forward translation reproduces the
/// descriptor it came from.
///

#[derive(Clone, Debug, PartialEq)]
pub struct CtorRef {
    pub ty: ResolvedType,
    pub params: Vec<TypeName>,
}

impl CtorRef {
    #[must_use]
    pub const fn new(ty: ResolvedType) -> Self {
        Self {
            ty,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.ty.name.path == crate::model::ANON_RECORD_PATH
    }
}

///
/// MemberAssign
///
/// One `field = expr` binding inside a member-init.
///

#[derive(Clone, Debug, PartialEq)]
pub struct MemberAssign {
    pub member: MemberRef,
    pub expr: Expr,
}

///
/// CatchClause
///

#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    pub ty: Option<TypeName>,
    pub var: Option<ParamRef>,
    pub body: Expr,
    pub filter: Option<Expr>,
}

///
/// SwitchArm
///

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchArm {
    pub values: Vec<Expr>,
    pub body: Expr,
}

///
/// FieldValue
///
/// A field inside a captured record constant. Expressions nested in the
/// record body stay native here and are translated together with the
/// surrounding tree.
///

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Record(RecordValue),
    List(Vec<FieldValue>),
    Expr(Box<Expr>),
    Resource(ResourceRef),
}

///
/// RecordValue
///
/// The native form of a wrapped constant: a captured value whose type is
/// not on the primitive allow-list, deep-copied into named fields.
///

#[derive(Clone, Debug, PartialEq)]
pub struct RecordValue {
    pub type_name: TypeName,
    pub fields: Vec<(String, FieldValue)>,
}

impl RecordValue {
    #[must_use]
    pub const fn new(type_name: TypeName) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }
}

///
/// Sequence
///
/// A captured sequence of non-primitive constants.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    pub element: Option<TypeName>,
    pub items: Vec<ConstValue>,
}

///
/// ConstValue
///
/// Payload of a native constant node. Scalars are transport-safe as-is;
/// records and sequences are the wrapped form; sources are live handles
/// that forward translation replaces with resource descriptors; resources
/// are descriptors that have not been bound to a live source yet.
///

#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Scalar(Value),
    Record(RecordValue),
    Seq(Sequence),
    Source(SourceHandle),
    Resource(ResourceRef),
}

impl ConstValue {
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Record(_) => "record",
            Self::Seq(_) => "sequence",
            Self::Source(_) => "source",
            Self::Resource(_) => "resource",
        }
    }

    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
}

impl From<Value> for ConstValue {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

///
/// Expr
///

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: Option<ResolvedType>,
    },
    Constant {
        ty: Option<TypeName>,
        value: ConstValue,
    },
    Parameter(ParamRef),
    Member {
        /// Absent for static member access.
        expr: Option<Box<Expr>>,
        member: MemberRef,
    },
    Call {
        call: CallKind,
        this: Option<Box<Expr>>,
        args: Option<Vec<Expr>>,
    },
    Lambda {
        params: Option<Vec<ParamRef>>,
        body: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    New {
        ctor: CtorRef,
        args: Option<Vec<Expr>>,
    },
    NewArray {
        element: TypeName,
        items: Option<Vec<Expr>>,
    },
    MemberInit {
        ctor: CtorRef,
        args: Option<Vec<Expr>>,
        bindings: Vec<MemberAssign>,
    },
    ListInit {
        ctor: CtorRef,
        inits: Vec<Vec<Expr>>,
    },
    Block {
        vars: Option<Vec<ParamRef>>,
        exprs: Vec<Expr>,
    },
    Loop {
        body: Box<Expr>,
        break_label: Option<LabelRef>,
        continue_label: Option<LabelRef>,
    },
    Goto {
        kind: GotoKind,
        target: LabelRef,
        value: Option<Box<Expr>>,
    },
    Label {
        label: LabelRef,
        default: Option<Box<Expr>>,
    },
    Try {
        body: Box<Expr>,
        handlers: Vec<CatchClause>,
        finally: Option<Box<Expr>>,
    },
    Switch {
        subject: Box<Expr>,
        cases: Vec<SwitchArm>,
        default: Option<Box<Expr>>,
    },
    Default {
        ty: ResolvedType,
    },
    TypeIs {
        expr: Box<Expr>,
        ty: ResolvedType,
    },
}

impl Expr {
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Binary { .. } => "binary",
            Self::Unary { .. } => "unary",
            Self::Constant { .. } => "constant",
            Self::Parameter(_) => "parameter",
            Self::Member { .. } => "member",
            Self::Call { .. } => "call",
            Self::Lambda { .. } => "lambda",
            Self::Conditional { .. } => "conditional",
            Self::New { .. } => "new",
            Self::NewArray { .. } => "new_array",
            Self::MemberInit { .. } => "member_init",
            Self::ListInit { .. } => "list_init",
            Self::Block { .. } => "block",
            Self::Loop { .. } => "loop",
            Self::Goto { .. } => "goto",
            Self::Label { .. } => "label",
            Self::Try { .. } => "try",
            Self::Switch { .. } => "switch",
            Self::Default { .. } => "default",
            Self::TypeIs { .. } => "type_is",
        }
    }

    ///
    /// CONSTRUCTION
    ///

    #[must_use]
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Constant {
            ty: None,
            value: ConstValue::Scalar(v.into()),
        }
    }

    #[must_use]
    pub const fn constant(value: ConstValue) -> Self {
        Self::Constant { ty: None, value }
    }

    #[must_use]
    pub fn source(handle: SourceHandle) -> Self {
        let element = handle.element();
        Self::Constant {
            ty: Some(element),
            value: ConstValue::Source(handle),
        }
    }

    #[must_use]
    pub fn resource(element: TypeName) -> Self {
        Self::Constant {
            ty: Some(element.clone()),
            value: ConstValue::Resource(ResourceRef::new(element)),
        }
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn unary(op: UnaryOp, operand: Self) -> Self {
        Self::Unary {
            op,
            operand: Box::new(operand),
            ty: None,
        }
    }

    #[must_use]
    pub fn convert(operand: Self, ty: ResolvedType) -> Self {
        Self::Unary {
            op: UnaryOp::Convert,
            operand: Box::new(operand),
            ty: Some(ty),
        }
    }

    #[must_use]
    pub fn param(param: &ParamRef) -> Self {
        Self::Parameter(Arc::clone(param))
    }

    #[must_use]
    pub fn member(expr: Self, name: impl Into<String>) -> Self {
        Self::Member {
            expr: Some(Box::new(expr)),
            member: MemberRef::new(name),
        }
    }

    #[must_use]
    pub fn lambda(params: Vec<ParamRef>, body: Self) -> Self {
        Self::Lambda {
            params: Some(params),
            body: Box::new(body),
        }
    }

    #[must_use]
    pub fn call_query(op: QueryOp, this: Self, args: Option<Vec<Self>>) -> Self {
        Self::Call {
            call: CallKind::Query(op),
            this: Some(Box::new(this)),
            args,
        }
    }

    #[must_use]
    pub fn call_known(method: KnownMethod, this: Self, args: Vec<Self>) -> Self {
        Self::Call {
            call: CallKind::Known(method),
            this: Some(Box::new(this)),
            args: Some(args),
        }
    }

    ///
    /// OPERATOR SUGAR
    ///

    #[must_use]
    pub fn eq(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    #[must_use]
    pub fn ne(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    #[must_use]
    pub fn lt(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    #[must_use]
    pub fn lte(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Lte, self, rhs)
    }

    #[must_use]
    pub fn gt(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    #[must_use]
    pub fn gte(self, rhs: Self) -> Self {
        Self::binary(BinaryOp::Gte, self, rhs)
    }

    #[expect(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(self) -> Self {
        Self::unary(UnaryOp::Not, self)
    }

    ///
    /// SHAPE QUERIES
    ///

    /// Walk the call spine back to its origin, visiting each query call.
    ///
    /// Returns the innermost non-call node (the source position) when the
    /// spine consists purely of query calls.
    #[must_use]
    pub fn query_spine(&self) -> Option<(&Self, Vec<(QueryOp, Option<&[Self]>)>)> {
        let mut chain = Vec::new();
        let mut cursor = self;
        loop {
            match cursor {
                Self::Call {
                    call: CallKind::Query(op),
                    this: Some(this),
                    args,
                } => {
                    chain.push((*op, args.as_deref()));
                    cursor = this;
                }
                Self::Call { .. } => return None,
                other => {
                    chain.reverse();
                    return Some((other, chain));
                }
            }
        }
    }

    /// The terminal query operator, when the tree ends in one.
    #[must_use]
    pub fn terminal_op(&self) -> Option<QueryOp> {
        match self {
            Self::Call {
                call: CallKind::Query(op),
                this: Some(_),
                ..
            } if op.is_terminal() => Some(*op),
            _ => None,
        }
    }
}

impl BitAnd for Expr {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::binary(BinaryOp::And, self, rhs)
    }
}

impl BitAnd for &Expr {
    type Output = Expr;

    fn bitand(self, rhs: Self) -> Self::Output {
        Expr::binary(BinaryOp::And, self.clone(), rhs.clone())
    }
}

impl BitOr for Expr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self::binary(BinaryOp::Or, self, rhs)
    }
}

impl BitOr for &Expr {
    type Output = Expr;

    fn bitor(self, rhs: Self) -> Self::Output {
        Expr::binary(BinaryOp::Or, self.clone(), rhs.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_binding_appears_in_list_and_body() {
        let x = ParamDef::fresh("x");
        let body = Expr::member(Expr::param(&x), "age").gt(Expr::value(30i64));
        let lambda = Expr::lambda(vec![Arc::clone(&x)], body);

        let Expr::Lambda {
            params: Some(params),
            body,
        } = lambda
        else {
            panic!("expected lambda");
        };
        let Expr::Binary { left, .. } = *body else {
            panic!("expected binary body");
        };
        let Expr::Member {
            expr: Some(receiver),
            ..
        } = *left
        else {
            panic!("expected member access");
        };
        let Expr::Parameter(reference) = *receiver else {
            panic!("expected parameter reference");
        };

        assert!(Arc::ptr_eq(&params[0], &reference));
    }

    #[test]
    fn operator_sugar_builds_connectives() {
        let a = Expr::value(true);
        let b = Expr::value(false);
        let and = a.clone() & b.clone();
        let or = &a | &b;

        assert!(matches!(
            and,
            Expr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
        assert!(matches!(or, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn query_spine_walks_back_to_source() {
        let origin = Expr::resource(TypeName::new("people::Person"));
        let tree = Expr::call_query(
            QueryOp::Count,
            Expr::call_query(QueryOp::Where, origin.clone(), Some(vec![Expr::value(1i64)])),
            None,
        );

        let (source, chain) = tree.query_spine().unwrap();
        assert_eq!(source, &origin);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].0, QueryOp::Where);
        assert_eq!(chain[1].0, QueryOp::Count);
        assert_eq!(tree.terminal_op(), Some(QueryOp::Count));
    }

    #[test]
    fn record_value_field_lookup() {
        let record = RecordValue::new(TypeName::new("people::Person"))
            .with("name", FieldValue::Scalar("Alice".into()))
            .with("age", FieldValue::Scalar(35i64.into()));

        assert!(record.get("age").is_some());
        assert!(record.get("height").is_none());
    }
}
