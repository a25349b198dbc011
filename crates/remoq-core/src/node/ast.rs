use crate::{
    node::{
        arg::ArgValue,
        types::{CtorDesc, InstanceId, MemberRef, MethodDesc, TypeName},
    },
    ops::{BinaryOp, GotoKind, KnownMethod, QueryOp, UnaryOp},
};
use serde::{Deserialize, Serialize};

///
/// Wire expression AST
///
/// A closed set of node kinds mirroring the native tree shape-for-shape.
/// The discriminator fully determines the valid payload; decoding an
/// unknown discriminator fails at the serde layer, so visitors can match
/// exhaustively without a fallback arm.
///
/// Child collections are `Option<Vec<_>>` where the native side
/// distinguishes "no collection" from "empty collection" (constructor
/// calls, call argument lists). The two forms are not interchangeable.
///

///
/// MethodRef
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MethodRef {
    /// A queryable operator from the catalog.
    Query(QueryOp),
    /// A scalar instance method from the catalog.
    Known(KnownMethod),
    /// A by-name descriptor; resolution maps it onto the catalog.
    ByName(MethodDesc),
}

impl MethodRef {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Query(op) => op.name(),
            Self::Known(m) => m.name(),
            Self::ByName(desc) => &desc.name,
        }
    }
}

///
/// ParamNode
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ParamNode {
    pub id: InstanceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeName>,
}

///
/// LabelNode
///

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LabelNode {
    pub id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

///
/// MemberBinding
///
/// Assignment binding inside a member-init node.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberBinding {
    pub member: MemberRef,
    pub expr: Expr,
}

///
/// ElementInit
///
/// One add-call inside a list-init node.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementInit {
    pub args: Vec<Expr>,
}

///
/// CatchBlock
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatchBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<TypeName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub var: Option<ParamNode>,
    pub body: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
}

///
/// SwitchCase
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub body: Expr,
}

///
/// Expr
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<TypeName>,
    },
    Constant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ty: Option<TypeName>,
        value: ArgValue,
    },
    Parameter(ParamNode),
    Member {
        /// Absent for static member access.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<Box<Expr>>,
        member: MemberRef,
    },
    MethodCall {
        method: MethodRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        this: Option<Box<Expr>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Expr>>,
    },
    Lambda {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<ParamNode>>,
        body: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    New {
        ctor: CtorDesc,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Expr>>,
    },
    NewArray {
        element: TypeName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Vec<Expr>>,
    },
    MemberInit {
        ctor: CtorDesc,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Vec<Expr>>,
        bindings: Vec<MemberBinding>,
    },
    ListInit {
        ctor: CtorDesc,
        inits: Vec<ElementInit>,
    },
    Block {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vars: Option<Vec<ParamNode>>,
        exprs: Vec<Expr>,
    },
    Loop {
        body: Box<Expr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        break_label: Option<LabelNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        continue_label: Option<LabelNode>,
    },
    Goto {
        kind: GotoKind,
        target: LabelNode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Box<Expr>>,
    },
    Label {
        label: LabelNode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<Expr>>,
    },
    Try {
        body: Box<Expr>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        handlers: Vec<CatchBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finally: Option<Box<Expr>>,
    },
    Switch {
        subject: Box<Expr>,
        cases: Vec<SwitchCase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<Expr>>,
    },
    /// The zero value of a type, `default(T)`.
    Default { ty: TypeName },
    TypeIs {
        expr: Box<Expr>,
        ty: TypeName,
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
            Self::MethodCall { .. } => "method_call",
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
    pub fn constant(value: ArgValue) -> Self {
        Self::Constant { ty: None, value }
    }

    #[must_use]
    pub fn member(expr: Self, name: impl Into<String>) -> Self {
        Self::Member {
            expr: Some(Box::new(expr)),
            member: MemberRef::new(name),
        }
    }

    #[must_use]
    pub fn query_call(op: QueryOp, this: Self, args: Option<Vec<Self>>) -> Self {
        Self::MethodCall {
            method: MethodRef::Query(op),
            this: Some(Box::new(this)),
            args,
        }
    }

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
                Self::MethodCall {
                    method: MethodRef::Query(op),
                    this: Some(this),
                    args,
                } => {
                    chain.push((*op, args.as_deref()));
                    cursor = this;
                }
                Self::MethodCall { .. } => return None,
                other => {
                    chain.reverse();
                    return Some((other, chain));
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
