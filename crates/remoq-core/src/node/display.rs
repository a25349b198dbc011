use crate::node::{arg::ArgValue, ast::Expr};
use std::fmt;

///
/// Wire tree rendering
///
/// Compact single-line form for trace output and error text. Not a
/// serialization format; reconstruction always goes through serde.
///

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            Self::Unary { op, operand, ty } => match ty {
                Some(ty) => write!(f, "{}<{ty}>({operand})", op.symbol()),
                None => write!(f, "{}({operand})", op.symbol()),
            },
            Self::Constant { value, .. } => write!(f, "{value}"),
            Self::Parameter(p) => write!(f, "{}", p.name),
            Self::Member { expr, member } => match expr {
                Some(expr) => write!(f, "{expr}.{}", member.name),
                None => write!(f, "{member}"),
            },
            Self::MethodCall { method, this, args } => {
                if let Some(this) = this {
                    write!(f, "{this}.")?;
                }
                write!(f, "{}(", method.name())?;
                if let Some(args) = args {
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                }
                write!(f, ")")
            }
            Self::Lambda { params, body } => {
                write!(f, "|")?;
                if let Some(params) = params {
                    for (i, p) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", p.name)?;
                    }
                }
                write!(f, "| {body}")
            }
            Self::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "if {test} {{ {if_true} }} else {{ {if_false} }}"),
            Self::New { ctor, args } => {
                write!(f, "{}::new(", ctor.declaring)?;
                if let Some(args) = args {
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                }
                write!(f, ")")
            }
            Self::NewArray { element, items } => {
                write!(f, "[{element};")?;
                if let Some(items) = items {
                    write!(f, " {}", items.len())?;
                }
                write!(f, "]")
            }
            Self::MemberInit { ctor, bindings, .. } => {
                write!(f, "{} {{ ", ctor.declaring)?;
                for (i, b) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", b.member.name, b.expr)?;
                }
                write!(f, " }}")
            }
            Self::ListInit { ctor, inits } => {
                write!(f, "{}[{} inits]", ctor.declaring, inits.len())
            }
            Self::Block { exprs, .. } => write!(f, "block[{}]", exprs.len()),
            Self::Loop { .. } => write!(f, "loop"),
            Self::Goto { kind, target, .. } => write!(f, "{} {target:?}", kind.name()),
            Self::Label { label, .. } => write!(f, "label {}", label.id),
            Self::Try { .. } => write!(f, "try"),
            Self::Switch { subject, cases, .. } => {
                write!(f, "switch {subject} [{} cases]", cases.len())
            }
            Self::Default { ty } => write!(f, "default<{ty}>"),
            Self::TypeIs { expr, ty } => write!(f, "({expr} is {ty})"),
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Record(r) => write!(f, "{r}"),
            Self::List(xs) => {
                write!(f, "[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{x}")?;
                }
                write!(f, "]")
            }
            Self::Expr(e) => write!(f, "{{{e}}}"),
            Self::Resource(r) => write!(f, "{r}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
