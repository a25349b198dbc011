use crate::{
    MAX_TREE_DEPTH,
    exec::ExecError,
    node::{self as wire, ArgValue, Record, TypeName},
    ops::UnaryOp,
    source::{ResourceProvider, SourceBindings, SourceError},
    translate::TranslateError,
};

///
/// Remote prepare
///
/// First stage of the pipeline. The incoming wire tree is rewritten into
/// canonical form and every resource placeholder it references is bound
/// to a live source handle.
///
/// Two legacy encodings are canonicalized away: a constant whose payload
/// is itself an expression collapses to that expression, and nested quote
/// markers collapse to a single level. Later stages match on the
/// canonical forms only.
///

/// Canonicalize a received tree. Idempotent.
pub fn canonical(expr: wire::Expr) -> Result<wire::Expr, ExecError> {
    canonical_at(expr, 0)
}

/// Bind each resource placeholder in the tree to a handle from the
/// provider, keyed by element type.
pub fn bind_resources(
    provider: &dyn ResourceProvider,
    bindings: &mut SourceBindings,
    expr: &wire::Expr,
) -> Result<(), ExecError> {
    let mut elements = Vec::new();
    collect_resources(expr, &mut elements);

    for element in elements {
        let Some(handle) = provider.provide(&element) else {
            return Err(SourceError::UnknownResource {
                element: element.to_string(),
            }
            .into());
        };
        bindings.bind(element, handle);
    }

    Ok(())
}

///
/// Canonicalization
///

#[expect(clippy::too_many_lines)]
fn canonical_at(expr: wire::Expr, depth: usize) -> Result<wire::Expr, ExecError> {
    use wire::Expr as E;

    if depth >= MAX_TREE_DEPTH {
        return Err(TranslateError::DepthExceeded {
            max: MAX_TREE_DEPTH,
        }
        .into());
    }
    let next = depth + 1;

    let expr = match expr {
        E::Constant { ty, value } => match value {
            // an expression-valued constant stands for the expression itself
            ArgValue::Expr(inner) => canonical_at(*inner, next)?,
            other => E::Constant { ty, value: other },
        },

        E::Unary {
            op: UnaryOp::Quote,
            operand,
            ty,
        } => match canonical_at(*operand, next)? {
            quoted @ E::Unary {
                op: UnaryOp::Quote, ..
            } => quoted,
            other => E::Unary {
                op: UnaryOp::Quote,
                operand: Box::new(other),
                ty,
            },
        },

        E::Binary { op, left, right } => E::Binary {
            op,
            left: Box::new(canonical_at(*left, next)?),
            right: Box::new(canonical_at(*right, next)?),
        },

        E::Unary { op, operand, ty } => E::Unary {
            op,
            operand: Box::new(canonical_at(*operand, next)?),
            ty,
        },

        node @ (E::Parameter(_) | E::Default { .. }) => node,

        E::Member { expr, member } => E::Member {
            expr: canonical_opt(expr, next)?,
            member,
        },

        E::MethodCall { method, this, args } => E::MethodCall {
            method,
            this: canonical_opt(this, next)?,
            args: canonical_list(args, next)?,
        },

        E::Lambda { params, body } => E::Lambda {
            params,
            body: Box::new(canonical_at(*body, next)?),
        },

        E::Conditional {
            test,
            if_true,
            if_false,
        } => E::Conditional {
            test: Box::new(canonical_at(*test, next)?),
            if_true: Box::new(canonical_at(*if_true, next)?),
            if_false: Box::new(canonical_at(*if_false, next)?),
        },

        E::New { ctor, args } => E::New {
            ctor,
            args: canonical_list(args, next)?,
        },

        E::NewArray { element, items } => E::NewArray {
            element,
            items: canonical_list(items, next)?,
        },

        E::MemberInit {
            ctor,
            args,
            bindings,
        } => {
            let mut out = Vec::with_capacity(bindings.len());
            for binding in bindings {
                out.push(wire::MemberBinding {
                    member: binding.member,
                    expr: canonical_at(binding.expr, next)?,
                });
            }
            E::MemberInit {
                ctor,
                args: canonical_list(args, next)?,
                bindings: out,
            }
        }

        E::ListInit { ctor, inits } => {
            let mut out = Vec::with_capacity(inits.len());
            for init in inits {
                let mut args = Vec::with_capacity(init.args.len());
                for arg in init.args {
                    args.push(canonical_at(arg, next)?);
                }
                out.push(wire::ElementInit { args });
            }
            E::ListInit { ctor, inits: out }
        }

        E::Block { vars, exprs } => {
            let mut out = Vec::with_capacity(exprs.len());
            for expr in exprs {
                out.push(canonical_at(expr, next)?);
            }
            E::Block { vars, exprs: out }
        }

        E::Loop {
            body,
            break_label,
            continue_label,
        } => E::Loop {
            body: Box::new(canonical_at(*body, next)?),
            break_label,
            continue_label,
        },

        E::Goto {
            kind,
            target,
            value,
        } => E::Goto {
            kind,
            target,
            value: canonical_opt(value, next)?,
        },

        E::Label { label, default } => E::Label {
            label,
            default: canonical_opt(default, next)?,
        },

        E::Try {
            body,
            handlers,
            finally,
        } => {
            let mut out = Vec::with_capacity(handlers.len());
            for handler in handlers {
                out.push(wire::CatchBlock {
                    ty: handler.ty,
                    var: handler.var,
                    body: canonical_at(handler.body, next)?,
                    filter: handler.filter.map(|f| canonical_at(f, next)).transpose()?,
                });
            }
            E::Try {
                body: Box::new(canonical_at(*body, next)?),
                handlers: out,
                finally: canonical_opt(finally, next)?,
            }
        }

        E::Switch {
            subject,
            cases,
            default,
        } => {
            let mut out = Vec::with_capacity(cases.len());
            for case in cases {
                let mut values = Vec::with_capacity(case.values.len());
                for value in case.values {
                    values.push(canonical_at(value, next)?);
                }
                out.push(wire::SwitchCase {
                    values,
                    body: canonical_at(case.body, next)?,
                });
            }
            E::Switch {
                subject: Box::new(canonical_at(*subject, next)?),
                cases: out,
                default: canonical_opt(default, next)?,
            }
        }

        E::TypeIs { expr, ty } => E::TypeIs {
            expr: Box::new(canonical_at(*expr, next)?),
            ty,
        },
    };

    Ok(expr)
}

fn canonical_opt(
    expr: Option<Box<wire::Expr>>,
    depth: usize,
) -> Result<Option<Box<wire::Expr>>, ExecError> {
    match expr {
        Some(expr) => Ok(Some(Box::new(canonical_at(*expr, depth)?))),
        None => Ok(None),
    }
}

fn canonical_list(
    exprs: Option<Vec<wire::Expr>>,
    depth: usize,
) -> Result<Option<Vec<wire::Expr>>, ExecError> {
    match exprs {
        Some(exprs) => {
            let mut out = Vec::with_capacity(exprs.len());
            for expr in exprs {
                out.push(canonical_at(expr, depth)?);
            }
            Ok(Some(out))
        }
        None => Ok(None),
    }
}

///
/// Resource collection
///

/// Record each referenced element type once, first occurrence first.
/// Canonicalization runs before this walk, so expression-valued constants
/// are already unfolded.
fn collect_resources(expr: &wire::Expr, out: &mut Vec<TypeName>) {
    use wire::Expr as E;

    match expr {
        E::Constant { value, .. } => collect_in_arg(value, out),

        E::Parameter(_) | E::Default { .. } => {}

        E::Binary { left, right, .. } => {
            collect_resources(left, out);
            collect_resources(right, out);
        }

        E::Unary { operand, .. } => collect_resources(operand, out),

        E::Member { expr, .. } => {
            if let Some(expr) = expr {
                collect_resources(expr, out);
            }
        }

        E::MethodCall { this, args, .. } => {
            if let Some(this) = this {
                collect_resources(this, out);
            }
            collect_in_slice(args.as_deref(), out);
        }

        E::Lambda { body, .. } => collect_resources(body, out),

        E::Conditional {
            test,
            if_true,
            if_false,
        } => {
            collect_resources(test, out);
            collect_resources(if_true, out);
            collect_resources(if_false, out);
        }

        E::New { args, .. } => collect_in_slice(args.as_deref(), out),

        E::NewArray { items, .. } => collect_in_slice(items.as_deref(), out),

        E::MemberInit { args, bindings, .. } => {
            collect_in_slice(args.as_deref(), out);
            for binding in bindings {
                collect_resources(&binding.expr, out);
            }
        }

        E::ListInit { inits, .. } => {
            for init in inits {
                collect_in_slice(Some(init.args.as_slice()), out);
            }
        }

        E::Block { exprs, .. } => collect_in_slice(Some(exprs.as_slice()), out),

        E::Loop { body, .. } => collect_resources(body, out),

        E::Goto { value, .. } => {
            if let Some(value) = value {
                collect_resources(value, out);
            }
        }

        E::Label { default, .. } => {
            if let Some(default) = default {
                collect_resources(default, out);
            }
        }

        E::Try {
            body,
            handlers,
            finally,
        } => {
            collect_resources(body, out);
            for handler in handlers {
                collect_resources(&handler.body, out);
                if let Some(filter) = &handler.filter {
                    collect_resources(filter, out);
                }
            }
            if let Some(finally) = finally {
                collect_resources(finally, out);
            }
        }

        E::Switch {
            subject,
            cases,
            default,
        } => {
            collect_resources(subject, out);
            for case in cases {
                collect_in_slice(Some(case.values.as_slice()), out);
                collect_resources(&case.body, out);
            }
            if let Some(default) = default {
                collect_resources(default, out);
            }
        }

        E::TypeIs { expr, .. } => collect_resources(expr, out),
    }
}

fn collect_in_slice(exprs: Option<&[wire::Expr]>, out: &mut Vec<TypeName>) {
    for expr in exprs.unwrap_or_default() {
        collect_resources(expr, out);
    }
}

fn collect_in_arg(value: &ArgValue, out: &mut Vec<TypeName>) {
    match value {
        ArgValue::Scalar(_) => {}
        ArgValue::Resource(resource) => {
            if !out.contains(&resource.element) {
                out.push(resource.element.clone());
            }
        }
        ArgValue::Record(record) => collect_in_record(record, out),
        ArgValue::List(items) => {
            for item in items {
                collect_in_arg(item, out);
            }
        }
        ArgValue::Expr(expr) => collect_resources(expr, out),
    }
}

fn collect_in_record(record: &Record, out: &mut Vec<TypeName>) {
    for (_, value) in &record.fields {
        collect_in_arg(value, out);
    }
}

// ============================================================================
// Tests
// ============================================================================
