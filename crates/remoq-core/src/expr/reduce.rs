use crate::{
    expr::{
        ast::{
            CallKind, CatchClause, ConstValue, Expr, FieldValue, MemberAssign, RecordValue,
            Sequence, SwitchArm,
        },
        eval::{Evaluated, Evaluator, Item},
    },
    node::{ArgValue, MemberRef, Record},
    ops::UnaryOp,
};

///
/// Partial evaluation
///
/// Folds the maximal locally-evaluable subtrees of an expression into
/// constants before translation. A subtree is locally evaluable when it
/// contains no parameters, no live or placeholder sources, no query
/// operators, and no jump machinery; quoted lambda bodies are reduced in
/// place so captured state becomes part of the transferable tree.
///
/// A fold that fails at reduction time leaves its subtree untouched; the
/// failure then surfaces wherever the expression is eventually evaluated.
///

///
/// LocalEvalPolicy
///
/// Caller veto over folding. `permit` sees each candidate node after its
/// children were reduced; returning false keeps that node's subtree in the
/// tree verbatim for the remote side.
///

pub trait LocalEvalPolicy: Send + Sync {
    fn permit(&self, expr: &Expr) -> bool;
}

impl<F> LocalEvalPolicy for F
where
    F: Fn(&Expr) -> bool + Send + Sync,
{
    fn permit(&self, expr: &Expr) -> bool {
        self(expr)
    }
}

///
/// FoldAll
///
/// Default policy: everything structurally foldable folds.
///

#[derive(Clone, Copy, Debug, Default)]
pub struct FoldAll;

impl LocalEvalPolicy for FoldAll {
    fn permit(&self, _: &Expr) -> bool {
        true
    }
}

/// Reduce under the default policy.
#[must_use]
pub fn reduce(expr: Expr) -> Expr {
    reduce_with(&FoldAll, expr)
}

/// Reduce with a caller-supplied folding policy.
pub fn reduce_with<P>(policy: &P, expr: Expr) -> Expr
where
    P: LocalEvalPolicy + ?Sized,
{
    let (expr, closed) = walk(policy, expr);
    fold_if(expr, closed)
}

/// Bottom-up rewrite. Returns the reduced node and whether it is closed
/// (fully evaluable). Closed children of an open node are folded here;
/// closed nodes are left unfolded so the largest enclosing closed subtree
/// folds once.
#[expect(clippy::too_many_lines)]
fn walk<P>(policy: &P, expr: Expr) -> (Expr, bool)
where
    P: LocalEvalPolicy + ?Sized,
{
    match expr {
        Expr::Constant { ref value, .. } => {
            let closed = !matches!(
                value,
                ConstValue::Source(_) | ConstValue::Resource(_)
            );
            (expr, closed)
        }

        Expr::Parameter(_) => (expr, false),

        Expr::Binary { op, left, right } => {
            let (left, l) = walk(policy, *left);
            let (right, r) = walk(policy, *right);
            let closed = l && r;
            let (left, right) = if closed {
                (left, right)
            } else {
                (fold_if(left, l), fold_if(right, r))
            };
            let node = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::Unary { op, operand, ty } => {
            let (operand, o) = walk(policy, *operand);
            // a quote is a value of expression type, never itself evaluated
            let closed = o && op != UnaryOp::Quote;
            let operand = if closed { operand } else { fold_if(operand, o) };
            let node = Expr::Unary {
                op,
                operand: Box::new(operand),
                ty,
            };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::Member { expr, member } => match expr {
            Some(receiver) => {
                let (receiver, o) = walk(policy, *receiver);
                let node = Expr::Member {
                    expr: Some(Box::new(receiver)),
                    member,
                };
                let closed = o && policy.permit(&node);
                (node, closed)
            }
            // static member reads resolve on the remote side
            None => (Expr::Member { expr: None, member }, false),
        },

        Expr::Call {
            call: call @ CallKind::Known(_),
            this,
            args,
        } => {
            let (this, this_closed) = match this {
                Some(t) => {
                    let (t, o) = walk(policy, *t);
                    (Some(t), o)
                }
                None => (None, false),
            };
            let walked: Option<Vec<(Expr, bool)>> =
                args.map(|a| a.into_iter().map(|e| walk(policy, e)).collect());
            let closed =
                this_closed && walked.as_ref().is_none_or(|a| a.iter().all(|(_, o)| *o));

            let this = this.map(|t| Box::new(fold_if_open(t, this_closed, closed)));
            let args = walked.map(|a| {
                a.into_iter()
                    .map(|(e, o)| fold_if_open(e, o, closed))
                    .collect()
            });
            let node = Expr::Call { call, this, args };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        // query operators always execute where the source lives
        Expr::Call {
            call: call @ CallKind::Query(_),
            this,
            args,
        } => {
            let this = this.map(|t| {
                let (t, o) = walk(policy, *t);
                Box::new(fold_if(t, o))
            });
            let args = args.map(|a| {
                a.into_iter()
                    .map(|e| {
                        let (e, o) = walk(policy, e);
                        fold_if(e, o)
                    })
                    .collect()
            });
            (Expr::Call { call, this, args }, false)
        }

        Expr::Lambda { params, body } => {
            let (body, o) = walk(policy, *body);
            let node = Expr::Lambda {
                params,
                body: Box::new(fold_if(body, o)),
            };
            (node, false)
        }

        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            let (test, a) = walk(policy, *test);
            let (if_true, b) = walk(policy, *if_true);
            let (if_false, c) = walk(policy, *if_false);
            let closed = a && b && c;
            let (test, if_true, if_false) = if closed {
                (test, if_true, if_false)
            } else {
                (fold_if(test, a), fold_if(if_true, b), fold_if(if_false, c))
            };
            let node = Expr::Conditional {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::New { ctor, args } => {
            let walked: Option<Vec<(Expr, bool)>> =
                args.map(|a| a.into_iter().map(|e| walk(policy, e)).collect());
            let closed = walked.as_ref().is_none_or(|a| a.iter().all(|(_, o)| *o));
            let args = walked.map(|a| {
                a.into_iter()
                    .map(|(e, o)| fold_if_open(e, o, closed))
                    .collect()
            });
            let node = Expr::New { ctor, args };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::NewArray { element, items } => {
            let walked: Option<Vec<(Expr, bool)>> =
                items.map(|a| a.into_iter().map(|e| walk(policy, e)).collect());
            let closed = walked.as_ref().is_none_or(|a| a.iter().all(|(_, o)| *o));
            let items = walked.map(|a| {
                a.into_iter()
                    .map(|(e, o)| fold_if_open(e, o, closed))
                    .collect()
            });
            let node = Expr::NewArray { element, items };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::MemberInit {
            ctor,
            args,
            bindings,
        } => {
            let walked_args: Option<Vec<(Expr, bool)>> =
                args.map(|a| a.into_iter().map(|e| walk(policy, e)).collect());
            let walked_bindings: Vec<(MemberRef, Expr, bool)> = bindings
                .into_iter()
                .map(|b| {
                    let (e, o) = walk(policy, b.expr);
                    (b.member, e, o)
                })
                .collect();
            let closed = walked_args
                .as_ref()
                .is_none_or(|a| a.iter().all(|(_, o)| *o))
                && walked_bindings.iter().all(|(_, _, o)| *o);

            let args = walked_args.map(|a| {
                a.into_iter()
                    .map(|(e, o)| fold_if_open(e, o, closed))
                    .collect()
            });
            let bindings = walked_bindings
                .into_iter()
                .map(|(member, e, o)| MemberAssign {
                    member,
                    expr: fold_if_open(e, o, closed),
                })
                .collect();
            let node = Expr::MemberInit {
                ctor,
                args,
                bindings,
            };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::ListInit { ctor, inits } => {
            let walked: Vec<Vec<(Expr, bool)>> = inits
                .into_iter()
                .map(|init| init.into_iter().map(|e| walk(policy, e)).collect())
                .collect();
            let closed = walked.iter().flatten().all(|(_, o)| *o);
            let inits = walked
                .into_iter()
                .map(|init| {
                    init.into_iter()
                        .map(|(e, o)| fold_if_open(e, o, closed))
                        .collect()
                })
                .collect();
            let node = Expr::ListInit { ctor, inits };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        // jump machinery is never folded wholesale
        Expr::Block { vars, exprs } => {
            let exprs = exprs
                .into_iter()
                .map(|e| {
                    let (e, o) = walk(policy, e);
                    fold_if(e, o)
                })
                .collect();
            (Expr::Block { vars, exprs }, false)
        }

        Expr::Loop {
            body,
            break_label,
            continue_label,
        } => {
            let (body, o) = walk(policy, *body);
            let node = Expr::Loop {
                body: Box::new(fold_if(body, o)),
                break_label,
                continue_label,
            };
            (node, false)
        }

        Expr::Goto {
            kind,
            target,
            value,
        } => {
            let value = value.map(|v| {
                let (v, o) = walk(policy, *v);
                Box::new(fold_if(v, o))
            });
            (
                Expr::Goto {
                    kind,
                    target,
                    value,
                },
                false,
            )
        }

        Expr::Label { label, default } => {
            let default = default.map(|d| {
                let (d, o) = walk(policy, *d);
                Box::new(fold_if(d, o))
            });
            (Expr::Label { label, default }, false)
        }

        Expr::Try {
            body,
            handlers,
            finally,
        } => {
            let (body, o) = walk(policy, *body);
            let body = Box::new(fold_if(body, o));
            let handlers = handlers
                .into_iter()
                .map(|h| {
                    let (hb, ho) = walk(policy, h.body);
                    let filter = h.filter.map(|f| {
                        let (f, fo) = walk(policy, f);
                        fold_if(f, fo)
                    });
                    CatchClause {
                        ty: h.ty,
                        var: h.var,
                        body: fold_if(hb, ho),
                        filter,
                    }
                })
                .collect();
            let finally = finally.map(|f| {
                let (f, o) = walk(policy, *f);
                Box::new(fold_if(f, o))
            });
            (
                Expr::Try {
                    body,
                    handlers,
                    finally,
                },
                false,
            )
        }

        Expr::Switch {
            subject,
            cases,
            default,
        } => {
            let (subject, s) = walk(policy, *subject);
            let walked_cases: Vec<(Vec<(Expr, bool)>, Expr, bool)> = cases
                .into_iter()
                .map(|arm| {
                    let values: Vec<(Expr, bool)> =
                        arm.values.into_iter().map(|v| walk(policy, v)).collect();
                    let (body, o) = walk(policy, arm.body);
                    (values, body, o)
                })
                .collect();
            let (default, d) = match default {
                Some(d) => {
                    let (d, o) = walk(policy, *d);
                    (Some(d), o)
                }
                None => (None, true),
            };
            let closed = s
                && d
                && walked_cases
                    .iter()
                    .all(|(values, _, o)| *o && values.iter().all(|(_, vo)| *vo));

            let subject = Box::new(fold_if_open(subject, s, closed));
            let cases = walked_cases
                .into_iter()
                .map(|(values, body, o)| SwitchArm {
                    values: values
                        .into_iter()
                        .map(|(v, vo)| fold_if_open(v, vo, closed))
                        .collect(),
                    body: fold_if_open(body, o, closed),
                })
                .collect();
            let default = default.map(|e| Box::new(fold_if_open(e, d, closed)));
            let node = Expr::Switch {
                subject,
                cases,
                default,
            };
            let closed = closed && policy.permit(&node);
            (node, closed)
        }

        Expr::Default { .. } => (expr, true),

        Expr::TypeIs { expr: inner, ty } => {
            let (inner, o) = walk(policy, *inner);
            let node = Expr::TypeIs {
                expr: Box::new(inner),
                ty,
            };
            let closed = o && policy.permit(&node);
            (node, closed)
        }
    }
}

/// Fold a closed child at an open parent's boundary.
fn fold_if(expr: Expr, closed: bool) -> Expr {
    if closed { fold(expr) } else { expr }
}

/// Boundary fold for a child when the parent did not come out closed.
fn fold_if_open(expr: Expr, child_closed: bool, parent_closed: bool) -> Expr {
    if parent_closed {
        expr
    } else {
        fold_if(expr, child_closed)
    }
}

/// Evaluate a closed subtree into a constant; on any failure the subtree
/// stays as-is and the failure is deferred to execution.
fn fold(expr: Expr) -> Expr {
    if matches!(expr, Expr::Constant { .. }) {
        return expr;
    }
    match Evaluator::new().eval(&expr) {
        Ok(value) => match const_from(value) {
            Some(constant) => Expr::Constant {
                ty: None,
                value: constant,
            },
            None => expr,
        },
        Err(_) => expr,
    }
}

fn const_from(value: Evaluated) -> Option<ConstValue> {
    match value {
        Evaluated::Value(v) => Some(ConstValue::Scalar(v)),
        Evaluated::Row(r) => Some(ConstValue::Record(const_record(r)?)),
        Evaluated::Seq(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(match item {
                    Item::Value(v) => ConstValue::Scalar(v),
                    Item::Row(r) => ConstValue::Record(const_record(r)?),
                });
            }
            Some(ConstValue::Seq(Sequence {
                element: None,
                items: out,
            }))
        }
        Evaluated::Source(_) => None,
    }
}

fn const_record(record: Record) -> Option<RecordValue> {
    let Record { type_name, fields } = record;
    let mut out = Vec::with_capacity(fields.len());
    for (name, arg) in fields {
        out.push((name, const_field(arg)?));
    }
    Some(RecordValue {
        type_name,
        fields: out,
    })
}

fn const_field(arg: ArgValue) -> Option<FieldValue> {
    match arg {
        ArgValue::Scalar(v) => Some(FieldValue::Scalar(v)),
        ArgValue::Record(r) => Some(FieldValue::Record(const_record(r)?)),
        ArgValue::List(args) => args
            .into_iter()
            .map(const_field)
            .collect::<Option<Vec<_>>>()
            .map(FieldValue::List),
        ArgValue::Expr(_) => None,
        ArgValue::Resource(r) => Some(FieldValue::Resource(r)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::ast::ParamDef,
        node::{Record, TypeName},
        ops::{BinaryOp, QueryOp},
        source::{MemorySource, SourceHandle},
        value::Value,
    };
    use std::sync::Arc;

    fn add(left: Expr, right: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, left, right)
    }

    fn people_source() -> SourceHandle {
        MemorySource::<()>::from_rows(
            TypeName::new("people::Person"),
            vec![
                Record::new(TypeName::new("people::Person"))
                    .with("age", Value::Int(30).into()),
            ],
        )
        .into_handle()
    }

    #[test]
    fn closed_arithmetic_folds_to_a_constant() {
        let expr = Expr::binary(
            BinaryOp::Mul,
            add(Expr::value(1i64), Expr::value(2i64)),
            Expr::value(3i64),
        );
        assert_eq!(reduce(expr), Expr::value(9i64));
    }

    #[test]
    fn parameter_comparisons_keep_their_open_side() {
        let x = ParamDef::fresh("x");
        let body = Expr::member(Expr::param(&x), "age").gt(add(Expr::value(10i64), Expr::value(20i64)));
        let reduced = reduce(Expr::lambda(vec![Arc::clone(&x)], body));

        let Expr::Lambda { body, .. } = reduced else {
            panic!("expected a lambda");
        };
        let Expr::Binary { op, left, right } = *body else {
            panic!("expected a comparison");
        };
        assert_eq!(op, BinaryOp::Gt);
        assert!(matches!(*left, Expr::Member { .. }));
        assert_eq!(*right, Expr::value(30i64));
    }

    #[test]
    fn query_chains_never_fold() {
        let expr = Expr::call_query(QueryOp::Count, Expr::source(people_source()), None);
        let reduced = reduce(expr.clone());
        assert_eq!(reduced, expr);
    }

    #[test]
    fn resource_placeholders_never_fold() {
        let expr = Expr::resource(TypeName::new("people::Person"));
        let reduced = reduce(expr.clone());
        assert_eq!(reduced, expr);
    }

    #[test]
    fn failed_folds_are_deferred() {
        let x = ParamDef::fresh("x");
        let division = Expr::binary(BinaryOp::Div, Expr::value(1i64), Expr::value(0i64));
        let body = division.clone().gt(Expr::member(Expr::param(&x), "age"));
        let reduced = reduce(Expr::lambda(vec![x], body));

        let Expr::Lambda { body, .. } = reduced else {
            panic!("expected a lambda");
        };
        let Expr::Binary { left, .. } = *body else {
            panic!("expected a comparison");
        };
        assert_eq!(*left, division);
    }

    #[test]
    fn member_reads_on_constant_records_fold() {
        let row = Expr::constant(ConstValue::Record(
            RecordValue::new(TypeName::new("people::Person"))
                .with("name", FieldValue::Scalar("Ada".into())),
        ));
        let reduced = reduce(Expr::member(row, "name"));
        assert_eq!(reduced, Expr::value("Ada"));
    }

    #[test]
    fn policy_veto_pins_subtrees() {
        let veto_members = |e: &Expr| !matches!(e, Expr::Member { .. });
        let row = Expr::constant(ConstValue::Record(
            RecordValue::new(TypeName::new("people::Person"))
                .with("name", FieldValue::Scalar("Ada".into())),
        ));
        let expr = Expr::member(row, "name");
        let reduced = reduce_with(&veto_members, expr.clone());
        assert_eq!(reduced, expr);
    }

    #[test]
    fn quoted_lambda_bodies_reduce_in_place() {
        let x = ParamDef::fresh("x");
        let body = Expr::member(Expr::param(&x), "age").gt(add(Expr::value(1i64), Expr::value(2i64)));
        let quoted = Expr::unary(
            UnaryOp::Quote,
            Expr::lambda(vec![Arc::clone(&x)], body),
        );
        let chain = Expr::call_query(
            QueryOp::Where,
            Expr::source(people_source()),
            Some(vec![quoted]),
        );

        let Expr::Call { args, .. } = reduce(chain) else {
            panic!("expected the chain to survive");
        };
        let args = args.unwrap();
        let Expr::Unary { operand, .. } = &args[0] else {
            panic!("expected the quote to survive");
        };
        let Expr::Lambda { body, .. } = operand.as_ref() else {
            panic!("expected the lambda to survive");
        };
        let Expr::Binary { right, .. } = body.as_ref() else {
            panic!("expected a comparison");
        };
        assert_eq!(right.as_ref(), &Expr::value(3i64));
    }

    #[test]
    fn inline_arrays_fold_into_sequence_constants() {
        let array = Expr::NewArray {
            element: TypeName::new("i64"),
            items: Some(vec![Expr::value(1i64), add(Expr::value(1i64), Expr::value(1i64))]),
        };
        let chain = Expr::call_query(QueryOp::Count, array, None);

        let Expr::Call { this, .. } = reduce(chain) else {
            panic!("expected the chain to survive");
        };
        let Expr::Constant { value, .. } = *this.unwrap() else {
            panic!("expected the receiver to fold");
        };
        assert_eq!(
            value,
            ConstValue::Scalar(Value::List(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn reduce_is_idempotent() {
        let x = ParamDef::fresh("x");
        let body = Expr::member(Expr::param(&x), "age").gt(add(Expr::value(10i64), Expr::value(20i64)));
        let chain = Expr::call_query(
            QueryOp::Where,
            Expr::source(people_source()),
            Some(vec![Expr::lambda(vec![Arc::clone(&x)], body)]),
        );

        let once = reduce(chain);
        let twice = reduce(once.clone());
        assert_eq!(once, twice);
    }
}
