use crate::{
    MAX_TREE_DEPTH,
    expr::{
        ast::{CallKind, CatchClause, ConstValue, CtorRef, Expr, FieldValue, RecordValue},
        reduce::{FoldAll, LocalEvalPolicy, reduce_with},
    },
    model::COLLECTION_PATH,
    node::{self as wire, ArgValue, CtorDesc, MethodRef, Record, ResourceRef, TypeName},
    translate::{
        TranslateError,
        arena::{LabelIds, ParamIds},
    },
};

///
/// Forward translation
///
/// Lowers a native tree to its wire form. Live source handles become
/// resource descriptors, shared parameter and label bindings become
/// sequential wire ids, and captured constants keep the primitive-vs-wrapped
/// split they already carry. Child collections lower position-for-position;
/// an absent collection stays absent.
///

/// Lower a native tree to its wire form, folding locally-computable
/// sub-expressions first.
pub fn to_wire(expr: Expr) -> Result<wire::Expr, TranslateError> {
    to_wire_with(&FoldAll, expr)
}

/// [`to_wire`] under a caller-supplied local evaluation policy.
pub fn to_wire_with<P>(policy: &P, expr: Expr) -> Result<wire::Expr, TranslateError>
where
    P: LocalEvalPolicy + ?Sized,
{
    let reduced = reduce_with(policy, expr);
    Forward::new().translate(&reduced)
}

///
/// Forward
///
/// One lowering pass. The identity caches live on the pass, so the ids it
/// hands out are stable within one tree and meaningless across trees.
///

#[derive(Debug, Default)]
pub struct Forward {
    params: ParamIds,
    labels: LabelIds,
    depth: usize,
}

impl Forward {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower one tree verbatim. Callers wanting the partial evaluation
    /// pass go through [`to_wire`].
    pub fn translate(&mut self, expr: &Expr) -> Result<wire::Expr, TranslateError> {
        self.depth = 0;
        self.node(expr)
    }

    #[expect(clippy::too_many_lines)]
    fn node(&mut self, expr: &Expr) -> Result<wire::Expr, TranslateError> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(TranslateError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }

        let lowered = match expr {
            Expr::Binary { op, left, right } => wire::Expr::Binary {
                op: *op,
                left: Box::new(self.node(left)?),
                right: Box::new(self.node(right)?),
            },
            Expr::Unary { op, operand, ty } => wire::Expr::Unary {
                op: *op,
                operand: Box::new(self.node(operand)?),
                ty: ty.as_ref().map(|t| t.name.clone()),
            },
            Expr::Constant { ty, value } => wire::Expr::Constant {
                ty: constant_ty(ty.as_ref(), value),
                value: self.arg(value)?,
            },
            Expr::Parameter(param) => wire::Expr::Parameter(self.params.node(param)),
            Expr::Member { expr, member } => wire::Expr::Member {
                expr: self.opt_box(expr)?,
                member: member.clone(),
            },
            Expr::Call { call, this, args } => wire::Expr::MethodCall {
                method: match call {
                    CallKind::Query(op) => MethodRef::Query(*op),
                    CallKind::Known(m) => MethodRef::Known(*m),
                },
                this: self.opt_box(this)?,
                args: self.opt_list(args.as_ref())?,
            },
            Expr::Lambda { params, body } => wire::Expr::Lambda {
                params: params
                    .as_ref()
                    .map(|ps| ps.iter().map(|p| self.params.node(p)).collect()),
                body: Box::new(self.node(body)?),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => wire::Expr::Conditional {
                test: Box::new(self.node(test)?),
                if_true: Box::new(self.node(if_true)?),
                if_false: Box::new(self.node(if_false)?),
            },
            Expr::New { ctor, args } => wire::Expr::New {
                ctor: ctor_desc(ctor),
                args: self.opt_list(args.as_ref())?,
            },
            Expr::NewArray { element, items } => wire::Expr::NewArray {
                element: element.clone(),
                items: self.opt_list(items.as_ref())?,
            },
            Expr::MemberInit {
                ctor,
                args,
                bindings,
            } => wire::Expr::MemberInit {
                ctor: ctor_desc(ctor),
                args: self.opt_list(args.as_ref())?,
                bindings: bindings
                    .iter()
                    .map(|b| {
                        Ok(wire::MemberBinding {
                            member: b.member.clone(),
                            expr: self.node(&b.expr)?,
                        })
                    })
                    .collect::<Result<_, TranslateError>>()?,
            },
            Expr::ListInit { ctor, inits } => wire::Expr::ListInit {
                ctor: ctor_desc(ctor),
                inits: inits
                    .iter()
                    .map(|args| {
                        Ok(wire::ElementInit {
                            args: self.list(args)?,
                        })
                    })
                    .collect::<Result<_, TranslateError>>()?,
            },
            Expr::Block { vars, exprs } => wire::Expr::Block {
                vars: vars
                    .as_ref()
                    .map(|vs| vs.iter().map(|v| self.params.node(v)).collect()),
                exprs: self.list(exprs)?,
            },
            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => wire::Expr::Loop {
                body: Box::new(self.node(body)?),
                break_label: break_label.as_ref().map(|l| self.labels.node(l)),
                continue_label: continue_label.as_ref().map(|l| self.labels.node(l)),
            },
            Expr::Goto {
                kind,
                target,
                value,
            } => wire::Expr::Goto {
                kind: *kind,
                target: self.labels.node(target),
                value: self.opt_box(value)?,
            },
            Expr::Label { label, default } => wire::Expr::Label {
                label: self.labels.node(label),
                default: self.opt_box(default)?,
            },
            Expr::Try {
                body,
                handlers,
                finally,
            } => wire::Expr::Try {
                body: Box::new(self.node(body)?),
                handlers: handlers
                    .iter()
                    .map(|h| self.catch(h))
                    .collect::<Result<_, _>>()?,
                finally: self.opt_box(finally)?,
            },
            Expr::Switch {
                subject,
                cases,
                default,
            } => wire::Expr::Switch {
                subject: Box::new(self.node(subject)?),
                cases: cases
                    .iter()
                    .map(|c| {
                        Ok(wire::SwitchCase {
                            values: self.list(&c.values)?,
                            body: self.node(&c.body)?,
                        })
                    })
                    .collect::<Result<_, TranslateError>>()?,
                default: self.opt_box(default)?,
            },
            Expr::Default { ty } => wire::Expr::Default {
                ty: ty.name.clone(),
            },
            Expr::TypeIs { expr, ty } => wire::Expr::TypeIs {
                expr: Box::new(self.node(expr)?),
                ty: ty.name.clone(),
            },
        };

        self.depth -= 1;
        Ok(lowered)
    }

    fn opt_box(
        &mut self,
        expr: &Option<Box<Expr>>,
    ) -> Result<Option<Box<wire::Expr>>, TranslateError> {
        expr.as_ref()
            .map(|e| self.node(e).map(Box::new))
            .transpose()
    }

    fn opt_list(
        &mut self,
        exprs: Option<&Vec<Expr>>,
    ) -> Result<Option<Vec<wire::Expr>>, TranslateError> {
        exprs.map(|list| self.list(list)).transpose()
    }

    fn list(&mut self, exprs: &[Expr]) -> Result<Vec<wire::Expr>, TranslateError> {
        exprs.iter().map(|e| self.node(e)).collect()
    }

    fn catch(&mut self, clause: &CatchClause) -> Result<wire::CatchBlock, TranslateError> {
        Ok(wire::CatchBlock {
            ty: clause.ty.clone(),
            var: clause.var.as_ref().map(|v| self.params.node(v)),
            body: self.node(&clause.body)?,
            filter: clause.filter.as_ref().map(|f| self.node(f)).transpose()?,
        })
    }

    /// Lower a constant payload. The classification is total: scalars pass
    /// through, records and sequences are already wrapped, live sources
    /// become resource descriptors, descriptors stay descriptors.
    fn arg(&mut self, value: &ConstValue) -> Result<ArgValue, TranslateError> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(TranslateError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }

        let lowered = match value {
            ConstValue::Scalar(v) => ArgValue::Scalar(v.clone()),
            ConstValue::Record(record) => ArgValue::Record(self.record(record)?),
            ConstValue::Seq(seq) => {
                let mut items = Vec::with_capacity(seq.items.len());
                for item in &seq.items {
                    items.push(self.arg(item)?);
                }
                ArgValue::List(items)
            }
            ConstValue::Source(handle) => ArgValue::Resource(ResourceRef::new(handle.element())),
            ConstValue::Resource(r) => ArgValue::Resource(r.clone()),
        };

        self.depth -= 1;
        Ok(lowered)
    }

    fn record(&mut self, record: &RecordValue) -> Result<Record, TranslateError> {
        let mut out = Record::new(record.type_name.clone());
        for (name, field) in &record.fields {
            out.push(name.clone(), self.field(field)?);
        }

        Ok(out)
    }

    fn field(&mut self, field: &FieldValue) -> Result<ArgValue, TranslateError> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(TranslateError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }

        let lowered = match field {
            FieldValue::Scalar(v) => ArgValue::Scalar(v.clone()),
            FieldValue::Record(r) => ArgValue::Record(self.record(r)?),
            FieldValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.field(item)?);
                }
                ArgValue::List(out)
            }
            FieldValue::Expr(e) => ArgValue::Expr(Box::new(self.node(e)?)),
            FieldValue::Resource(r) => ArgValue::Resource(r.clone()),
        };

        self.depth -= 1;
        Ok(lowered)
    }
}

fn ctor_desc(ctor: &CtorRef) -> CtorDesc {
    CtorDesc {
        declaring: ctor.ty.name.clone(),
        params: ctor.params.clone(),
    }
}

/// Wire type metadata for a constant. An untyped sequence that knows its
/// element type reports `Vec<element>` so the element type survives the
/// trip.
fn constant_ty(ty: Option<&TypeName>, value: &ConstValue) -> Option<TypeName> {
    match (ty, value) {
        (None, ConstValue::Seq(seq)) => seq
            .element
            .as_ref()
            .map(|el| TypeName::generic(COLLECTION_PATH, vec![el.clone()])),
        _ => ty.cloned(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::{
            ast::{LabelDef, Sequence},
            builder::{lambda, lambda2},
        },
        model::Described,
        node::InstanceId,
        ops::{BinaryOp, GotoKind, QueryOp, UnaryOp},
        source::MemorySource,
        value::Value,
    };
    use serde::Serialize;
    use std::sync::Arc;

    #[derive(Serialize)]
    struct Person {
        name: String,
        age: i64,
    }

    impl Described for Person {
        const PATH: &'static str = "people::Person";
    }

    #[test]
    fn scalar_constants_pass_through_unwrapped() {
        let wire = to_wire(Expr::value(42i64)).unwrap();
        assert_eq!(
            wire,
            wire::Expr::Constant {
                ty: None,
                value: ArgValue::Scalar(Value::Int(42)),
            }
        );
    }

    #[test]
    fn closed_subtrees_fold_before_lowering() {
        let sum = Expr::binary(
            BinaryOp::Mul,
            Expr::binary(BinaryOp::Add, Expr::value(1i64), Expr::value(2i64)),
            Expr::value(3i64),
        );
        let wire = to_wire(sum).unwrap();
        assert_eq!(
            wire,
            wire::Expr::Constant {
                ty: None,
                value: ArgValue::Scalar(Value::Int(9)),
            }
        );
    }

    #[test]
    fn one_binding_becomes_one_wire_id() {
        let tree = lambda("x", |x| x.expr().gt(x.field("age")));
        let wire = to_wire(tree).unwrap();

        let wire::Expr::Lambda {
            params: Some(params),
            body,
        } = wire
        else {
            panic!("expected lambda");
        };
        let wire::Expr::Binary { left, right, .. } = *body else {
            panic!("expected binary body");
        };
        let wire::Expr::Parameter(left) = *left else {
            panic!("expected parameter");
        };
        let wire::Expr::Member {
            expr: Some(receiver),
            ..
        } = *right
        else {
            panic!("expected member");
        };
        let wire::Expr::Parameter(right) = *receiver else {
            panic!("expected parameter receiver");
        };

        assert_eq!(params.len(), 1);
        assert_eq!(params[0].id, left.id);
        assert_eq!(left.id, right.id);
    }

    #[test]
    fn distinct_bindings_get_sequential_ids() {
        let tree = lambda2("a", "b", |a, b| a.expr().lt(b.expr()));
        let wire = to_wire(tree).unwrap();

        let wire::Expr::Lambda {
            params: Some(params),
            ..
        } = wire
        else {
            panic!("expected lambda");
        };
        assert_eq!(params[0].id, InstanceId::new(0));
        assert_eq!(params[1].id, InstanceId::new(1));
    }

    #[test]
    fn live_sources_lower_to_resource_descriptors() {
        let handle = MemorySource::<Person>::from_rows(Person::type_name(), Vec::new())
            .into_handle();
        let tree = Expr::call_query(QueryOp::Count, Expr::source(handle), None);
        let wire = to_wire(tree).unwrap();

        let wire::Expr::MethodCall {
            this: Some(this), ..
        } = wire
        else {
            panic!("expected call");
        };
        assert_eq!(
            *this,
            wire::Expr::Constant {
                ty: Some(Person::type_name()),
                value: ArgValue::Resource(ResourceRef::new(Person::type_name())),
            }
        );
    }

    #[test]
    fn absent_and_empty_argument_lists_stay_distinct() {
        let origin = Expr::resource(Person::type_name());
        let absent = Expr::call_query(QueryOp::Distinct, origin.clone(), None);
        let empty = Expr::call_query(QueryOp::Distinct, origin, Some(Vec::new()));

        let wire_absent = to_wire(absent).unwrap();
        let wire_empty = to_wire(empty).unwrap();

        let wire::Expr::MethodCall { args: a, .. } = wire_absent else {
            panic!("expected call");
        };
        let wire::Expr::MethodCall { args: e, .. } = wire_empty else {
            panic!("expected call");
        };
        assert_eq!(a, None);
        assert_eq!(e, Some(Vec::new()));
    }

    #[test]
    fn record_constants_lower_to_property_bags() {
        let record = RecordValue::new(Person::type_name())
            .with("name", FieldValue::Scalar("Alice".into()))
            .with("age", FieldValue::Scalar(35i64.into()));
        let wire = Forward::new()
            .translate(&Expr::constant(ConstValue::Record(record)))
            .unwrap();

        let wire::Expr::Constant {
            value: ArgValue::Record(bag),
            ..
        } = wire
        else {
            panic!("expected record constant");
        };
        assert_eq!(bag.type_name, Person::type_name());
        assert_eq!(bag.get("age"), Some(&ArgValue::Scalar(Value::Int(35))));
    }

    #[test]
    fn expression_fields_lower_recursively() {
        let record = RecordValue::new(TypeName::new("record"))
            .with("probe", FieldValue::Expr(Box::new(Expr::value(1i64))));
        let wire = Forward::new()
            .translate(&Expr::constant(ConstValue::Record(record)))
            .unwrap();

        let wire::Expr::Constant {
            value: ArgValue::Record(bag),
            ..
        } = wire
        else {
            panic!("expected record constant");
        };
        assert!(matches!(bag.get("probe"), Some(ArgValue::Expr(_))));
    }

    #[test]
    fn untyped_sequences_report_their_element_type() {
        let seq = ConstValue::Seq(Sequence {
            element: Some(Person::type_name()),
            items: Vec::new(),
        });
        let wire = Forward::new().translate(&Expr::constant(seq)).unwrap();

        let wire::Expr::Constant { ty: Some(ty), .. } = wire else {
            panic!("expected typed constant");
        };
        assert_eq!(ty.to_string(), "Vec<people::Person>");
    }

    #[test]
    fn labels_share_one_wire_id() {
        let exit = LabelDef::named("exit");
        let tree = Expr::Loop {
            body: Box::new(Expr::Goto {
                kind: GotoKind::Break,
                target: Arc::clone(&exit),
                value: Some(Box::new(Expr::value(1i64))),
            }),
            break_label: Some(exit),
            continue_label: None,
        };
        let wire = Forward::new().translate(&tree).unwrap();

        let wire::Expr::Loop {
            body,
            break_label: Some(break_label),
            ..
        } = wire
        else {
            panic!("expected loop");
        };
        let wire::Expr::Goto { target, .. } = *body else {
            panic!("expected goto body");
        };
        assert_eq!(target.id, break_label.id);
    }

    #[test]
    fn runaway_nesting_is_rejected() {
        let mut tree = Expr::value(false);
        for _ in 0..600 {
            tree = Expr::unary(UnaryOp::Quote, tree);
        }

        let err = Forward::new().translate(&tree).unwrap_err();
        assert!(matches!(err, TranslateError::DepthExceeded { .. }));
    }
}
