use crate::{
    MAX_TREE_DEPTH,
    expr::ast::{
        CallKind, CatchClause, ConstValue, CtorRef, Expr, FieldValue, MemberAssign, RecordValue,
        Sequence, SwitchArm,
    },
    model::{COLLECTION_PATH, ResolveError, TypeResolver},
    node::{self as wire, ArgValue, MethodRef, Record, ResourceRef, TypeName},
    ops::{KnownMethod, QueryOp},
    source::SourceBindings,
    translate::{
        TranslateError,
        arena::{LabelArena, ParamArena},
    },
};

///
/// Reverse translation
///
/// Rebuilds an executable tree from the wire form. Every type, member,
/// constructor, and by-name method descriptor resolves against the injected
/// [`TypeResolver`]; failures carry the descriptor's textual form. Wire ids
/// rebuild shared bindings through arenas, so a lambda's parameter list and
/// the references in its body end up on one definition.
///
/// Resource descriptors bind to live handles through the optional
/// [`SourceBindings`]; without a binding the placeholder survives into the
/// native tree and fails at evaluation, not here.
///

/// Rebuild a native tree, leaving resource placeholders unbound.
pub fn from_wire(resolver: &dyn TypeResolver, expr: &wire::Expr) -> Result<Expr, TranslateError> {
    Reverse::new(resolver).translate(expr)
}

/// Rebuild a native tree, binding resource placeholders to live handles.
pub fn from_wire_bound(
    resolver: &dyn TypeResolver,
    bindings: &SourceBindings,
    expr: &wire::Expr,
) -> Result<Expr, TranslateError> {
    Reverse::new(resolver).with_bindings(bindings).translate(expr)
}

///
/// Reverse
///

pub struct Reverse<'a> {
    resolver: &'a dyn TypeResolver,
    bindings: Option<&'a SourceBindings>,
    params: ParamArena,
    labels: LabelArena,
    depth: usize,
}

impl<'a> Reverse<'a> {
    #[must_use]
    pub fn new(resolver: &'a dyn TypeResolver) -> Self {
        Self {
            resolver,
            bindings: None,
            params: ParamArena::new(),
            labels: LabelArena::new(),
            depth: 0,
        }
    }

    #[must_use]
    pub fn with_bindings(mut self, bindings: &'a SourceBindings) -> Self {
        self.bindings = Some(bindings);
        self
    }

    pub fn translate(&mut self, expr: &wire::Expr) -> Result<Expr, TranslateError> {
        self.depth = 0;
        self.node(expr)
    }

    #[expect(clippy::too_many_lines)]
    fn node(&mut self, expr: &wire::Expr) -> Result<Expr, TranslateError> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(TranslateError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }

        let raised = match expr {
            wire::Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: Box::new(self.node(left)?),
                right: Box::new(self.node(right)?),
            },
            wire::Expr::Unary { op, operand, ty } => Expr::Unary {
                op: *op,
                operand: Box::new(self.node(operand)?),
                ty: ty
                    .as_ref()
                    .map(|t| self.resolver.resolve_type(t))
                    .transpose()?,
            },
            wire::Expr::Constant { ty, value } => match value {
                // a constant carrying an expression payload unwraps in place
                ArgValue::Expr(inner) => self.node(inner)?,
                data => Expr::Constant {
                    ty: ty.clone(),
                    value: self.const_value(ty.as_ref(), data)?,
                },
            },
            wire::Expr::Parameter(node) => Expr::Parameter(self.params.resolve(node)?),
            wire::Expr::Member { expr, member } => {
                self.resolver.resolve_member(member)?;
                Expr::Member {
                    expr: self.opt_box(expr)?,
                    member: member.clone(),
                }
            }
            wire::Expr::MethodCall { method, this, args } => Expr::Call {
                call: self.call_kind(method)?,
                this: self.opt_box(this)?,
                args: self.opt_list(args.as_ref())?,
            },
            wire::Expr::Lambda { params, body } => Expr::Lambda {
                params: params
                    .as_ref()
                    .map(|ps| {
                        ps.iter()
                            .map(|p| self.params.resolve(p))
                            .collect::<Result<_, _>>()
                    })
                    .transpose()?,
                body: Box::new(self.node(body)?),
            },
            wire::Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: Box::new(self.node(test)?),
                if_true: Box::new(self.node(if_true)?),
                if_false: Box::new(self.node(if_false)?),
            },
            wire::Expr::New { ctor, args } => Expr::New {
                ctor: self.ctor_ref(ctor)?,
                args: self.opt_list(args.as_ref())?,
            },
            wire::Expr::NewArray { element, items } => Expr::NewArray {
                element: element.clone(),
                items: self.opt_list(items.as_ref())?,
            },
            wire::Expr::MemberInit {
                ctor,
                args,
                bindings,
            } => Expr::MemberInit {
                ctor: self.ctor_ref(ctor)?,
                args: self.opt_list(args.as_ref())?,
                bindings: bindings
                    .iter()
                    .map(|b| {
                        self.resolver.resolve_member(&b.member)?;
                        Ok(MemberAssign {
                            member: b.member.clone(),
                            expr: self.node(&b.expr)?,
                        })
                    })
                    .collect::<Result<_, TranslateError>>()?,
            },
            wire::Expr::ListInit { ctor, inits } => Expr::ListInit {
                ctor: self.ctor_ref(ctor)?,
                inits: inits
                    .iter()
                    .map(|init| self.list(&init.args))
                    .collect::<Result<_, _>>()?,
            },
            wire::Expr::Block { vars, exprs } => Expr::Block {
                vars: vars
                    .as_ref()
                    .map(|vs| {
                        vs.iter()
                            .map(|v| self.params.resolve(v))
                            .collect::<Result<_, _>>()
                    })
                    .transpose()?,
                exprs: self.list(exprs)?,
            },
            wire::Expr::Loop {
                body,
                break_label,
                continue_label,
            } => Expr::Loop {
                body: Box::new(self.node(body)?),
                break_label: break_label
                    .as_ref()
                    .map(|l| self.labels.resolve(l))
                    .transpose()?,
                continue_label: continue_label
                    .as_ref()
                    .map(|l| self.labels.resolve(l))
                    .transpose()?,
            },
            wire::Expr::Goto {
                kind,
                target,
                value,
            } => Expr::Goto {
                kind: *kind,
                target: self.labels.resolve(target)?,
                value: self.opt_box(value)?,
            },
            wire::Expr::Label { label, default } => Expr::Label {
                label: self.labels.resolve(label)?,
                default: self.opt_box(default)?,
            },
            wire::Expr::Try {
                body,
                handlers,
                finally,
            } => Expr::Try {
                body: Box::new(self.node(body)?),
                handlers: handlers
                    .iter()
                    .map(|h| {
                        Ok(CatchClause {
                            ty: h.ty.clone(),
                            var: h
                                .var
                                .as_ref()
                                .map(|v| self.params.resolve(v))
                                .transpose()?,
                            body: self.node(&h.body)?,
                            filter: h.filter.as_ref().map(|f| self.node(f)).transpose()?,
                        })
                    })
                    .collect::<Result<_, TranslateError>>()?,
                finally: self.opt_box(finally)?,
            },
            wire::Expr::Switch {
                subject,
                cases,
                default,
            } => Expr::Switch {
                subject: Box::new(self.node(subject)?),
                cases: cases
                    .iter()
                    .map(|c| {
                        Ok(SwitchArm {
                            values: self.list(&c.values)?,
                            body: self.node(&c.body)?,
                        })
                    })
                    .collect::<Result<_, TranslateError>>()?,
                default: self.opt_box(default)?,
            },
            wire::Expr::Default { ty } => Expr::Default {
                ty: self.resolver.resolve_type(ty)?,
            },
            wire::Expr::TypeIs { expr, ty } => Expr::TypeIs {
                expr: Box::new(self.node(expr)?),
                ty: self.resolver.resolve_type(ty)?,
            },
        };

        self.depth -= 1;
        Ok(raised)
    }

    fn opt_box(
        &mut self,
        expr: &Option<Box<wire::Expr>>,
    ) -> Result<Option<Box<Expr>>, TranslateError> {
        expr.as_ref()
            .map(|e| self.node(e).map(Box::new))
            .transpose()
    }

    fn opt_list(
        &mut self,
        exprs: Option<&Vec<wire::Expr>>,
    ) -> Result<Option<Vec<Expr>>, TranslateError> {
        exprs.map(|list| self.list(list)).transpose()
    }

    fn list(&mut self, exprs: &[wire::Expr]) -> Result<Vec<Expr>, TranslateError> {
        exprs.iter().map(|e| self.node(e)).collect()
    }

    fn call_kind(&self, method: &MethodRef) -> Result<CallKind, TranslateError> {
        match method {
            MethodRef::Query(op) => Ok(CallKind::Query(*op)),
            MethodRef::Known(m) => Ok(CallKind::Known(*m)),
            MethodRef::ByName(desc) => QueryOp::from_name(&desc.name)
                .map(CallKind::Query)
                .or_else(|| KnownMethod::from_name(&desc.name).map(CallKind::Known))
                .ok_or_else(|| {
                    ResolveError::Method {
                        descriptor: desc.to_string(),
                    }
                    .into()
                }),
        }
    }

    fn ctor_ref(&self, ctor: &wire::CtorDesc) -> Result<CtorRef, TranslateError> {
        let ty = self.resolver.resolve_ctor(ctor)?;

        Ok(CtorRef {
            ty,
            params: ctor.params.clone(),
        })
    }

    fn const_value(
        &mut self,
        ty: Option<&TypeName>,
        value: &ArgValue,
    ) -> Result<ConstValue, TranslateError> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(TranslateError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }

        let raised = match value {
            ArgValue::Scalar(v) => ConstValue::Scalar(v.clone()),
            ArgValue::Record(record) => ConstValue::Record(self.record(record)?),
            ArgValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.const_value(None, item)?);
                }
                ConstValue::Seq(Sequence {
                    element: element_of(ty),
                    items: out,
                })
            }
            ArgValue::Expr(_) => return Err(TranslateError::ExprInConstant),
            ArgValue::Resource(r) => self.bind_resource(r),
        };

        self.depth -= 1;
        Ok(raised)
    }

    /// Re-hydrate a property bag, resolving its declared type and reverse
    /// translating any expression-valued field.
    fn record(&mut self, record: &Record) -> Result<RecordValue, TranslateError> {
        self.resolver.resolve_type(&record.type_name)?;

        let mut out = RecordValue::new(record.type_name.clone());
        for (name, value) in &record.fields {
            out.fields.push((name.clone(), self.field(value)?));
        }

        Ok(out)
    }

    fn field(&mut self, value: &ArgValue) -> Result<FieldValue, TranslateError> {
        self.depth += 1;
        if self.depth > MAX_TREE_DEPTH {
            return Err(TranslateError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }

        let raised = match value {
            ArgValue::Scalar(v) => FieldValue::Scalar(v.clone()),
            ArgValue::Record(r) => FieldValue::Record(self.record(r)?),
            ArgValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.field(item)?);
                }
                FieldValue::List(out)
            }
            ArgValue::Expr(e) => FieldValue::Expr(Box::new(self.node(e)?)),
            ArgValue::Resource(r) => FieldValue::Resource(r.clone()),
        };

        self.depth -= 1;
        Ok(raised)
    }

    fn bind_resource(&self, resource: &ResourceRef) -> ConstValue {
        match self.bindings.and_then(|b| b.lookup(&resource.element)) {
            Some(handle) => ConstValue::Source(handle.clone()),
            None => ConstValue::Resource(resource.clone()),
        }
    }
}

/// Element type recovered from `Vec<element>` constant metadata.
fn element_of(ty: Option<&TypeName>) -> Option<TypeName> {
    ty.filter(|t| t.path == COLLECTION_PATH)
        .and_then(|t| t.args.first())
        .cloned()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::{
            ast::ParamRef,
            builder::{lambda, lit},
            eval::{Evaluated, Evaluator},
        },
        model::{RegistryResolver, TypeModel, TypeRegistry},
        node::{CtorDesc, ElementInit, InstanceId, LabelNode, MemberRef, MethodDesc, ParamNode},
        ops::GotoKind,
        source::{MemorySource, SourceHandle},
        translate::forward::to_wire,
        value::Value,
    };
    use std::sync::Arc;

    fn person_ty() -> TypeName {
        TypeName::new("people::Person")
    }

    fn resolver() -> RegistryResolver {
        let mut reg = TypeRegistry::new();
        reg.register(TypeModel::new(
            person_ty(),
            vec!["name".into(), "age".into()],
        ))
        .unwrap();
        RegistryResolver::new(Arc::new(reg))
    }

    fn handle() -> SourceHandle {
        MemorySource::<Record>::from_rows(person_ty(), Vec::new()).into_handle()
    }

    fn people_seq() -> Expr {
        let alice = RecordValue::new(person_ty())
            .with("name", FieldValue::Scalar("Alice".into()))
            .with("age", FieldValue::Scalar(35i64.into()));
        Expr::constant(ConstValue::Seq(Sequence {
            element: Some(person_ty()),
            items: vec![ConstValue::Record(alice)],
        }))
    }

    fn eval_bool(expr: &Expr) -> bool {
        match Evaluator::new().eval(expr) {
            Ok(Evaluated::Value(Value::Bool(b))) => b,
            other => panic!("expected bool, got {other:?}"),
        }
    }

    fn wlit(v: i64) -> wire::Expr {
        wire::Expr::constant(ArgValue::Scalar(Value::Int(v)))
    }

    #[test]
    fn round_trip_preserves_predicate_semantics() {
        let pred = lambda("x", |x| {
            x.field("age").gt(lit(30i64)) & x.field("name").starts_with(lit("A"))
        });
        let original = Expr::call_query(QueryOp::All, people_seq(), Some(vec![pred]));

        let wire_tree = to_wire(original.clone()).unwrap();
        let back = from_wire(&resolver(), &wire_tree).unwrap();

        assert!(eval_bool(&original));
        assert!(eval_bool(&back));
    }

    #[test]
    fn parameter_identity_survives_round_trip() {
        fn collect(expr: &Expr, out: &mut Vec<ParamRef>) {
            match expr {
                Expr::Parameter(p) => out.push(Arc::clone(p)),
                Expr::Binary { left, right, .. } => {
                    collect(left, out);
                    collect(right, out);
                }
                Expr::Member {
                    expr: Some(inner), ..
                } => collect(inner, out),
                _ => {}
            }
        }

        let tree = lambda("x", |x| {
            (x.field("age").gt(x.field("age"))) & x.field("age").lt(lit(99i64))
        });
        let wire_tree = to_wire(tree).unwrap();
        let back = from_wire(&resolver(), &wire_tree).unwrap();

        let Expr::Lambda {
            params: Some(params),
            body,
        } = back
        else {
            panic!("expected lambda");
        };
        let mut refs = Vec::new();
        collect(&body, &mut refs);

        assert_eq!(params.len(), 1);
        assert_eq!(refs.len(), 3);
        assert!(refs.iter().all(|r| Arc::ptr_eq(r, &params[0])));
    }

    #[test]
    fn by_name_descriptors_resolve_against_the_catalog() {
        let where_call = wire::Expr::MethodCall {
            method: MethodRef::ByName(MethodDesc::new("where")),
            this: Some(Box::new(wlit(0))),
            args: None,
        };
        let back = from_wire(&resolver(), &where_call).unwrap();
        assert!(matches!(
            back,
            Expr::Call {
                call: CallKind::Query(QueryOp::Where),
                ..
            }
        ));

        let starts = wire::Expr::MethodCall {
            method: MethodRef::ByName(MethodDesc::new("starts_with")),
            this: Some(Box::new(wlit(0))),
            args: Some(vec![wlit(1)]),
        };
        let back = from_wire(&resolver(), &starts).unwrap();
        assert!(matches!(
            back,
            Expr::Call {
                call: CallKind::Known(KnownMethod::StartsWith),
                ..
            }
        ));
    }

    #[test]
    fn unknown_method_names_carry_their_descriptor() {
        let call = wire::Expr::MethodCall {
            method: MethodRef::ByName(MethodDesc::new("teleport")),
            this: Some(Box::new(wlit(0))),
            args: None,
        };
        let err = from_wire(&resolver(), &call).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Resolve(ResolveError::Method { .. })
        ));
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn resources_bind_to_live_handles() {
        let live = handle();
        let mut bindings = SourceBindings::new();
        bindings.bind(person_ty(), live.clone());

        let tree = wire::Expr::Constant {
            ty: None,
            value: ArgValue::Resource(ResourceRef::new(person_ty())),
        };
        let back = from_wire_bound(&resolver(), &bindings, &tree).unwrap();

        let Expr::Constant {
            value: ConstValue::Source(bound),
            ..
        } = back
        else {
            panic!("expected live source");
        };
        assert!(bound.ptr_eq(&live));
    }

    #[test]
    fn unbound_resources_survive_as_placeholders() {
        let tree = wire::Expr::Constant {
            ty: None,
            value: ArgValue::Resource(ResourceRef::new(person_ty())),
        };
        let back = from_wire(&resolver(), &tree).unwrap();
        assert!(matches!(
            back,
            Expr::Constant {
                value: ConstValue::Resource(_),
                ..
            }
        ));
    }

    #[test]
    fn record_constants_resolve_their_declared_type() {
        let known = Record::new(person_ty()).with("age", ArgValue::Scalar(Value::Int(35)));
        let back = from_wire(
            &resolver(),
            &wire::Expr::constant(ArgValue::Record(known)),
        )
        .unwrap();
        assert!(matches!(
            back,
            Expr::Constant {
                value: ConstValue::Record(_),
                ..
            }
        ));

        let ghost = Record::new(TypeName::new("ghosts::Ghost"));
        let err = from_wire(
            &resolver(),
            &wire::Expr::constant(ArgValue::Record(ghost)),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ghosts::Ghost"));
    }

    #[test]
    fn expression_fields_rise_recursively() {
        let bag = Record::new(TypeName::new("record"))
            .with("probe", ArgValue::Expr(Box::new(wlit(7))));
        let back = from_wire(
            &resolver(),
            &wire::Expr::constant(ArgValue::Record(bag)),
        )
        .unwrap();

        let Expr::Constant {
            value: ConstValue::Record(record),
            ..
        } = back
        else {
            panic!("expected record constant");
        };
        assert!(matches!(record.get("probe"), Some(FieldValue::Expr(_))));
    }

    #[test]
    fn constants_wrapping_expressions_unwrap() {
        let tree = wire::Expr::Constant {
            ty: None,
            value: ArgValue::Expr(Box::new(wlit(7))),
        };
        let back = from_wire(&resolver(), &tree).unwrap();
        assert_eq!(
            back,
            Expr::Constant {
                ty: None,
                value: ConstValue::Scalar(Value::Int(7)),
            }
        );
    }

    #[test]
    fn typed_sequences_recover_their_element() {
        let tree = wire::Expr::Constant {
            ty: Some(TypeName::generic("Vec", vec![person_ty()])),
            value: ArgValue::List(Vec::new()),
        };
        let back = from_wire(&resolver(), &tree).unwrap();

        let Expr::Constant {
            value: ConstValue::Seq(seq),
            ..
        } = back
        else {
            panic!("expected sequence constant");
        };
        assert_eq!(seq.element, Some(person_ty()));
    }

    #[test]
    fn list_init_resolves_collection_ctors() {
        let tree = wire::Expr::ListInit {
            ctor: CtorDesc::new(TypeName::generic("Vec", vec![TypeName::new("i64")])),
            inits: vec![ElementInit { args: vec![wlit(1)] }],
        };
        let back = from_wire(&resolver(), &tree).unwrap();

        let Expr::ListInit { ctor, inits } = back else {
            panic!("expected list init");
        };
        assert_eq!(ctor.ty.name.path, "Vec");
        assert_eq!(inits.len(), 1);
    }

    #[test]
    fn loop_labels_share_one_definition() {
        let exit = LabelNode {
            id: InstanceId::new(0),
            name: Some("exit".into()),
        };
        let tree = wire::Expr::Loop {
            body: Box::new(wire::Expr::Goto {
                kind: GotoKind::Break,
                target: exit.clone(),
                value: Some(Box::new(wlit(1))),
            }),
            break_label: Some(exit),
            continue_label: None,
        };
        let back = from_wire(&resolver(), &tree).unwrap();

        let Expr::Loop {
            body,
            break_label: Some(break_label),
            ..
        } = back
        else {
            panic!("expected loop");
        };
        let Expr::Goto { target, .. } = *body else {
            panic!("expected goto body");
        };
        assert!(Arc::ptr_eq(&target, &break_label));
    }

    #[test]
    fn unresolved_members_carry_their_descriptor() {
        let tree = wire::Expr::Member {
            expr: Some(Box::new(wire::Expr::Parameter(ParamNode {
                id: InstanceId::new(0),
                name: "x".into(),
                ty: None,
            }))),
            member: MemberRef::on(person_ty(), "height"),
        };
        let err = from_wire(&resolver(), &tree).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Resolve(ResolveError::Member { .. })
        ));
        assert!(err.to_string().contains("height"));
    }
}
