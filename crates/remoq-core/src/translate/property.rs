use crate::{
    exec::prepare::canonical,
    expr::{
        ast::{ConstValue, Expr, FieldValue, ParamDef, ParamRef, RecordValue, Sequence},
        builder::lambda,
        eval::{Evaluated, Evaluator},
    },
    model::{ANON_RECORD_PATH, RegistryResolver, TypeModel, TypeRegistry},
    node::{self as wire, ArgValue, ResourceRef, TypeName},
    ops::{BinaryOp, QueryOp, UnaryOp},
    translate::{Forward, from_wire, to_wire},
    value::Value,
};
use num_bigint::BigInt;
use proptest::prelude::*;
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

fn record_of(values: Vec<FieldValue>) -> RecordValue {
    let mut record = RecordValue::new(TypeName::new(ANON_RECORD_PATH));
    for (i, value) in values.into_iter().enumerate() {
        record.fields.push((format!("f{i}"), value));
    }
    record
}

/// Every parameter reference in evaluation order. Covers the shapes the
/// binder property builds: additions over member accesses.
fn binder_refs(expr: &Expr, out: &mut Vec<ParamRef>) {
    match expr {
        Expr::Parameter(param) => out.push(Arc::clone(param)),
        Expr::Binary { left, right, .. } => {
            binder_refs(left, out);
            binder_refs(right, out);
        }
        Expr::Member {
            expr: Some(receiver),
            ..
        } => binder_refs(receiver, out),
        _ => {}
    }
}

// floats stay out: NaN breaks the equality the properties rely on
fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::Uint),
        any::<i128>().prop_map(|n| Value::BigInt(BigInt::from(n))),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::Text),
        Just(Value::Null),
    ]
}

fn arb_field() -> impl Strategy<Value = FieldValue> {
    let leaf = prop_oneof![
        arb_scalar().prop_map(FieldValue::Scalar),
        Just(FieldValue::Resource(ResourceRef::new(person_ty()))),
        arb_scalar().prop_map(|v| FieldValue::Expr(Box::new(Expr::value(v)))),
    ];
    leaf.prop_recursive(2, 12, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(FieldValue::List),
            prop::collection::vec(inner, 0..3)
                .prop_map(|values| FieldValue::Record(record_of(values))),
        ]
    })
}

// live sources lower to resource descriptors and never round-trip
// verbatim; sequences stay untyped because a known element type
// resurfaces as a synthesized `Vec<element>` annotation
fn arb_const() -> impl Strategy<Value = ConstValue> {
    prop_oneof![
        arb_scalar().prop_map(ConstValue::Scalar),
        Just(ConstValue::Resource(ResourceRef::new(person_ty()))),
        prop::collection::vec(arb_field(), 0..3)
            .prop_map(|values| ConstValue::Record(record_of(values))),
        prop::collection::vec(arb_scalar().prop_map(ConstValue::Scalar), 0..4).prop_map(|items| {
            ConstValue::Seq(Sequence {
                element: None,
                items,
            })
        }),
    ]
}

fn arb_binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::And),
        Just(BinaryOp::Or),
        Just(BinaryOp::Eq),
        Just(BinaryOp::Lt),
    ]
}

fn arb_query_op() -> impl Strategy<Value = QueryOp> {
    prop_oneof![
        Just(QueryOp::Where),
        Just(QueryOp::Select),
        Just(QueryOp::Skip),
        Just(QueryOp::Take),
        Just(QueryOp::Distinct),
        Just(QueryOp::Count),
        Just(QueryOp::First),
    ]
}

fn arb_tree() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        arb_const().prop_map(Expr::constant),
        "[a-z]{1,4}".prop_map(|name| Expr::Parameter(ParamDef::fresh(name))),
    ];
    leaf.prop_recursive(3, 20, 3, |inner| {
        prop_oneof![
            (arb_binary_op(), inner.clone(), inner.clone())
                .prop_map(|(op, left, right)| Expr::binary(op, left, right)),
            inner
                .clone()
                .prop_map(|operand| Expr::unary(UnaryOp::Not, operand)),
            (inner.clone(), "[a-z]{1,6}")
                .prop_map(|(receiver, name)| Expr::member(receiver, name)),
            (
                arb_query_op(),
                inner.clone(),
                prop::option::of(prop::collection::vec(inner.clone(), 0..2)),
            )
                .prop_map(|(op, this, args)| Expr::call_query(op, this, args)),
            (inner.clone(), inner.clone(), inner.clone()).prop_map(|(test, if_true, if_false)| {
                Expr::Conditional {
                    test: Box::new(test),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                }
            }),
            ("[a-z]{1,4}", inner)
                .prop_map(|(name, body)| Expr::lambda(vec![ParamDef::fresh(name)], body)),
        ]
    })
}

proptest! {
    #[test]
    fn lowering_then_raising_preserves_structure(tree in arb_tree()) {
        let wire_tree = Forward::new().translate(&tree).unwrap();
        let back = from_wire(&resolver(), &wire_tree).unwrap();
        prop_assert_eq!(back, tree);
    }

    #[test]
    fn a_second_trip_changes_nothing(tree in arb_tree()) {
        let first = Forward::new().translate(&tree).unwrap();
        let back = from_wire(&resolver(), &first).unwrap();
        let second = Forward::new().translate(&back).unwrap();
        prop_assert_eq!(second, first);
    }

    #[test]
    fn wire_trees_survive_json(tree in arb_tree()) {
        let wire_tree = Forward::new().translate(&tree).unwrap();
        let json = serde_json::to_string(&wire_tree).unwrap();
        let parsed: wire::Expr = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(parsed, wire_tree);
    }
}

proptest! {
    #[test]
    fn shared_binders_stay_shared(uses in 1usize..6) {
        let tree = lambda("x", |x| {
            let mut body = x.field("age");
            for _ in 1..uses {
                body = Expr::binary(BinaryOp::Add, body, x.field("age"));
            }
            body
        });

        let wire_tree = Forward::new().translate(&tree).unwrap();
        let back = from_wire(&resolver(), &wire_tree).unwrap();

        let Expr::Lambda { params: Some(params), body } = back else {
            panic!("expected a lambda round trip");
        };
        let mut refs = Vec::new();
        binder_refs(&body, &mut refs);

        prop_assert_eq!(refs.len(), uses);
        prop_assert_eq!(params.len(), 1);
        for reference in &refs {
            prop_assert!(Arc::ptr_eq(reference, &params[0]));
        }
    }
}

proptest! {
    #[test]
    fn canonicalization_is_idempotent(tree in arb_tree(), quotes in 0usize..4) {
        let wire_tree = Forward::new().translate(&tree).unwrap();

        let mut wrapped = wire::Expr::constant(ArgValue::Expr(Box::new(wire_tree.clone())));
        for _ in 0..quotes {
            wrapped = wire::Expr::unary(UnaryOp::Quote, wrapped);
        }

        let once = canonical(wrapped).unwrap();
        let twice = canonical(once.clone()).unwrap();
        prop_assert_eq!(&twice, &once);

        // arb trees carry no quote markers of their own, so the
        // canonical form is exact: the wrapper unfolds and at most one
        // quote level survives
        let expected = if quotes == 0 {
            wire_tree
        } else {
            wire::Expr::unary(UnaryOp::Quote, wire_tree)
        };
        prop_assert_eq!(once, expected);
    }
}

proptest! {
    #[test]
    fn folded_lowering_agrees_with_the_interpreter(
        a in -10_000i64..10_000,
        b in -10_000i64..10_000,
        op in prop_oneof![Just(BinaryOp::Add), Just(BinaryOp::Sub), Just(BinaryOp::Mul)],
    ) {
        let tree = Expr::binary(op, Expr::value(a), Expr::value(b));

        let Evaluated::Value(expected) = Evaluator::new().eval(&tree).unwrap() else {
            panic!("expected a scalar result");
        };

        let wire_tree = to_wire(tree).unwrap();
        prop_assert_eq!(wire_tree, wire::Expr::constant(ArgValue::Scalar(expected)));
    }
}
