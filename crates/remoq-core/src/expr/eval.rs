use crate::{
    MAX_TREE_DEPTH,
    expr::ast::{
        CallKind, CatchClause, ConstValue, CtorRef, Expr, FieldValue, LabelRef, ParamRef,
        RecordValue,
    },
    model::TypeModel,
    node::{ArgValue, Record, TypeName},
    ops::{BinaryOp, GotoKind, KnownMethod, QueryOp, UnaryOp},
    source::{SourceError, SourceHandle},
    value::{ArithError, TextMode, Value, arith},
};
use std::{cmp::Ordering, sync::Arc};
use thiserror::Error as ThisError;

///
/// Evaluator
///
/// Tree-walking interpreter for the native AST. Evaluation is synchronous
/// and single-threaded; asynchronous sources must be drained ahead of time
/// and handed in as prefetched row sets, keyed by source identity.
///
/// Query call spines are evaluated as one chain so that secondary sort
/// operators extend the ordering established by the primary sort instead
/// of re-sorting blindly.
///

///
/// EvalError
///

#[derive(Debug, ThisError)]
pub enum EvalError {
    #[error(transparent)]
    Arith(#[from] ArithError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("sequence contains no elements")]
    NoElements,

    #[error("sequence contains no matching element")]
    NoMatching,

    #[error("sequence contains more than one element")]
    MoreThanOne,

    #[error("sequence contains more than one matching element")]
    MoreThanOneMatching,

    #[error("parameter '{name}' is not bound")]
    UnboundParameter { name: String },

    #[error("resource over {element} is not bound to a live source")]
    UnboundResource { element: TypeName },

    #[error("source over {element} is asynchronous and must be drained before evaluation")]
    AsyncSource { element: TypeName },

    #[error("cannot read member '{member}' on {on}")]
    Member { member: String, on: String },

    #[error("{context} expected {expected}, got {actual}")]
    Shape {
        context: &'static str,
        expected: &'static str,
        actual: String,
    },

    #[error("{method} takes {expected} argument(s), got {actual}")]
    Arity {
        method: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("index {index} is out of bounds for a sequence of {len}")]
    IndexRange { index: i64, len: usize },

    #[error("{op} requires an established ordering")]
    OrderRequired { op: &'static str },

    #[error("terminal operator {op} must end the chain")]
    TerminalMidChain { op: &'static str },

    #[error("cannot convert {from} to {to}")]
    ConvertFailed { from: &'static str, to: String },

    #[error("a record constant with expression fields has no runtime value")]
    ExprField,

    #[error("{kind} has no runtime value outside call position")]
    Unevaluable { kind: &'static str },

    #[error("{kind} jump escaped the expression")]
    EscapedJump { kind: &'static str },

    #[error("expression nesting exceeds {max} levels")]
    DepthExceeded { max: usize },
}

///
/// Item
///
/// One element of a runtime sequence. Rows come off sources; values come
/// from scalar projections.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Item {
    Value(Value),
    Row(Record),
}

impl Item {
    #[must_use]
    pub fn into_evaluated(self) -> Evaluated {
        match self {
            Self::Value(v) => Evaluated::Value(v),
            Self::Row(r) => Evaluated::Row(r),
        }
    }
}

/// Element equality under operator semantics: scalars compare through the
/// strict comparator, rows compare structurally.
#[must_use]
pub fn item_eq(left: &Item, right: &Item) -> bool {
    match (left, right) {
        (Item::Value(a), Item::Value(b)) => Value::compare(a, b) == Some(Ordering::Equal),
        (Item::Row(a), Item::Row(b)) => a == b,
        _ => false,
    }
}

///
/// Evaluated
///
/// The result domain of evaluation.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Evaluated {
    Value(Value),
    Row(Record),
    Seq(Vec<Item>),
    Source(SourceHandle),
}

impl Evaluated {
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Row(_) => "row",
            Self::Seq(_) => "sequence",
            Self::Source(_) => "source",
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Value(v) => v.type_label().to_string(),
            Self::Row(r) => format!("row of {}", r.type_name),
            Self::Seq(_) => "sequence".to_string(),
            Self::Source(h) => format!("source of {}", h.element()),
        }
    }

    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }
}

///
/// Flow
///
/// Internal evaluation outcome: either a value or a jump in transit to its
/// label. Jumps propagate through value positions until a loop, block
/// label, or lambda boundary absorbs them.
///

#[derive(Debug)]
enum Flow {
    Value(Evaluated),
    Jump {
        kind: GotoKind,
        target: LabelRef,
        value: Option<Evaluated>,
    },
}

macro_rules! try_value {
    ($flow:expr) => {
        match $flow {
            Flow::Value(value) => value,
            jump @ Flow::Jump { .. } => return Ok(jump),
        }
    };
}

/// One key of a pending sort, collected across consecutive sort operators.
struct SortKey<'e> {
    selector: &'e Expr,
    descending: bool,
}

///
/// Evaluator
///

pub struct Evaluator<'a> {
    /// Pre-drained rows for sources that cannot be scanned synchronously.
    prefetched: &'a [(SourceHandle, Vec<Record>)],
    /// Parameter environment, innermost binding last.
    bindings: Vec<(ParamRef, Evaluated)>,
    depth: usize,
}

impl Default for Evaluator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Evaluator<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prefetched: &[],
            bindings: Vec::new(),
            depth: 0,
        }
    }

    #[must_use]
    pub const fn with_prefetched(prefetched: &'a [(SourceHandle, Vec<Record>)]) -> Self {
        Self {
            prefetched,
            bindings: Vec::new(),
            depth: 0,
        }
    }

    /// Evaluate an expression to a runtime value.
    pub fn eval(&mut self, expr: &Expr) -> Result<Evaluated, EvalError> {
        match self.eval_flow(expr)? {
            Flow::Value(value) => Ok(value),
            Flow::Jump { kind, .. } => Err(EvalError::EscapedJump { kind: kind.name() }),
        }
    }

    /// Materialize any sequence-shaped result into items. Sync sources are
    /// scanned here; async sources must have been prefetched.
    pub fn materialize(
        &mut self,
        value: Evaluated,
        context: &'static str,
    ) -> Result<Vec<Item>, EvalError> {
        match value {
            Evaluated::Seq(items) => Ok(items),
            Evaluated::Value(Value::List(values)) => {
                Ok(values.into_iter().map(Item::Value).collect())
            }
            Evaluated::Source(handle) => self.scan_source(&handle),
            other => Err(EvalError::Shape {
                context,
                expected: "a sequence",
                actual: other.describe(),
            }),
        }
    }

    fn scan_source(&self, handle: &SourceHandle) -> Result<Vec<Item>, EvalError> {
        for (known, rows) in self.prefetched {
            if known.ptr_eq(handle) {
                return Ok(rows.iter().cloned().map(Item::Row).collect());
            }
        }
        match handle {
            SourceHandle::Sync(source) => {
                let mut items = Vec::new();
                for row in source.scan()? {
                    items.push(Item::Row(row?));
                }
                Ok(items)
            }
            SourceHandle::Async(_) => Err(EvalError::AsyncSource {
                element: handle.element(),
            }),
        }
    }

    ///
    /// NODE DISPATCH
    ///

    fn eval_flow(&mut self, expr: &Expr) -> Result<Flow, EvalError> {
        if self.depth >= MAX_TREE_DEPTH {
            return Err(EvalError::DepthExceeded {
                max: MAX_TREE_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.eval_node(expr);
        self.depth -= 1;
        result
    }

    #[expect(clippy::too_many_lines)]
    fn eval_node(&mut self, expr: &Expr) -> Result<Flow, EvalError> {
        match expr {
            Expr::Constant { value, .. } => Ok(Flow::Value(self.eval_const(value)?)),

            Expr::Parameter(param) => {
                let bound = self
                    .bindings
                    .iter()
                    .rev()
                    .find(|(p, _)| Arc::ptr_eq(p, param))
                    .map(|(_, v)| v.clone());
                match bound {
                    Some(value) => Ok(Flow::Value(value)),
                    None => Err(EvalError::UnboundParameter {
                        name: param.name.clone(),
                    }),
                }
            }

            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),

            Expr::Unary { op, operand, ty } => self.eval_unary(*op, operand, ty.as_deref()),

            Expr::Member { expr, member } => {
                let Some(receiver) = expr else {
                    return Err(EvalError::Member {
                        member: member.name.clone(),
                        on: "static scope".to_string(),
                    });
                };
                let value = try_value!(self.eval_flow(receiver)?);
                Ok(Flow::Value(self.read_member(value, &member.name)?))
            }

            Expr::Call {
                call: CallKind::Known(method),
                this,
                args,
            } => {
                let Some(receiver) = this else {
                    return Err(EvalError::Arity {
                        method: method.name(),
                        expected: method.arity() + 1,
                        actual: 0,
                    });
                };
                let receiver = try_value!(self.eval_flow(receiver)?);
                let args = args.as_deref().unwrap_or_default();
                if args.len() != method.arity() {
                    return Err(EvalError::Arity {
                        method: method.name(),
                        expected: method.arity(),
                        actual: args.len(),
                    });
                }
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(try_value!(self.eval_flow(arg)?));
                }
                Ok(Flow::Value(known_method(*method, receiver, &arg_values)?))
            }

            Expr::Call {
                call: CallKind::Query(_),
                ..
            } => {
                let Some((origin, chain)) = expr.query_spine() else {
                    return Err(EvalError::Shape {
                        context: "query call",
                        expected: "a receiver chain ending in a source",
                        actual: "a detached call".to_string(),
                    });
                };
                self.eval_query_chain(origin, &chain)
            }

            Expr::Lambda { .. } => Err(EvalError::Unevaluable { kind: "lambda" }),

            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = try_value!(self.eval_flow(test)?);
                if expect_bool(test, "conditional test")? {
                    self.eval_flow(if_true)
                } else {
                    self.eval_flow(if_false)
                }
            }

            Expr::New { ctor, args } => {
                let record = try_value!(self.eval_new(ctor, args.as_deref())?);
                Ok(Flow::Value(record))
            }

            Expr::NewArray { items, .. } => {
                let mut out = Vec::new();
                for item in items.as_deref().unwrap_or_default() {
                    let value = try_value!(self.eval_flow(item)?);
                    out.push(to_item(value, "array element")?);
                }
                Ok(Flow::Value(seq_or_list(out)))
            }

            Expr::MemberInit {
                ctor,
                args,
                bindings,
            } => {
                let base = try_value!(self.eval_new(ctor, args.as_deref())?);
                let Evaluated::Row(mut record) = base else {
                    return Err(EvalError::Shape {
                        context: "member init",
                        expected: "a constructed row",
                        actual: base.describe(),
                    });
                };
                for binding in bindings {
                    let value = try_value!(self.eval_flow(&binding.expr)?);
                    let arg = to_arg(value, "member init binding")?;
                    set_field(&mut record, &binding.member.name, arg);
                }
                Ok(Flow::Value(Evaluated::Row(record)))
            }

            Expr::ListInit { inits, .. } => {
                let mut out = Vec::new();
                for init in inits {
                    let [element] = init.as_slice() else {
                        return Err(EvalError::Arity {
                            method: "list init",
                            expected: 1,
                            actual: init.len(),
                        });
                    };
                    let value = try_value!(self.eval_flow(element)?);
                    out.push(to_item(value, "list element")?);
                }
                Ok(Flow::Value(seq_or_list(out)))
            }

            Expr::Block { vars, exprs } => self.eval_block(vars.as_deref(), exprs),

            Expr::Loop {
                body,
                break_label,
                continue_label,
            } => loop {
                match self.eval_flow(body)? {
                    Flow::Value(_) => {}
                    Flow::Jump {
                        kind,
                        target,
                        value,
                    } => {
                        if break_label.as_ref().is_some_and(|l| Arc::ptr_eq(l, &target)) {
                            return Ok(Flow::Value(value.unwrap_or(Evaluated::Value(Value::Null))));
                        }
                        if continue_label
                            .as_ref()
                            .is_some_and(|l| Arc::ptr_eq(l, &target))
                        {
                            continue;
                        }
                        return Ok(Flow::Jump {
                            kind,
                            target,
                            value,
                        });
                    }
                }
            },

            Expr::Goto {
                kind,
                target,
                value,
            } => {
                let value = match value {
                    Some(v) => Some(try_value!(self.eval_flow(v)?)),
                    None => None,
                };
                Ok(Flow::Jump {
                    kind: *kind,
                    target: Arc::clone(target),
                    value,
                })
            }

            Expr::Label { default, .. } => match default {
                Some(d) => self.eval_flow(d),
                None => Ok(Flow::Value(Evaluated::Value(Value::Null))),
            },

            Expr::Try {
                body,
                handlers,
                finally,
            } => {
                let outcome = match self.eval_flow(body) {
                    Err(error) => self.eval_handlers(handlers, error),
                    flowed => flowed,
                };
                if let Some(finally) = finally {
                    // finally runs for value and jump outcomes alike
                    match self.eval_flow(finally)? {
                        Flow::Value(_) => {}
                        jump @ Flow::Jump { .. } => return Ok(jump),
                    }
                }
                outcome
            }

            Expr::Switch {
                subject,
                cases,
                default,
            } => {
                let subject = try_value!(self.eval_flow(subject)?);
                let subject = to_item(subject, "switch subject")?;
                for case in cases {
                    for candidate in &case.values {
                        let value = try_value!(self.eval_flow(candidate)?);
                        if item_eq(&subject, &to_item(value, "switch case")?) {
                            return self.eval_flow(&case.body);
                        }
                    }
                }
                match default {
                    Some(d) => self.eval_flow(d),
                    None => Ok(Flow::Value(Evaluated::Value(Value::Null))),
                }
            }

            Expr::Default { ty } => Ok(Flow::Value(Evaluated::Value(default_value(ty)))),

            Expr::TypeIs { expr, ty } => {
                let value = try_value!(self.eval_flow(expr)?);
                Ok(Flow::Value(Evaluated::Value(Value::Bool(type_is(
                    &value, ty,
                )))))
            }
        }
    }

    ///
    /// CONSTANTS
    ///

    fn eval_const(&mut self, value: &ConstValue) -> Result<Evaluated, EvalError> {
        match value {
            ConstValue::Scalar(v) => Ok(Evaluated::Value(v.clone())),
            ConstValue::Record(rv) => Ok(Evaluated::Row(record_from_const(rv)?)),
            ConstValue::Seq(seq) => {
                let mut items = Vec::with_capacity(seq.items.len());
                for item in &seq.items {
                    let value = self.eval_const(item)?;
                    items.push(to_item(value, "constant sequence")?);
                }
                Ok(Evaluated::Seq(items))
            }
            ConstValue::Source(handle) => Ok(Evaluated::Source(handle.clone())),
            ConstValue::Resource(resource) => Err(EvalError::UnboundResource {
                element: resource.element.clone(),
            }),
        }
    }

    ///
    /// OPERATORS
    ///

    fn eval_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Flow, EvalError> {
        // short-circuit connectives first
        if op.is_logical() {
            let left = try_value!(self.eval_flow(left)?);
            let left = expect_bool(left, "logical operand")?;
            let short = match op {
                BinaryOp::And => !left,
                _ => left,
            };
            if short {
                return Ok(Flow::Value(Evaluated::Value(Value::Bool(left))));
            }
            let right = try_value!(self.eval_flow(right)?);
            let right = expect_bool(right, "logical operand")?;
            return Ok(Flow::Value(Evaluated::Value(Value::Bool(right))));
        }

        if op == BinaryOp::Coalesce {
            let left = try_value!(self.eval_flow(left)?);
            if matches!(left, Evaluated::Value(Value::Null)) {
                return self.eval_flow(right);
            }
            return Ok(Flow::Value(left));
        }

        let lhs = try_value!(self.eval_flow(left)?);
        let rhs = try_value!(self.eval_flow(right)?);

        if op == BinaryOp::ArrayIndex {
            return Ok(Flow::Value(self.index_sequence(lhs, &rhs)?));
        }

        if op.is_comparison() {
            return Ok(Flow::Value(Evaluated::Value(Value::Bool(compare_outcome(
                op, &lhs, &rhs,
            )))));
        }

        // arithmetic and bitwise forms work on scalar values
        let left = expect_value(lhs, "arithmetic operand")?;
        let right = expect_value(rhs, "arithmetic operand")?;
        Ok(Flow::Value(Evaluated::Value(arith::binary(
            op, &left, &right,
        )?)))
    }

    fn eval_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        ty: Option<&TypeModel>,
    ) -> Result<Flow, EvalError> {
        if op == UnaryOp::Quote {
            return Err(EvalError::Unevaluable { kind: "quote" });
        }

        let value = try_value!(self.eval_flow(operand)?);
        let result = match op {
            UnaryOp::Neg => Evaluated::Value(arith::neg(&expect_value(value, "negation")?)?),
            UnaryOp::BitNot => {
                Evaluated::Value(arith::bit_not(&expect_value(value, "bitwise not")?)?)
            }
            UnaryOp::Not => Evaluated::Value(Value::Bool(!expect_bool(value, "logical not")?)),
            UnaryOp::Plus => {
                let inner = expect_value(value, "unary plus")?;
                if !inner.is_numeric() {
                    return Err(EvalError::Shape {
                        context: "unary plus",
                        expected: "a numeric value",
                        actual: inner.type_label().to_string(),
                    });
                }
                Evaluated::Value(inner)
            }
            UnaryOp::ArrayLength => {
                let len = match &value {
                    Evaluated::Seq(items) => items.len(),
                    Evaluated::Value(Value::List(values)) => values.len(),
                    other => {
                        return Err(EvalError::Shape {
                            context: "length",
                            expected: "a sequence",
                            actual: other.describe(),
                        });
                    }
                };
                Evaluated::Value(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            UnaryOp::Convert => {
                let Some(target) = ty else {
                    return Err(EvalError::Shape {
                        context: "convert",
                        expected: "a target type",
                        actual: "none".to_string(),
                    });
                };
                convert_evaluated(value, target)?
            }
            UnaryOp::TypeAs => {
                let Some(target) = ty else {
                    return Err(EvalError::Shape {
                        context: "type cast",
                        expected: "a target type",
                        actual: "none".to_string(),
                    });
                };
                if type_is(&value, target) {
                    value
                } else {
                    Evaluated::Value(Value::Null)
                }
            }
            UnaryOp::Quote => unreachable!("quote arm must return before operand evaluation"),
        };

        Ok(Flow::Value(result))
    }

    fn index_sequence(&mut self, lhs: Evaluated, rhs: &Evaluated) -> Result<Evaluated, EvalError> {
        let index = rhs
            .as_value()
            .and_then(Value::to_i64)
            .ok_or(EvalError::Shape {
                context: "index",
                expected: "an integer",
                actual: rhs.describe(),
            })?;
        let items = self.materialize(lhs, "indexed sequence")?;
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i).cloned());
        slot.map(Item::into_evaluated)
            .ok_or(EvalError::IndexRange {
                index,
                len: items.len(),
            })
    }

    ///
    /// MEMBERS AND METHODS
    ///

    fn read_member(&self, receiver: Evaluated, name: &str) -> Result<Evaluated, EvalError> {
        match receiver {
            Evaluated::Row(record) => match record.get(name) {
                Some(value) => arg_to_evaluated(value),
                None => Err(EvalError::Member {
                    member: name.to_string(),
                    on: record.type_name.to_string(),
                }),
            },
            other => Err(EvalError::Member {
                member: name.to_string(),
                on: other.describe(),
            }),
        }
    }

    ///
    /// QUERY CHAINS
    ///

    #[expect(clippy::too_many_lines)]
    fn eval_query_chain(
        &mut self,
        origin: &Expr,
        chain: &[(QueryOp, Option<&[Expr]>)],
    ) -> Result<Flow, EvalError> {
        let source = try_value!(self.eval_flow(origin)?);
        let mut items = self.materialize(source, "query source")?;
        let mut pending: Vec<SortKey<'_>> = Vec::new();

        for (idx, (op, args)) in chain.iter().enumerate() {
            let args = args.unwrap_or_default();

            // a non-secondary operator closes out the pending ordering
            if !op.is_secondary_sort() && !pending.is_empty() {
                items = self.apply_sort(items, &pending)?;
                pending.clear();
            }
            if op.is_terminal() && idx + 1 != chain.len() {
                return Err(EvalError::TerminalMidChain { op: op.name() });
            }

            match op {
                QueryOp::OrderBy | QueryOp::OrderByDesc => pending.push(SortKey {
                    selector: require_lambda(args, *op)?,
                    descending: *op == QueryOp::OrderByDesc,
                }),
                QueryOp::ThenBy | QueryOp::ThenByDesc => {
                    if pending.is_empty() {
                        return Err(EvalError::OrderRequired { op: op.name() });
                    }
                    pending.push(SortKey {
                        selector: require_lambda(args, *op)?,
                        descending: *op == QueryOp::ThenByDesc,
                    });
                }

                QueryOp::Where => {
                    let predicate = require_lambda(args, *op)?;
                    let mut kept = Vec::with_capacity(items.len());
                    for item in items {
                        if self.apply_predicate(predicate, &item)? {
                            kept.push(item);
                        }
                    }
                    items = kept;
                }
                QueryOp::Select => {
                    let selector = require_lambda(args, *op)?;
                    let mut mapped = Vec::with_capacity(items.len());
                    for item in items {
                        let value = self.apply_lambda(selector, item.into_evaluated())?;
                        mapped.push(to_item(value, "select projection")?);
                    }
                    items = mapped;
                }
                QueryOp::Skip => {
                    // negative counts behave as zero
                    let n = usize::try_from(self.int_arg(args, *op)?).unwrap_or(0);
                    if n >= items.len() {
                        items.clear();
                    } else {
                        items.drain(..n);
                    }
                }
                QueryOp::Take => {
                    let n = usize::try_from(self.int_arg(args, *op)?).unwrap_or(0);
                    items.truncate(n);
                }
                QueryOp::Distinct => {
                    let mut unique: Vec<Item> = Vec::with_capacity(items.len());
                    for item in items {
                        if !unique.iter().any(|seen| item_eq(seen, &item)) {
                            unique.push(item);
                        }
                    }
                    items = unique;
                }
                QueryOp::Reverse => items.reverse(),
                QueryOp::DefaultIfEmpty => {
                    if items.is_empty() {
                        let fallback = match args {
                            [] => Item::Value(Value::Null),
                            [default] => {
                                let value = try_value!(self.eval_flow(default)?);
                                to_item(value, "default element")?
                            }
                            more => {
                                return Err(EvalError::Arity {
                                    method: op.name(),
                                    expected: 1,
                                    actual: more.len(),
                                });
                            }
                        };
                        items = vec![fallback];
                    }
                }
                // navigation marker: carried for the provider, inert here
                QueryOp::Include => {}

                QueryOp::First
                | QueryOp::FirstOrDefault
                | QueryOp::Single
                | QueryOp::SingleOrDefault
                | QueryOp::Last
                | QueryOp::LastOrDefault => {
                    let result = self.single_result(*op, args, items)?;
                    return Ok(Flow::Value(result));
                }
                QueryOp::ElementAt | QueryOp::ElementAtOrDefault => {
                    // negative positions are out of range, never clamped
                    let index = self.int_arg(args, *op)?;
                    let len = items.len();
                    let found = usize::try_from(index)
                        .ok()
                        .and_then(|i| items.into_iter().nth(i));
                    let result = match found {
                        Some(item) => item.into_evaluated(),
                        None if op.tolerates_empty() => Evaluated::Value(Value::Null),
                        None => return Err(EvalError::IndexRange { index, len }),
                    };
                    return Ok(Flow::Value(result));
                }
                QueryOp::Count => {
                    let filtered = self.optionally_filtered(args, *op, items)?;
                    let count = i64::try_from(filtered.len()).unwrap_or(i64::MAX);
                    return Ok(Flow::Value(Evaluated::Value(Value::Int(count))));
                }
                QueryOp::Any => {
                    let result = match opt_lambda(args, *op)? {
                        None => !items.is_empty(),
                        Some(predicate) => {
                            let mut found = false;
                            for item in &items {
                                if self.apply_predicate(predicate, item)? {
                                    found = true;
                                    break;
                                }
                            }
                            found
                        }
                    };
                    return Ok(Flow::Value(Evaluated::Value(Value::Bool(result))));
                }
                QueryOp::All => {
                    let predicate = require_lambda(args, *op)?;
                    let mut holds = true;
                    for item in &items {
                        if !self.apply_predicate(predicate, item)? {
                            holds = false;
                            break;
                        }
                    }
                    return Ok(Flow::Value(Evaluated::Value(Value::Bool(holds))));
                }
                QueryOp::Contains => {
                    let [needle] = args else {
                        return Err(EvalError::Arity {
                            method: op.name(),
                            expected: 1,
                            actual: args.len(),
                        });
                    };
                    let needle = try_value!(self.eval_flow(needle)?);
                    let needle = to_item(needle, "contains argument")?;
                    let found = items.iter().any(|item| item_eq(item, &needle));
                    return Ok(Flow::Value(Evaluated::Value(Value::Bool(found))));
                }
                QueryOp::Sum | QueryOp::Min | QueryOp::Max | QueryOp::Average => {
                    let values = self.scalar_items(args, *op, items)?;
                    return Ok(Flow::Value(Evaluated::Value(aggregate(*op, &values)?)));
                }
            }
        }

        if !pending.is_empty() {
            items = self.apply_sort(items, &pending)?;
        }

        Ok(Flow::Value(Evaluated::Seq(items)))
    }

    /// `first`/`single`/`last` and their `_or_default` forms.
    fn single_result(
        &mut self,
        op: QueryOp,
        args: &[Expr],
        items: Vec<Item>,
    ) -> Result<Evaluated, EvalError> {
        let bare = args.is_empty();
        let mut items = self.optionally_filtered(args, op, items)?;

        let empty_error = if bare {
            EvalError::NoElements
        } else {
            EvalError::NoMatching
        };
        let many_error = if bare {
            EvalError::MoreThanOne
        } else {
            EvalError::MoreThanOneMatching
        };

        match op {
            QueryOp::First | QueryOp::FirstOrDefault => {
                if items.is_empty() {
                    return if op.tolerates_empty() {
                        Ok(Evaluated::Value(Value::Null))
                    } else {
                        Err(empty_error)
                    };
                }
                Ok(items.swap_remove(0).into_evaluated())
            }
            QueryOp::Last | QueryOp::LastOrDefault => match items.pop() {
                Some(item) => Ok(item.into_evaluated()),
                None if op.tolerates_empty() => Ok(Evaluated::Value(Value::Null)),
                None => Err(empty_error),
            },
            QueryOp::Single | QueryOp::SingleOrDefault => match items.len() {
                0 if op.tolerates_empty() => Ok(Evaluated::Value(Value::Null)),
                0 => Err(empty_error),
                1 => Ok(items.swap_remove(0).into_evaluated()),
                _ => Err(many_error),
            },
            _ => Err(EvalError::Shape {
                context: "single result",
                expected: "a single-result operator",
                actual: op.name().to_string(),
            }),
        }
    }

    fn optionally_filtered(
        &mut self,
        args: &[Expr],
        op: QueryOp,
        items: Vec<Item>,
    ) -> Result<Vec<Item>, EvalError> {
        let Some(predicate) = opt_lambda(args, op)? else {
            return Ok(items);
        };
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if self.apply_predicate(predicate, &item)? {
                kept.push(item);
            }
        }
        Ok(kept)
    }

    /// Project items through an optional selector and require scalar values.
    fn scalar_items(
        &mut self,
        args: &[Expr],
        op: QueryOp,
        items: Vec<Item>,
    ) -> Result<Vec<Value>, EvalError> {
        let selector = opt_lambda(args, op)?;
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let value = match selector {
                Some(selector) => self.apply_lambda(selector, item.into_evaluated())?,
                None => item.into_evaluated(),
            };
            match value {
                Evaluated::Value(v) => values.push(v),
                other => {
                    return Err(EvalError::Shape {
                        context: "aggregate input",
                        expected: "scalar values",
                        actual: other.describe(),
                    });
                }
            }
        }
        Ok(values)
    }

    fn int_arg(&mut self, args: &[Expr], op: QueryOp) -> Result<i64, EvalError> {
        let [arg] = args else {
            return Err(EvalError::Arity {
                method: op.name(),
                expected: 1,
                actual: args.len(),
            });
        };
        let value = self.eval(arg)?;
        value
            .as_value()
            .and_then(Value::to_i64)
            .ok_or(EvalError::Shape {
                context: "count argument",
                expected: "an integer",
                actual: value.describe(),
            })
    }

    fn apply_sort(
        &mut self,
        items: Vec<Item>,
        keys: &[SortKey<'_>],
    ) -> Result<Vec<Item>, EvalError> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let mut item_keys = Vec::with_capacity(keys.len());
            for key in keys {
                let value = self.apply_lambda(key.selector, item.clone().into_evaluated())?;
                match value {
                    Evaluated::Value(v) => item_keys.push(v),
                    other => {
                        return Err(EvalError::Shape {
                            context: "sort key",
                            expected: "a scalar value",
                            actual: other.describe(),
                        });
                    }
                }
            }
            keyed.push((item_keys, item));
        }

        // stable sort keeps the prior order as the final tiebreak
        keyed.sort_by(|(a, _), (b, _)| {
            for (index, key) in keys.iter().enumerate() {
                let mut ordering = Value::canonical_cmp(&a[index], &b[index]);
                if key.descending {
                    ordering = ordering.reverse();
                }
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(_, item)| item).collect())
    }

    ///
    /// LAMBDAS
    ///

    /// Apply a one-parameter lambda to a value.
    pub fn apply_lambda(&mut self, lambda: &Expr, arg: Evaluated) -> Result<Evaluated, EvalError> {
        self.apply_lambda_n(lambda, vec![arg])
    }

    pub(crate) fn apply_predicate(&mut self, lambda: &Expr, item: &Item) -> Result<bool, EvalError> {
        let value = self.apply_lambda(lambda, item.clone().into_evaluated())?;
        expect_bool(value, "predicate result")
    }

    fn apply_lambda_n(
        &mut self,
        lambda: &Expr,
        args: Vec<Evaluated>,
    ) -> Result<Evaluated, EvalError> {
        let lambda = strip_quotes(lambda);
        let Expr::Lambda { params, body } = lambda else {
            return Err(EvalError::Shape {
                context: "call argument",
                expected: "a lambda",
                actual: lambda.kind_label().to_string(),
            });
        };
        let params = params.as_deref().unwrap_or_default();
        if params.len() != args.len() {
            return Err(EvalError::Arity {
                method: "lambda",
                expected: params.len(),
                actual: args.len(),
            });
        }

        let mark = self.bindings.len();
        self.bindings
            .extend(params.iter().cloned().zip(args.into_iter()));
        let outcome = self.eval_flow(body);
        self.bindings.truncate(mark);

        match outcome? {
            Flow::Value(value) => Ok(value),
            // a return jump resolves at the lambda boundary
            Flow::Jump {
                kind: GotoKind::Return,
                value,
                ..
            } => Ok(value.unwrap_or(Evaluated::Value(Value::Null))),
            Flow::Jump { kind, .. } => Err(EvalError::EscapedJump { kind: kind.name() }),
        }
    }

    ///
    /// BLOCKS
    ///

    fn eval_block(
        &mut self,
        vars: Option<&[ParamRef]>,
        exprs: &[Expr],
    ) -> Result<Flow, EvalError> {
        let mark = self.bindings.len();
        for var in vars.unwrap_or_default() {
            self.bindings
                .push((Arc::clone(var), Evaluated::Value(Value::Null)));
        }

        let outcome = self.eval_block_body(exprs);
        self.bindings.truncate(mark);
        outcome
    }

    fn eval_block_body(&mut self, exprs: &[Expr]) -> Result<Flow, EvalError> {
        let mut last = Evaluated::Value(Value::Null);
        let mut index = 0;
        while index < exprs.len() {
            match self.eval_flow(&exprs[index])? {
                Flow::Value(value) => {
                    last = value;
                    index += 1;
                }
                Flow::Jump {
                    kind,
                    target,
                    value,
                } => {
                    // a jump to a label in this block resumes after the label
                    let landing = exprs.iter().position(
                        |e| matches!(e, Expr::Label { label, .. } if Arc::ptr_eq(label, &target)),
                    );
                    match landing {
                        Some(at) => {
                            last = value.unwrap_or(Evaluated::Value(Value::Null));
                            index = at + 1;
                        }
                        None => {
                            return Ok(Flow::Jump {
                                kind,
                                target,
                                value,
                            });
                        }
                    }
                }
            }
        }
        Ok(Flow::Value(last))
    }

    ///
    /// HANDLERS
    ///

    fn eval_handlers(
        &mut self,
        handlers: &[CatchClause],
        error: EvalError,
    ) -> Result<Flow, EvalError> {
        let message = error.to_string();
        for handler in handlers {
            let mark = self.bindings.len();
            if let Some(var) = &handler.var {
                self.bindings
                    .push((Arc::clone(var), Evaluated::Value(message.clone().into())));
            }
            let selected = match &handler.filter {
                None => Ok(true),
                Some(filter) => self
                    .eval(filter)
                    .and_then(|v| expect_bool(v, "catch filter")),
            };
            let outcome = match selected {
                Ok(true) => Some(self.eval_flow(&handler.body)),
                Ok(false) => None,
                Err(filter_error) => Some(Err(filter_error)),
            };
            self.bindings.truncate(mark);
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
        Err(error)
    }

    fn eval_new(&mut self, ctor: &CtorRef, args: Option<&[Expr]>) -> Result<Flow, EvalError> {
        let mut record = Record::new(ctor.ty.name.clone());
        if let Some(args) = args {
            if args.len() > ctor.ty.fields.len() {
                return Err(EvalError::Arity {
                    method: "new",
                    expected: ctor.ty.fields.len(),
                    actual: args.len(),
                });
            }
            for (field, arg) in ctor.ty.fields.iter().zip(args.iter()) {
                let value = try_value!(self.eval_flow(arg)?);
                record.push(field.clone(), to_arg(value, "constructor argument")?);
            }
        }
        Ok(Flow::Value(Evaluated::Row(record)))
    }
}

// ============================================================================
// Free helpers
// ============================================================================

pub(crate) fn strip_quotes(expr: &Expr) -> &Expr {
    let mut cursor = expr;
    while let Expr::Unary {
        op: UnaryOp::Quote,
        operand,
        ..
    } = cursor
    {
        cursor = operand;
    }
    cursor
}

fn opt_lambda(args: &[Expr], op: QueryOp) -> Result<Option<&Expr>, EvalError> {
    match args {
        [] => Ok(None),
        [lambda] => Ok(Some(strip_quotes(lambda))),
        more => Err(EvalError::Arity {
            method: op.name(),
            expected: 1,
            actual: more.len(),
        }),
    }
}

fn require_lambda(args: &[Expr], op: QueryOp) -> Result<&Expr, EvalError> {
    opt_lambda(args, op)?.ok_or(EvalError::Arity {
        method: op.name(),
        expected: 1,
        actual: 0,
    })
}

fn expect_bool(value: Evaluated, context: &'static str) -> Result<bool, EvalError> {
    match value {
        Evaluated::Value(Value::Bool(b)) => Ok(b),
        other => Err(EvalError::Shape {
            context,
            expected: "a boolean",
            actual: other.describe(),
        }),
    }
}

fn expect_value(value: Evaluated, context: &'static str) -> Result<Value, EvalError> {
    match value {
        Evaluated::Value(v) => Ok(v),
        other => Err(EvalError::Shape {
            context,
            expected: "a scalar value",
            actual: other.describe(),
        }),
    }
}

pub(crate) fn to_item(value: Evaluated, context: &'static str) -> Result<Item, EvalError> {
    match value {
        Evaluated::Value(v) => Ok(Item::Value(v)),
        Evaluated::Row(r) => Ok(Item::Row(r)),
        other => Err(EvalError::Shape {
            context,
            expected: "a row or scalar",
            actual: other.describe(),
        }),
    }
}

fn to_arg(value: Evaluated, context: &'static str) -> Result<ArgValue, EvalError> {
    match value {
        Evaluated::Value(v) => Ok(ArgValue::Scalar(v)),
        Evaluated::Row(r) => Ok(ArgValue::Record(r)),
        Evaluated::Seq(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(match item {
                    Item::Value(v) => ArgValue::Scalar(v),
                    Item::Row(r) => ArgValue::Record(r),
                });
            }
            Ok(ArgValue::List(out))
        }
        other @ Evaluated::Source(_) => Err(EvalError::Shape {
            context,
            expected: "a transferable value",
            actual: other.describe(),
        }),
    }
}

fn arg_to_evaluated(arg: &ArgValue) -> Result<Evaluated, EvalError> {
    match arg {
        ArgValue::Scalar(v) => Ok(Evaluated::Value(v.clone())),
        ArgValue::Record(r) => Ok(Evaluated::Row(r.clone())),
        ArgValue::List(args) => {
            if args.iter().all(|a| matches!(a, ArgValue::Scalar(_))) {
                let values = args
                    .iter()
                    .filter_map(ArgValue::as_scalar)
                    .cloned()
                    .collect();
                return Ok(Evaluated::Value(Value::List(values)));
            }
            let mut items = Vec::with_capacity(args.len());
            for arg in args {
                match arg_to_evaluated(arg)? {
                    Evaluated::Value(v) => items.push(Item::Value(v)),
                    Evaluated::Row(r) => items.push(Item::Row(r)),
                    other => {
                        return Err(EvalError::Shape {
                            context: "field list",
                            expected: "rows or scalars",
                            actual: other.describe(),
                        });
                    }
                }
            }
            Ok(Evaluated::Seq(items))
        }
        ArgValue::Expr(_) => Err(EvalError::ExprField),
        ArgValue::Resource(r) => Err(EvalError::UnboundResource {
            element: r.element.clone(),
        }),
    }
}

fn record_from_const(rv: &RecordValue) -> Result<Record, EvalError> {
    let mut record = Record::new(rv.type_name.clone());
    for (name, field) in &rv.fields {
        record.push(name.clone(), field_to_arg(field)?);
    }
    Ok(record)
}

fn field_to_arg(field: &FieldValue) -> Result<ArgValue, EvalError> {
    match field {
        FieldValue::Scalar(v) => Ok(ArgValue::Scalar(v.clone())),
        FieldValue::Record(rv) => Ok(ArgValue::Record(record_from_const(rv)?)),
        FieldValue::List(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for field in fields {
                out.push(field_to_arg(field)?);
            }
            Ok(ArgValue::List(out))
        }
        FieldValue::Expr(_) => Err(EvalError::ExprField),
        FieldValue::Resource(r) => Ok(ArgValue::Resource(r.clone())),
    }
}

fn seq_or_list(items: Vec<Item>) -> Evaluated {
    if items.iter().all(|i| matches!(i, Item::Value(_))) {
        let values = items
            .into_iter()
            .filter_map(|i| match i {
                Item::Value(v) => Some(v),
                Item::Row(_) => None,
            })
            .collect();
        Evaluated::Value(Value::List(values))
    } else {
        Evaluated::Seq(items)
    }
}

fn set_field(record: &mut Record, name: &str, value: ArgValue) {
    for (field, slot) in &mut record.fields {
        if field == name {
            *slot = value;
            return;
        }
    }
    record.push(name.to_string(), value);
}

fn compare_outcome(op: BinaryOp, left: &Evaluated, right: &Evaluated) -> bool {
    match (left, right) {
        (Evaluated::Value(a), Evaluated::Value(b)) => {
            let ordering = Value::compare(a, b);
            match op {
                BinaryOp::Eq => ordering == Some(Ordering::Equal),
                // mismatched and unordered operands are unequal
                BinaryOp::Ne => ordering != Some(Ordering::Equal),
                BinaryOp::Lt => ordering.is_some_and(Ordering::is_lt),
                BinaryOp::Lte => ordering.is_some_and(Ordering::is_le),
                BinaryOp::Gt => ordering.is_some_and(Ordering::is_gt),
                BinaryOp::Gte => ordering.is_some_and(Ordering::is_ge),
                _ => false,
            }
        }
        (Evaluated::Row(a), Evaluated::Row(b)) => match op {
            BinaryOp::Eq => a == b,
            BinaryOp::Ne => a != b,
            _ => false,
        },
        _ => op == BinaryOp::Ne,
    }
}

fn known_method(
    method: KnownMethod,
    receiver: Evaluated,
    args: &[Evaluated],
) -> Result<Evaluated, EvalError> {
    let receiver = expect_value(receiver, "method receiver")?;

    let text_predicate = |op: fn(&str, &str) -> bool| -> Result<Evaluated, EvalError> {
        let Evaluated::Value(needle) = &args[0] else {
            return Err(EvalError::Shape {
                context: "text argument",
                expected: "a scalar value",
                actual: args[0].describe(),
            });
        };
        let outcome = receiver
            .text_op(needle, TextMode::Cs, op)
            .ok_or(EvalError::Shape {
                context: "text method",
                expected: "text operands",
                actual: receiver.type_label().to_string(),
            })?;
        Ok(Evaluated::Value(Value::Bool(outcome)))
    };

    match method {
        KnownMethod::StartsWith => text_predicate(|hay, needle| hay.starts_with(needle)),
        KnownMethod::EndsWith => text_predicate(|hay, needle| hay.ends_with(needle)),
        KnownMethod::ContainsText => text_predicate(|hay, needle| hay.contains(needle)),
        KnownMethod::ToLower | KnownMethod::ToUpper | KnownMethod::Trim => {
            let Value::Text(text) = &receiver else {
                return Err(EvalError::Shape {
                    context: "text method",
                    expected: "text",
                    actual: receiver.type_label().to_string(),
                });
            };
            let out = match method {
                KnownMethod::ToLower => text.to_lowercase(),
                KnownMethod::ToUpper => text.to_uppercase(),
                _ => text.trim().to_string(),
            };
            Ok(Evaluated::Value(Value::Text(out)))
        }
        KnownMethod::Len => {
            let Value::Text(text) = &receiver else {
                return Err(EvalError::Shape {
                    context: "len",
                    expected: "text",
                    actual: receiver.type_label().to_string(),
                });
            };
            let count = i64::try_from(text.chars().count()).unwrap_or(i64::MAX);
            Ok(Evaluated::Value(Value::Int(count)))
        }
        KnownMethod::Abs => Ok(Evaluated::Value(arith::abs(&receiver)?)),
    }
}

fn aggregate(op: QueryOp, values: &[Value]) -> Result<Value, EvalError> {
    match op {
        QueryOp::Sum => {
            let mut total = Value::Int(0);
            for value in values {
                total = arith::binary(BinaryOp::Add, &total, value)?;
            }
            Ok(total)
        }
        QueryOp::Min | QueryOp::Max => {
            let Some(first) = values.first() else {
                return Err(EvalError::NoElements);
            };
            let mut best = first.clone();
            for value in &values[1..] {
                let ordering = Value::compare(value, &best).ok_or(EvalError::Shape {
                    context: "aggregate input",
                    expected: "comparable values",
                    actual: value.type_label().to_string(),
                })?;
                let better = match op {
                    QueryOp::Min => ordering.is_lt(),
                    _ => ordering.is_gt(),
                };
                if better {
                    best = value.clone();
                }
            }
            Ok(best)
        }
        QueryOp::Average => {
            if values.is_empty() {
                return Err(EvalError::NoElements);
            }
            let mut total = 0.0f64;
            for value in values {
                total += value.to_f64().ok_or(EvalError::Shape {
                    context: "average input",
                    expected: "numeric values",
                    actual: value.type_label().to_string(),
                })?;
            }
            #[expect(clippy::cast_precision_loss)]
            let count = values.len() as f64;
            Ok(Value::Float(total / count))
        }
        _ => Err(EvalError::Shape {
            context: "aggregate",
            expected: "an aggregate operator",
            actual: op.name().to_string(),
        }),
    }
}

/// Runtime type test against a resolved model.
fn type_is(value: &Evaluated, ty: &TypeModel) -> bool {
    match value {
        Evaluated::Row(record) => record.type_name.path == ty.name.path,
        Evaluated::Value(v) => scalar_matches(v, &ty.name.path),
        _ => false,
    }
}

fn scalar_matches(value: &Value, path: &str) -> bool {
    match path {
        "bool" => matches!(value, Value::Bool(_)),
        "i8" | "i16" | "i32" | "i64" | "u8" | "u16" | "u32" | "u64" | "f32" | "f64" | "bigint" => {
            value.is_numeric()
        }
        "char" => matches!(value, Value::Char(_)),
        "str" | "String" => matches!(value, Value::Text(_)),
        "bytes" => matches!(value, Value::Bytes(_)),
        "Date" => matches!(value, Value::Date(_)),
        "Timestamp" => matches!(value, Value::Timestamp(_)),
        "Ulid" => matches!(value, Value::Ulid(_)),
        _ => false,
    }
}

fn default_value(ty: &TypeModel) -> Value {
    match ty.name.path.as_str() {
        "bool" => Value::Bool(false),
        "i8" | "i16" | "i32" | "i64" => Value::Int(0),
        "u8" | "u16" | "u32" | "u64" => Value::Uint(0),
        "f32" | "f64" => Value::Float(0.0),
        "str" | "String" => Value::Text(String::new()),
        "char" => Value::Char('\0'),
        "bytes" => Value::Bytes(Vec::new()),
        "bigint" => Value::BigInt(num_bigint::BigInt::from(0)),
        _ => Value::Null,
    }
}

fn convert_evaluated(value: Evaluated, target: &TypeModel) -> Result<Evaluated, EvalError> {
    let Evaluated::Value(scalar) = value else {
        // reference conversions carry no runtime effect
        return Ok(value);
    };
    Ok(Evaluated::Value(convert_scalar(scalar, target)?))
}

#[expect(clippy::cast_possible_truncation)]
fn convert_scalar(value: Value, target: &TypeModel) -> Result<Value, EvalError> {
    let fail = |value: &Value| EvalError::ConvertFailed {
        from: value.type_label(),
        to: target.name.to_string(),
    };

    let path = target.name.path.as_str();
    match path {
        "i8" | "i16" | "i32" | "i64" => {
            let wide = match &value {
                Value::Float(f) if f.is_finite() => Some(f.trunc() as i64),
                other => other.to_i64(),
            }
            .ok_or_else(|| fail(&value))?;
            let fits = match path {
                "i8" => i64::from(wide as i8) == wide,
                "i16" => i64::from(wide as i16) == wide,
                "i32" => i64::from(wide as i32) == wide,
                _ => true,
            };
            if fits {
                Ok(Value::Int(wide))
            } else {
                Err(fail(&value))
            }
        }
        "u8" | "u16" | "u32" | "u64" => {
            let wide = match &value {
                Value::Float(f) if f.is_finite() && *f >= 0.0 => Some(f.trunc() as u64),
                other => other.to_u64(),
            }
            .ok_or_else(|| fail(&value))?;
            let fits = match path {
                "u8" => u64::from(wide as u8) == wide,
                "u16" => u64::from(wide as u16) == wide,
                "u32" => u64::from(wide as u32) == wide,
                _ => true,
            };
            if fits {
                Ok(Value::Uint(wide))
            } else {
                Err(fail(&value))
            }
        }
        "f32" | "f64" => {
            let float = value.to_f64().ok_or_else(|| fail(&value))?;
            Ok(Value::Float(float))
        }
        "bigint" => match &value {
            Value::BigInt(_) => Ok(value),
            Value::Int(i) => Ok(Value::BigInt((*i).into())),
            Value::Uint(u) => Ok(Value::BigInt((*u).into())),
            _ => Err(fail(&value)),
        },
        // remaining targets keep the value; the declared type is metadata
        _ => Ok(value),
    }
}

// ============================================================================
// Tests
// ============================================================================
