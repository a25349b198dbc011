use crate::{
    expr::ast::Expr,
    model::TypeResolver,
    node::{self as wire, ArgValue, TypeName},
    ops::{QueryOp, UnaryOp},
    query::QueryError,
    source::SourceBindings,
    translate::{TranslateError, from_wire_bound},
    value::Value,
};
use serde::{Deserialize, Serialize};

///
/// Query descriptors
///
/// The untyped, serializable snapshot of a query: element type, filter
/// lambdas, sort keys, and paging bounds, all in wire form. This is the
/// transfer shape of [`Query`](crate::query::Query). A descriptor also
/// parses out of a wire call chain and lowers into an executable native
/// chain, so both transport styles meet the same pipeline.
///

///
/// SortSpec
///
/// One sort key in wire form. The first entry of a sort list is the
/// primary key; later entries refine ties in order.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub selector: wire::Expr,
    pub descending: bool,
}

///
/// QueryDescriptor
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub element: TypeName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<wire::Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,
}

impl QueryDescriptor {
    #[must_use]
    pub const fn new(element: TypeName) -> Self {
        Self {
            element,
            filters: Vec::new(),
            sorts: Vec::new(),
            skip: None,
            take: None,
        }
    }

    /// Whether the descriptor constrains its source at all.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.filters.is_empty() && self.sorts.is_empty() && self.skip.is_none() && self.take.is_none()
    }

    /// Parse a wire call chain over a resource into descriptor form.
    ///
    /// Only the operators the descriptor models are admitted: `Where`,
    /// the four ordering operators, `Skip`, and `Take`. Tie-break sorts
    /// before a primary sort are rejected rather than promoted.
    pub fn from_expr(expr: &wire::Expr) -> Result<Self, QueryError> {
        let Some((origin, chain)) = expr.query_spine() else {
            return Err(QueryError::NotAQueryChain {
                found: expr.kind_label(),
            });
        };
        let wire::Expr::Constant {
            value: ArgValue::Resource(resource),
            ..
        } = origin
        else {
            return Err(QueryError::NotAQueryChain {
                found: origin.kind_label(),
            });
        };

        let mut descriptor = Self::new(resource.element.clone());
        for (op, args) in chain {
            match op {
                QueryOp::Where => descriptor.filters.push(single_lambda(op, args)?),
                QueryOp::OrderBy | QueryOp::OrderByDesc => {
                    descriptor.sorts = vec![SortSpec {
                        selector: single_lambda(op, args)?,
                        descending: op == QueryOp::OrderByDesc,
                    }];
                }
                QueryOp::ThenBy | QueryOp::ThenByDesc => {
                    if descriptor.sorts.is_empty() {
                        return Err(QueryError::OrderRequired { op: op.name() });
                    }
                    descriptor.sorts.push(SortSpec {
                        selector: single_lambda(op, args)?,
                        descending: op == QueryOp::ThenByDesc,
                    });
                }
                QueryOp::Skip => descriptor.skip = Some(single_bound(op, args)?),
                QueryOp::Take => descriptor.take = Some(single_bound(op, args)?),
                other => return Err(QueryError::UnsupportedOp { op: other.name() }),
            }
        }
        Ok(descriptor)
    }

    /// Lower to an executable native chain over the bound source.
    ///
    /// Each stored lambda rebuilds in its own translation pass, so wire
    /// binding ids never collide across lambdas. An element type missing
    /// from `bindings` keeps its resource placeholder and fails at
    /// evaluation, not here.
    pub fn to_expr(
        &self,
        resolver: &dyn TypeResolver,
        bindings: &SourceBindings,
    ) -> Result<Expr, TranslateError> {
        let mut chain = match bindings.lookup(&self.element) {
            Some(handle) => Expr::source(handle.clone()),
            None => Expr::resource(self.element.clone()),
        };

        for filter in &self.filters {
            let predicate = from_wire_bound(resolver, bindings, filter)?;
            chain = Expr::call_query(QueryOp::Where, chain, Some(vec![predicate]));
        }
        for (position, sort) in self.sorts.iter().enumerate() {
            let op = match (position == 0, sort.descending) {
                (true, false) => QueryOp::OrderBy,
                (true, true) => QueryOp::OrderByDesc,
                (false, false) => QueryOp::ThenBy,
                (false, true) => QueryOp::ThenByDesc,
            };
            let selector = from_wire_bound(resolver, bindings, &sort.selector)?;
            chain = Expr::call_query(op, chain, Some(vec![selector]));
        }
        if let Some(skip) = self.skip {
            chain = Expr::call_query(QueryOp::Skip, chain, Some(vec![Expr::value(skip)]));
        }
        if let Some(take) = self.take {
            chain = Expr::call_query(QueryOp::Take, chain, Some(vec![Expr::value(take)]));
        }
        Ok(chain)
    }
}

/// The single lambda argument of an operator, unwrapped from any quoting.
fn single_lambda(op: QueryOp, args: Option<&[wire::Expr]>) -> Result<wire::Expr, QueryError> {
    let lambda = strip_quotes(single_arg(op, args)?);
    if matches!(lambda, wire::Expr::Lambda { .. }) {
        Ok(lambda.clone())
    } else {
        Err(QueryError::NotALambda {
            kind: lambda.kind_label(),
        })
    }
}

/// The single paging bound of an operator as a non-negative count.
fn single_bound(op: QueryOp, args: Option<&[wire::Expr]>) -> Result<u64, QueryError> {
    let wire::Expr::Constant {
        value: ArgValue::Scalar(value),
        ..
    } = single_arg(op, args)?
    else {
        return Err(QueryError::Bound { op: op.name() });
    };
    match value {
        Value::Uint(u) => Ok(*u),
        Value::Int(i) => u64::try_from(*i).map_err(|_| QueryError::Bound { op: op.name() }),
        _ => Err(QueryError::Bound { op: op.name() }),
    }
}

fn single_arg(op: QueryOp, args: Option<&[wire::Expr]>) -> Result<&wire::Expr, QueryError> {
    match args {
        Some([arg]) => Ok(arg),
        other => Err(QueryError::Arity {
            op: op.name(),
            expected: 1,
            actual: other.map_or(0, <[wire::Expr]>::len),
        }),
    }
}

fn strip_quotes(expr: &wire::Expr) -> &wire::Expr {
    match expr {
        wire::Expr::Unary {
            op: UnaryOp::Quote,
            operand,
            ..
        } => strip_quotes(operand),
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================
