use crate::{
    exec::ExecError,
    expr::eval::{EvalError, Evaluated, Item},
    model::COLLECTION_PATH,
    node::{self as wire, ArgValue, Record, TypeName},
    ops::QueryOp,
    value::Value,
};
use serde::{Deserialize, Serialize};

///
/// Result conversion
///
/// The transfer form a pipeline run ships back: plain data, serializable,
/// with no evaluator types in it. `declared` carries the element type the
/// query was issued over when the chain preserves it, so a zero-length
/// sentinel still tells the consumer what it is empty *of*.
///

///
/// ResultItem
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResultItem {
    Value(Value),
    Row(Record),
}

impl ResultItem {
    #[must_use]
    pub fn from_item(item: Item) -> Self {
        match item {
            Item::Value(v) => Self::Value(v),
            Item::Row(r) => Self::Row(r),
        }
    }

    #[must_use]
    pub fn into_item(self) -> Item {
        match self {
            Self::Value(v) => Item::Value(v),
            Self::Row(r) => Item::Row(r),
        }
    }

    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Row(_) => "row",
        }
    }

    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        if let Self::Value(v) = self { Some(v) } else { None }
    }

    #[must_use]
    pub const fn as_row(&self) -> Option<&Record> {
        if let Self::Row(r) = self { Some(r) } else { None }
    }
}

///
/// ResultPayload
///
/// Sequence results and single-element results stay distinguishable on
/// the wire; a sentinel sequence must not look like a one-element result.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ResultPayload {
    Seq(Vec<ResultItem>),
    One(ResultItem),
}

///
/// QueryResult
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared: Option<TypeName>,
    pub payload: ResultPayload,
}

impl QueryResult {
    #[must_use]
    pub const fn seq(declared: Option<TypeName>, items: Vec<ResultItem>) -> Self {
        Self {
            declared,
            payload: ResultPayload::Seq(items),
        }
    }

    #[must_use]
    pub const fn one(declared: Option<TypeName>, item: ResultItem) -> Self {
        Self {
            declared,
            payload: ResultPayload::One(item),
        }
    }

    ///
    /// ACCESSORS
    ///

    #[must_use]
    pub const fn as_one(&self) -> Option<&ResultItem> {
        if let ResultPayload::One(item) = &self.payload {
            Some(item)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_seq(&self) -> Option<&[ResultItem]> {
        if let ResultPayload::Seq(items) = &self.payload {
            Some(items)
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match &self.payload {
            ResultPayload::Seq(items) => items.len(),
            ResultPayload::One(_) => 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn into_items(self) -> Vec<ResultItem> {
        match self.payload {
            ResultPayload::Seq(items) => items,
            ResultPayload::One(item) => vec![item],
        }
    }
}

///
/// Conversion
///

/// Convert an evaluation outcome into the transfer form. Sources must be
/// materialized by the execute stage before they arrive here.
pub fn to_result(declared: Option<TypeName>, value: Evaluated) -> Result<QueryResult, ExecError> {
    let payload = match value {
        Evaluated::Value(v) => ResultPayload::One(ResultItem::Value(v)),
        Evaluated::Row(r) => ResultPayload::One(ResultItem::Row(r)),
        Evaluated::Seq(items) => {
            ResultPayload::Seq(items.into_iter().map(ResultItem::from_item).collect())
        }
        Evaluated::Source(handle) => {
            return Err(EvalError::Shape {
                context: "result conversion",
                expected: "a materialized result",
                actual: format!("source over {}", handle.element()),
            }
            .into());
        }
    };

    Ok(QueryResult { declared, payload })
}

/// The element type a chain's results carry, read off the wire tree.
///
/// Projections and scalar terminals change the element shape, so nothing
/// is declared for them.
#[must_use]
pub fn declared_element(expr: &wire::Expr) -> Option<TypeName> {
    let (origin, chain) = expr.query_spine()?;

    let element = match origin {
        wire::Expr::Constant {
            value: ArgValue::Resource(resource),
            ..
        } => resource.element.clone(),
        wire::Expr::Constant { ty: Some(ty), .. } if ty.path == COLLECTION_PATH => {
            ty.args.first()?.clone()
        }
        _ => return None,
    };

    let reshaped = chain.iter().any(|(op, _)| {
        *op == QueryOp::Select
            || op.is_aggregate()
            || matches!(op, QueryOp::Any | QueryOp::All | QueryOp::Contains)
    });
    if reshaped { None } else { Some(element) }
}

// ============================================================================
// Tests
// ============================================================================
