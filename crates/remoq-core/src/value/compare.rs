use crate::value::Value;
use num_bigint::BigInt;
use std::cmp::Ordering;

///
/// CoercionFamily
///
/// Comparison groups: values only compare within a family. All numeric
/// variants share one family so mixed integer/float comparisons coerce
/// instead of falling back to variant order.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum CoercionFamily {
    Null = 0,
    Bool = 1,
    Numeric = 2,
    Char = 3,
    Text = 4,
    Bytes = 5,
    Date = 6,
    Timestamp = 7,
    Ulid = 8,
    Collection = 9,
}

impl Value {
    #[must_use]
    pub const fn coercion_family(&self) -> CoercionFamily {
        match self {
            Self::Null => CoercionFamily::Null,
            Self::Bool(_) => CoercionFamily::Bool,
            Self::Int(_) | Self::Uint(_) | Self::Float(_) | Self::BigInt(_) => {
                CoercionFamily::Numeric
            }
            Self::Char(_) => CoercionFamily::Char,
            Self::Text(_) => CoercionFamily::Text,
            Self::Bytes(_) => CoercionFamily::Bytes,
            Self::Date(_) => CoercionFamily::Date,
            Self::Timestamp(_) => CoercionFamily::Timestamp,
            Self::Ulid(_) => CoercionFamily::Ulid,
            Self::List(_) => CoercionFamily::Collection,
        }
    }
}

///
/// NumericRepr
///

enum NumericRepr {
    Big(BigInt),
    F64(f64),
}

fn numeric_repr(value: &Value) -> Option<NumericRepr> {
    match value {
        Value::Int(i) => Some(NumericRepr::Big(BigInt::from(*i))),
        Value::Uint(u) => Some(NumericRepr::Big(BigInt::from(*u))),
        Value::BigInt(b) => Some(NumericRepr::Big(b.clone())),
        Value::Float(x) => Some(NumericRepr::F64(*x)),
        _ => None,
    }
}

/// Compare two numeric values, coercing across integral widths. When a
/// float is involved both sides drop to `f64`; integers beyond 2^53 lose
/// precision there, same as any float comparison would.
fn numeric_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    let (l, r) = (numeric_repr(left)?, numeric_repr(right)?);
    match (l, r) {
        (NumericRepr::Big(a), NumericRepr::Big(b)) => Some(a.cmp(&b)),
        (NumericRepr::F64(a), NumericRepr::F64(b)) => a.partial_cmp(&b),
        (NumericRepr::Big(a), NumericRepr::F64(b)) => big_to_f64(&a).partial_cmp(&b),
        (NumericRepr::F64(a), NumericRepr::Big(b)) => a.partial_cmp(&big_to_f64(&b)),
    }
}

fn big_to_f64(b: &BigInt) -> f64 {
    use num_bigint::Sign;
    use num_traits::ToPrimitive;

    b.to_f64().unwrap_or(match b.sign() {
        Sign::Minus => f64::NEG_INFINITY,
        _ => f64::INFINITY,
    })
}

/// Total canonical comparator.
///
/// Ordering rules:
/// 1. Coercion family rank
/// 2. Family-specific comparison for same-ranked values
///
/// NaN sorts above every finite float (total order via `f64::total_cmp`),
/// so sorting never panics and stays deterministic.
#[must_use]
pub fn canonical_cmp(left: &Value, right: &Value) -> Ordering {
    let rank = left.coercion_family().cmp(&right.coercion_family());
    if rank != Ordering::Equal {
        return rank;
    }

    canonical_cmp_same_rank(left, right)
}

fn canonical_cmp_same_rank(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
        (Value::Char(a), Value::Char(b)) => a.cmp(b),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
        (Value::Date(a), Value::Date(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Ulid(a), Value::Ulid(b)) => a.cmp(b),
        (Value::List(a), Value::List(b)) => canonical_cmp_list(a, b),
        (Value::Null, Value::Null) => Ordering::Equal,
        // remaining same-family pairs are numeric
        _ => numeric_cmp(left, right).unwrap_or(Ordering::Equal),
    }
}

fn canonical_cmp_list(left: &[Value], right: &[Value]) -> Ordering {
    for (l, r) in left.iter().zip(right.iter()) {
        let cmp = canonical_cmp(l, r);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    left.len().cmp(&right.len())
}

/// Strict comparator for operator evaluation.
///
/// Returns `None` for mismatched families, for non-orderable operands, and
/// for NaN floats. Operators treat `None` as "predicate not satisfied".
#[must_use]
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    if left.coercion_family() != right.coercion_family() {
        // temporal text literals coerce before giving up
        return coerce_text_compare(left, right);
    }

    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Char(a), Value::Char(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Ulid(a), Value::Ulid(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::List(a), Value::List(b)) => compare_lists(a, b),
        _ => numeric_cmp(left, right),
    }
}

fn compare_lists(left: &[Value], right: &[Value]) -> Option<Ordering> {
    for (l, r) in left.iter().zip(right.iter()) {
        match compare_values(l, r)? {
            Ordering::Equal => {}
            other => return Some(other),
        }
    }

    Some(left.len().cmp(&right.len()))
}

/// Text literals compare against temporal and ulid values by parsing the
/// text side, so wire peers may send `"2024-01-02"` against a date field.
fn coerce_text_compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Text(s), Value::Date(d)) => s.parse().ok().map(|p: super::Date| p.cmp(d)),
        (Value::Date(d), Value::Text(s)) => s.parse().ok().map(|p: super::Date| d.cmp(&p)),
        (Value::Text(s), Value::Timestamp(t)) => {
            s.parse().ok().map(|p: super::Timestamp| p.cmp(t))
        }
        (Value::Timestamp(t), Value::Text(s)) => {
            s.parse().ok().map(|p: super::Timestamp| t.cmp(&p))
        }
        (Value::Text(s), Value::Ulid(u)) => s.parse().ok().map(|p: super::Ulid| p.cmp(u)),
        (Value::Ulid(u), Value::Text(s)) => s.parse().ok().map(|p: super::Ulid| u.cmp(&p)),
        _ => None,
    }
}
