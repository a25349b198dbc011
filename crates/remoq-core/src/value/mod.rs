pub mod arith;
pub mod compare;
pub mod scalar;


pub use arith::ArithError;
pub use compare::CoercionFamily;
pub use scalar::{Date, ScalarError, Timestamp, Ulid};

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, hash::{Hash, Hasher}};

///
/// Value
///
/// The scalar value model shared by both expression trees. Every variant is
/// plain data the wire layer understands natively; anything outside this set
/// is carried as a property-bag record instead (see `node::Record`).
///

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    BigInt(BigInt),
    Text(String),
    Char(char),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    Date(Date),
    Timestamp(Timestamp),
    Ulid(Ulid),
    Null,
    List(Vec<Value>),
}

///
/// TextMode
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TextMode {
    Cs, // case-sensitive
    Ci, // case-insensitive
}

impl Value {
    ///
    /// CLASSIFICATION
    ///

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int(_) | Self::Uint(_) | Self::Float(_) | Self::BigInt(_)
        )
    }

    #[must_use]
    pub const fn is_integral(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Uint(_) | Self::BigInt(_))
    }

    #[must_use]
    pub const fn is_temporal(&self) -> bool {
        matches!(self, Self::Date(_) | Self::Timestamp(_))
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Everything except `List` is scalar.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::List(_))
    }

    /// Short variant label used in error text and display output.
    #[must_use]
    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::BigInt(_) => "bigint",
            Self::Text(_) => "text",
            Self::Char(_) => "char",
            Self::Bytes(_) => "bytes",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
            Self::Ulid(_) => "ulid",
            Self::Null => "null",
            Self::List(_) => "list",
        }
    }

    ///
    /// CONVERSION
    ///

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        if let Self::Bool(b) = self { Some(*b) } else { None }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        if let Self::Int(i) = self { Some(*i) } else { None }
    }

    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        if let Self::Uint(u) = self { Some(*u) } else { None }
    }

    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        if let Self::Float(x) = self { Some(*x) } else { None }
    }

    #[must_use]
    pub const fn as_text(&self) -> Option<&str> {
        if let Self::Text(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_list(&self) -> Option<&[Self]> {
        if let Self::List(xs) = self {
            Some(xs.as_slice())
        } else {
            None
        }
    }

    /// Widen any integral variant to `i64` when it fits.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Uint(u) => i64::try_from(*u).ok(),
            Self::BigInt(b) => i64::try_from(b).ok(),
            _ => None,
        }
    }

    /// Widen any integral variant to `u64` when it fits.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            Self::Int(i) => u64::try_from(*i).ok(),
            Self::Uint(u) => Some(*u),
            Self::BigInt(b) => u64::try_from(b).ok(),
            _ => None,
        }
    }

    /// Approximate any numeric variant as `f64`. Out-of-range big integers
    /// saturate to the signed infinity.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> Option<f64> {
        use num_traits::{Signed, ToPrimitive};

        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Uint(u) => Some(*u as f64),
            Self::Float(f) => Some(*f),
            Self::BigInt(b) => Some(b.to_f64().unwrap_or(if b.is_negative() {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            })),
            _ => None,
        }
    }

    ///
    /// COMPARISON
    ///

    /// Total canonical comparator: rank by coercion family, then compare
    /// within the family. Used for ordering and distinct.
    #[must_use]
    pub fn canonical_cmp(left: &Self, right: &Self) -> Ordering {
        compare::canonical_cmp(left, right)
    }

    /// Strict comparator for operator evaluation.
    ///
    /// Returns `None` for mismatched families and for NaN operands; a `None`
    /// comparison never satisfies a predicate.
    #[must_use]
    pub fn compare(left: &Self, right: &Self) -> Option<Ordering> {
        compare::compare_values(left, right)
    }

    ///
    /// TEXT
    ///

    /// Text operator helper shared by the evaluator's string methods.
    #[must_use]
    pub fn text_op(
        &self,
        needle: &Self,
        mode: TextMode,
        op: impl Fn(&str, &str) -> bool,
    ) -> Option<bool> {
        let hay = self.as_text()?;
        let needle = needle.as_text()?;
        match mode {
            TextMode::Cs => Some(op(hay, needle)),
            TextMode::Ci => Some(op(&hay.to_lowercase(), &needle.to_lowercase())),
        }
    }
}

// Structural equality. Floats compare by bit pattern so the impl stays
// reflexive and consistent with `Hash`; operator-level IEEE equality goes
// through `Value::compare` instead.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Ulid(a), Self::Ulid(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Uint(u) => u.hash(state),
            Self::Float(x) => x.to_bits().hash(state),
            Self::BigInt(b) => b.hash(state),
            Self::Text(s) => s.hash(state),
            Self::Char(c) => c.hash(state),
            Self::Bytes(b) => b.hash(state),
            Self::Date(d) => d.hash(state),
            Self::Timestamp(t) => t.hash(state),
            Self::Ulid(u) => u.hash(state),
            Self::Null => {}
            Self::List(xs) => xs.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Char(c) => write!(f, "{c:?}"),
            Self::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::Ulid(u) => write!(f, "{u}"),
            Self::Null => write!(f, "null"),
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
        }
    }
}

///
/// From conversions
///

macro_rules! impl_from_for {
    ( $( $type:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$type> for Value {
                fn from(v: $type) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for! {
    bool      => Bool,
    i8        => Int,
    i16       => Int,
    i32       => Int,
    i64       => Int,
    u8        => Uint,
    u16       => Uint,
    u32       => Uint,
    u64       => Uint,
    f32       => Float,
    f64       => Float,
    char      => Char,
    String    => Text,
    &str      => Text,
    BigInt    => BigInt,
    Vec<u8>   => Bytes,
    Date      => Date,
    Timestamp => Timestamp,
    Ulid      => Ulid,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(xs: Vec<Value>) -> Self {
        Self::List(xs)
    }
}
