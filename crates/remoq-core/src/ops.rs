use serde::{Deserialize, Serialize};

///
/// Operator Catalog
///
/// Closed sum types for every operator the expression trees can carry.
/// The native and serializable trees share these enums, so translating an
/// operator between representations is the identity function and the wire
/// tags stay stable independent of variant ordering in source.
///

///
/// BinaryOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0x01,
    Sub = 0x02,
    Mul = 0x03,
    Div = 0x04,
    Rem = 0x05,
    Pow = 0x06,
    And = 0x07,
    Or = 0x08,
    Eq = 0x09,
    Ne = 0x0a,
    Lt = 0x0b,
    Lte = 0x0c,
    Gt = 0x0d,
    Gte = 0x0e,
    BitAnd = 0x0f,
    BitOr = 0x10,
    BitXor = 0x11,
    Shl = 0x12,
    Shr = 0x13,
    Coalesce = 0x14,
    ArrayIndex = 0x15,
}

impl BinaryOp {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "**",
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Coalesce => "??",
            Self::ArrayIndex => "[]",
        }
    }

    /// True for operators whose result is a boolean comparison of operands.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte
        )
    }

    /// True for the short-circuiting boolean connectives.
    #[must_use]
    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem | Self::Pow
        )
    }

    #[must_use]
    pub const fn is_bitwise(self) -> bool {
        matches!(
            self,
            Self::BitAnd | Self::BitOr | Self::BitXor | Self::Shl | Self::Shr
        )
    }
}

///
/// UnaryOp
///
/// `Convert` and `TypeAs` carry their target type on the node, not here.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UnaryOp {
    Neg = 0x01,
    Not = 0x02,
    BitNot = 0x03,
    Plus = 0x04,
    ArrayLength = 0x05,
    Convert = 0x06,
    TypeAs = 0x07,
    Quote = 0x08,
}

impl UnaryOp {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "!",
            Self::BitNot => "~",
            Self::Plus => "+",
            Self::ArrayLength => "len",
            Self::Convert => "convert",
            Self::TypeAs => "as",
            Self::Quote => "quote",
        }
    }

    /// True for the conversion forms that require a target type on the node.
    #[must_use]
    pub const fn needs_type(self) -> bool {
        matches!(self, Self::Convert | Self::TypeAs)
    }
}

///
/// QueryOp
///
/// The queryable operator catalog: chaining operators compose a new
/// sequence, terminal operators collapse the chain into a result.
/// `Include` is a navigation marker that carries through translation and
/// partial evaluation untouched.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QueryOp {
    Where = 0x01,
    Select = 0x02,
    OrderBy = 0x03,
    OrderByDesc = 0x04,
    ThenBy = 0x05,
    ThenByDesc = 0x06,
    Skip = 0x07,
    Take = 0x08,
    Distinct = 0x09,
    Reverse = 0x0a,
    DefaultIfEmpty = 0x0b,
    Include = 0x0c,
    First = 0x20,
    FirstOrDefault = 0x21,
    Single = 0x22,
    SingleOrDefault = 0x23,
    Last = 0x24,
    LastOrDefault = 0x25,
    ElementAt = 0x26,
    ElementAtOrDefault = 0x27,
    Count = 0x28,
    Any = 0x29,
    All = 0x2a,
    Contains = 0x2b,
    Sum = 0x2c,
    Min = 0x2d,
    Max = 0x2e,
    Average = 0x2f,
}

impl QueryOp {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Where => "where",
            Self::Select => "select",
            Self::OrderBy => "order_by",
            Self::OrderByDesc => "order_by_desc",
            Self::ThenBy => "then_by",
            Self::ThenByDesc => "then_by_desc",
            Self::Skip => "skip",
            Self::Take => "take",
            Self::Distinct => "distinct",
            Self::Reverse => "reverse",
            Self::DefaultIfEmpty => "default_if_empty",
            Self::Include => "include",
            Self::First => "first",
            Self::FirstOrDefault => "first_or_default",
            Self::Single => "single",
            Self::SingleOrDefault => "single_or_default",
            Self::Last => "last",
            Self::LastOrDefault => "last_or_default",
            Self::ElementAt => "element_at",
            Self::ElementAtOrDefault => "element_at_or_default",
            Self::Count => "count",
            Self::Any => "any",
            Self::All => "all",
            Self::Contains => "contains",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Average => "average",
        }
    }

    /// Resolve a by-name method descriptor against the catalog.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        const ALL: &[QueryOp] = &[
            QueryOp::Where,
            QueryOp::Select,
            QueryOp::OrderBy,
            QueryOp::OrderByDesc,
            QueryOp::ThenBy,
            QueryOp::ThenByDesc,
            QueryOp::Skip,
            QueryOp::Take,
            QueryOp::Distinct,
            QueryOp::Reverse,
            QueryOp::DefaultIfEmpty,
            QueryOp::Include,
            QueryOp::First,
            QueryOp::FirstOrDefault,
            QueryOp::Single,
            QueryOp::SingleOrDefault,
            QueryOp::Last,
            QueryOp::LastOrDefault,
            QueryOp::ElementAt,
            QueryOp::ElementAtOrDefault,
            QueryOp::Count,
            QueryOp::Any,
            QueryOp::All,
            QueryOp::Contains,
            QueryOp::Sum,
            QueryOp::Min,
            QueryOp::Max,
            QueryOp::Average,
        ];
        ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Terminal operators collapse the chain into a non-sequence result.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        self.tag() >= 0x20
    }

    /// The single-result operators subject to sentinel normalization.
    #[must_use]
    pub const fn is_single_result(self) -> bool {
        matches!(
            self,
            Self::First
                | Self::FirstOrDefault
                | Self::Single
                | Self::SingleOrDefault
                | Self::Last
                | Self::LastOrDefault
        )
    }

    /// The `_or_default` forms yield an absent value instead of failing on
    /// an empty sequence.
    #[must_use]
    pub const fn tolerates_empty(self) -> bool {
        matches!(
            self,
            Self::FirstOrDefault
                | Self::SingleOrDefault
                | Self::LastOrDefault
                | Self::ElementAtOrDefault
        )
    }

    /// Sort operators that start a new ordering.
    #[must_use]
    pub const fn is_primary_sort(self) -> bool {
        matches!(self, Self::OrderBy | Self::OrderByDesc)
    }

    /// Sort operators that extend an existing ordering.
    #[must_use]
    pub const fn is_secondary_sort(self) -> bool {
        matches!(self, Self::ThenBy | Self::ThenByDesc)
    }

    #[must_use]
    pub const fn is_aggregate(self) -> bool {
        matches!(
            self,
            Self::Count | Self::Sum | Self::Min | Self::Max | Self::Average
        )
    }

    /// Marker calls must survive partial evaluation untouched.
    #[must_use]
    pub const fn is_marker(self) -> bool {
        matches!(self, Self::Include)
    }
}

///
/// KnownMethod
///
/// Scalar instance methods the evaluator executes directly. These cover the
/// member methods commonly referenced inside filter and projection lambdas.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum KnownMethod {
    StartsWith = 0x01,
    EndsWith = 0x02,
    ContainsText = 0x03,
    ToLower = 0x04,
    ToUpper = 0x05,
    Trim = 0x06,
    Len = 0x07,
    Abs = 0x08,
}

impl KnownMethod {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::ContainsText => "contains",
            Self::ToLower => "to_lower",
            Self::ToUpper => "to_upper",
            Self::Trim => "trim",
            Self::Len => "len",
            Self::Abs => "abs",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        const ALL: &[KnownMethod] = &[
            KnownMethod::StartsWith,
            KnownMethod::EndsWith,
            KnownMethod::ContainsText,
            KnownMethod::ToLower,
            KnownMethod::ToUpper,
            KnownMethod::Trim,
            KnownMethod::Len,
            KnownMethod::Abs,
        ];
        ALL.iter().copied().find(|m| m.name() == name)
    }

    /// Number of arguments beyond the receiver.
    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::StartsWith | Self::EndsWith | Self::ContainsText => 1,
            Self::ToLower | Self::ToUpper | Self::Trim | Self::Len | Self::Abs => 0,
        }
    }
}

///
/// GotoKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GotoKind {
    Goto = 0x01,
    Return = 0x02,
    Break = 0x03,
    Continue = 0x04,
}

impl GotoKind {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Goto => "goto",
            Self::Return => "return",
            Self::Break => "break",
            Self::Continue => "continue",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_tags_are_unique_and_stable() {
        let ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Rem,
            BinaryOp::Pow,
            BinaryOp::And,
            BinaryOp::Or,
            BinaryOp::Eq,
            BinaryOp::Ne,
            BinaryOp::Lt,
            BinaryOp::Lte,
            BinaryOp::Gt,
            BinaryOp::Gte,
            BinaryOp::BitAnd,
            BinaryOp::BitOr,
            BinaryOp::BitXor,
            BinaryOp::Shl,
            BinaryOp::Shr,
            BinaryOp::Coalesce,
            BinaryOp::ArrayIndex,
        ];
        let mut seen = std::collections::BTreeSet::new();
        for op in ops {
            assert!(seen.insert(op.tag()), "duplicate tag {:#x}", op.tag());
        }
        assert_eq!(BinaryOp::Add.tag(), 0x01);
        assert_eq!(BinaryOp::ArrayIndex.tag(), 0x15);
    }

    #[test]
    fn query_op_terminal_split_follows_tags() {
        assert!(!QueryOp::Where.is_terminal());
        assert!(!QueryOp::Include.is_terminal());
        assert!(QueryOp::First.is_terminal());
        assert!(QueryOp::Average.is_terminal());
    }

    #[test]
    fn query_op_round_trips_by_name() {
        for op in [
            QueryOp::Where,
            QueryOp::OrderByDesc,
            QueryOp::SingleOrDefault,
            QueryOp::Average,
        ] {
            assert_eq!(QueryOp::from_name(op.name()), Some(op));
        }
        assert_eq!(QueryOp::from_name("no_such_op"), None);
    }

    #[test]
    fn single_result_classification() {
        assert!(QueryOp::First.is_single_result());
        assert!(QueryOp::LastOrDefault.is_single_result());
        assert!(!QueryOp::Count.is_single_result());
        assert!(QueryOp::FirstOrDefault.tolerates_empty());
        assert!(!QueryOp::Single.tolerates_empty());
    }

    #[test]
    fn known_method_arity() {
        assert_eq!(KnownMethod::StartsWith.arity(), 1);
        assert_eq!(KnownMethod::Len.arity(), 0);
        assert_eq!(KnownMethod::from_name("contains"), Some(KnownMethod::ContainsText));
    }
}
