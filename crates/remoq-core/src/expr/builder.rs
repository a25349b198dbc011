use crate::{
    expr::ast::{Expr, ParamDef, ParamRef},
    ops::KnownMethod,
    value::Value,
};
use std::sync::Arc;

///
/// Var
///
/// Zero-cost wrapper around a lambda parameter used while building bodies.
/// Enables method-based tree construction without spelling out the node
/// enums. Carries only the shared parameter handle.
///

#[derive(Clone)]
pub struct Var(ParamRef);

impl Var {
    /// The bare parameter reference.
    #[must_use]
    pub fn expr(&self) -> Expr {
        Expr::param(&self.0)
    }

    /// Member access on the parameter.
    #[must_use]
    pub fn field(&self, name: impl Into<String>) -> Expr {
        Expr::member(self.expr(), name)
    }

    /// The underlying shared handle.
    #[must_use]
    pub fn param(&self) -> &ParamRef {
        &self.0
    }
}

/// Build a one-parameter lambda. The closure receives the bound variable
/// and returns the body.
#[must_use]
pub fn lambda(name: impl Into<String>, build: impl FnOnce(Var) -> Expr) -> Expr {
    let param = ParamDef::fresh(name);
    let body = build(Var(Arc::clone(&param)));
    Expr::lambda(vec![param], body)
}

/// Build a two-parameter lambda.
#[must_use]
pub fn lambda2(
    first: impl Into<String>,
    second: impl Into<String>,
    build: impl FnOnce(Var, Var) -> Expr,
) -> Expr {
    let a = ParamDef::fresh(first);
    let b = ParamDef::fresh(second);
    let body = build(Var(Arc::clone(&a)), Var(Arc::clone(&b)));
    Expr::lambda(vec![a, b], body)
}

/// Scalar literal.
#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::value(value)
}

// ----------------------------------------------------------------------
// Known-method sugar
// ----------------------------------------------------------------------

impl Expr {
    /// Case-sensitive prefix test on a text expression.
    #[must_use]
    pub fn starts_with(self, needle: Self) -> Self {
        Self::call_known(KnownMethod::StartsWith, self, vec![needle])
    }

    /// Case-sensitive suffix test on a text expression.
    #[must_use]
    pub fn ends_with(self, needle: Self) -> Self {
        Self::call_known(KnownMethod::EndsWith, self, vec![needle])
    }

    /// Case-sensitive substring test on a text expression.
    #[must_use]
    pub fn contains_text(self, needle: Self) -> Self {
        Self::call_known(KnownMethod::ContainsText, self, vec![needle])
    }

    /// Lowercased copy of a text expression.
    #[must_use]
    pub fn to_lower(self) -> Self {
        Self::call_known(KnownMethod::ToLower, self, Vec::new())
    }

    /// Uppercased copy of a text expression.
    #[must_use]
    pub fn to_upper(self) -> Self {
        Self::call_known(KnownMethod::ToUpper, self, Vec::new())
    }

    /// Whitespace-trimmed copy of a text expression.
    #[must_use]
    pub fn trim(self) -> Self {
        Self::call_known(KnownMethod::Trim, self, Vec::new())
    }

    /// Character count of a text expression.
    #[must_use]
    pub fn len(self) -> Self {
        Self::call_known(KnownMethod::Len, self, Vec::new())
    }

    /// Absolute value of a numeric expression.
    #[must_use]
    pub fn abs(self) -> Self {
        Self::call_known(KnownMethod::Abs, self, Vec::new())
    }
}

// ============================================================================
// Tests
// ============================================================================
