pub mod descriptor;

pub use descriptor::{QueryDescriptor, SortSpec};

use crate::{
    expr::ast::Expr,
    model::Described,
    node::{self as wire, TypeName},
    translate::{TranslateError, to_wire},
};
use std::{fmt, marker::PhantomData, sync::Arc};
use thiserror::Error as ThisError;

///
/// Query value object
///
/// An immutable, copy-on-compose description of a filtered, sorted, paged
/// view over one element type. Every composition method returns a new
/// instance; the receiver never changes. Lambdas are held in wire form, so
/// the snapshot crosses process boundaries without dragging live expression
/// state along. [`QueryDescriptor`] is the untyped transfer shape.
///

///
/// QueryError
///

#[derive(Debug, ThisError)]
pub enum QueryError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("{op} requires an established ordering")]
    OrderRequired { op: &'static str },

    #[error("query operators take lambda arguments, got {kind}")]
    NotALambda { kind: &'static str },

    #[error("descriptor records element type {recorded}, expected {expected}")]
    ElementMismatch { recorded: String, expected: String },

    #[error("query has no runner configured")]
    NoRunner,

    #[error("query runner failed: {message}")]
    Runner { message: String },

    #[error("expected a query call chain over a resource, got {found}")]
    NotAQueryChain { found: &'static str },

    #[error("{op} has no descriptor form")]
    UnsupportedOp { op: &'static str },

    #[error("{op} takes {expected} argument(s), got {actual}")]
    Arity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{op} bound must be a non-negative integer constant")]
    Bound { op: &'static str },
}

///
/// QueryRunner
///
/// Executes the descriptor form of a query and produces typed results.
/// The sole integration point a [`Query`] host must supply; closures
/// implement it directly.
///

pub trait QueryRunner<T>: Send + Sync {
    fn run(&self, query: &QueryDescriptor) -> Result<Vec<T>, QueryError>;
}

impl<T, F> QueryRunner<T> for F
where
    F: Fn(&QueryDescriptor) -> Result<Vec<T>, QueryError> + Send + Sync,
{
    fn run(&self, query: &QueryDescriptor) -> Result<Vec<T>, QueryError> {
        self(query)
    }
}

///
/// Query
///

pub struct Query<T> {
    element: TypeName,
    filters: Vec<wire::Expr>,
    sorts: Vec<SortSpec>,
    skip: Option<u64>,
    take: Option<u64>,
    runner: Option<Arc<dyn QueryRunner<T>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Described> Query<T> {
    /// An empty query over `T`'s element type.
    #[must_use]
    pub fn new() -> Self {
        Self::over(T::type_name())
    }

    /// Rebuild a typed query from its untyped descriptor form.
    ///
    /// The recorded element type must match `T`; a mismatch is raised here,
    /// not deferred to execution.
    pub fn from_descriptor(descriptor: QueryDescriptor) -> Result<Self, QueryError> {
        let expected = T::type_name();
        if descriptor.element != expected {
            return Err(QueryError::ElementMismatch {
                recorded: descriptor.element.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(Self {
            element: descriptor.element,
            filters: descriptor.filters,
            sorts: descriptor.sorts,
            skip: descriptor.skip,
            take: descriptor.take,
            runner: None,
            _marker: PhantomData,
        })
    }
}

impl<T: Described> Default for Query<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Query<T> {
    /// An empty query over an explicit element type.
    #[must_use]
    pub fn over(element: TypeName) -> Self {
        Self {
            element,
            filters: Vec::new(),
            sorts: Vec::new(),
            skip: None,
            take: None,
            runner: None,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn QueryRunner<T>>) -> Self {
        self.runner = Some(runner);
        self
    }

    ///
    /// ACCESSORS
    ///

    #[must_use]
    pub const fn element(&self) -> &TypeName {
        &self.element
    }

    /// Filter lambdas in application order; results satisfy all of them.
    #[must_use]
    pub fn filters(&self) -> &[wire::Expr] {
        &self.filters
    }

    /// Sort keys; the first entry is the primary key.
    #[must_use]
    pub fn sorts(&self) -> &[SortSpec] {
        &self.sorts
    }

    #[must_use]
    pub const fn skip_value(&self) -> Option<u64> {
        self.skip
    }

    #[must_use]
    pub const fn take_value(&self) -> Option<u64> {
        self.take
    }

    ///
    /// COMPOSITION
    ///
    /// Each method leaves the receiver untouched and returns a new query
    /// carrying the prior state plus the one change.
    ///

    /// Append a filter predicate.
    pub fn filter(&self, predicate: Expr) -> Result<Self, QueryError> {
        let mut next = self.clone();
        next.filters.push(lower_lambda(predicate)?);
        Ok(next)
    }

    /// Start a new ascending sort, discarding any existing sort keys.
    pub fn order_by(&self, selector: Expr) -> Result<Self, QueryError> {
        self.primary(selector, false)
    }

    /// Start a new descending sort, discarding any existing sort keys.
    pub fn order_by_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        self.primary(selector, true)
    }

    /// Append an ascending tie-break key to the current sort.
    pub fn then_by(&self, selector: Expr) -> Result<Self, QueryError> {
        self.subordinate(selector, false, "then_by")
    }

    /// Append a descending tie-break key to the current sort.
    pub fn then_by_desc(&self, selector: Expr) -> Result<Self, QueryError> {
        self.subordinate(selector, true, "then_by_desc")
    }

    /// Set the skip bound; a later call overwrites an earlier one.
    #[must_use]
    pub fn skip(&self, count: u64) -> Self {
        let mut next = self.clone();
        next.skip = Some(count);
        next
    }

    /// Set the take bound; a later call overwrites an earlier one.
    #[must_use]
    pub fn take(&self, count: u64) -> Self {
        let mut next = self.clone();
        next.take = Some(count);
        next
    }

    fn primary(&self, selector: Expr, descending: bool) -> Result<Self, QueryError> {
        let mut next = self.clone();
        next.sorts = vec![SortSpec {
            selector: lower_lambda(selector)?,
            descending,
        }];
        Ok(next)
    }

    fn subordinate(
        &self,
        selector: Expr,
        descending: bool,
        op: &'static str,
    ) -> Result<Self, QueryError> {
        if self.sorts.is_empty() {
            return Err(QueryError::OrderRequired { op });
        }
        let mut next = self.clone();
        next.sorts.push(SortSpec {
            selector: lower_lambda(selector)?,
            descending,
        });
        Ok(next)
    }

    ///
    /// EXECUTION
    ///

    /// Snapshot the untyped transfer form.
    #[must_use]
    pub fn to_descriptor(&self) -> QueryDescriptor {
        QueryDescriptor {
            element: self.element.clone(),
            filters: self.filters.clone(),
            sorts: self.sorts.clone(),
            skip: self.skip,
            take: self.take,
        }
    }

    /// Hand the descriptor form to the configured runner.
    ///
    /// A query without a runner is a usage error, never an empty result.
    pub fn execute(&self) -> Result<Vec<T>, QueryError> {
        let Some(runner) = &self.runner else {
            return Err(QueryError::NoRunner);
        };
        runner.run(&self.to_descriptor())
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            element: self.element.clone(),
            filters: self.filters.clone(),
            sorts: self.sorts.clone(),
            skip: self.skip,
            take: self.take,
            runner: self.runner.clone(),
            _marker: PhantomData,
        }
    }
}

/// Runners are execution wiring and do not participate in equality.
impl<T> PartialEq for Query<T> {
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element
            && self.filters == other.filters
            && self.sorts == other.sorts
            && self.skip == other.skip
            && self.take == other.take
    }
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("element", &self.element)
            .field("filters", &self.filters.len())
            .field("sorts", &self.sorts.len())
            .field("skip", &self.skip)
            .field("take", &self.take)
            .field("runner", &self.runner.is_some())
            .finish()
    }
}

/// Translate a composition argument to its wire form, rejecting anything
/// that is not a lambda.
fn lower_lambda(expr: Expr) -> Result<wire::Expr, QueryError> {
    let kind = expr.kind_label();
    match to_wire(expr)? {
        lambda @ wire::Expr::Lambda { .. } => Ok(lambda),
        _ => Err(QueryError::NotALambda { kind }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::builder::{lambda, lit};

    #[derive(Clone, Debug, PartialEq)]
    struct Person {
        name: String,
        age: i64,
    }

    impl Described for Person {
        const PATH: &'static str = "people::Person";
    }

    fn adults() -> Expr {
        lambda("x", |x| x.field("age").gt(lit(30i64)))
    }

    fn by_age() -> Expr {
        lambda("x", |x| x.field("age"))
    }

    fn by_name() -> Expr {
        lambda("x", |x| x.field("name"))
    }

    #[test]
    fn filters_accumulate_without_mutating_the_receiver() {
        let q1 = Query::<Person>::new();
        let q2 = q1.filter(adults()).unwrap();
        let q3 = q2.filter(by_name()).unwrap();

        assert!(q1.filters().is_empty());
        assert_eq!(q2.filters().len(), 1);
        assert_eq!(q3.filters().len(), 2);
        assert_eq!(q3.filters()[0], to_wire(adults()).unwrap());
        assert_eq!(q3.filters()[1], to_wire(by_name()).unwrap());
    }

    #[test]
    fn order_by_replaces_the_sort_list() {
        let sorted = Query::<Person>::new()
            .order_by(by_age())
            .unwrap()
            .then_by(by_name())
            .unwrap();
        assert_eq!(sorted.sorts().len(), 2);

        let resorted = sorted.order_by_desc(by_name()).unwrap();
        assert_eq!(resorted.sorts().len(), 1);
        assert!(resorted.sorts()[0].descending);
        // the original chain keeps its two keys
        assert_eq!(sorted.sorts().len(), 2);
    }

    #[test]
    fn then_by_requires_an_existing_ordering() {
        let unsorted = Query::<Person>::new();
        assert!(matches!(
            unsorted.then_by(by_age()),
            Err(QueryError::OrderRequired { op: "then_by" })
        ));
        assert!(matches!(
            unsorted.then_by_desc(by_age()),
            Err(QueryError::OrderRequired { op: "then_by_desc" })
        ));
    }

    #[test]
    fn bounds_overwrite_on_rewrite() {
        let q = Query::<Person>::new().skip(10).take(5).skip(20).take(1);
        assert_eq!(q.skip_value(), Some(20));
        assert_eq!(q.take_value(), Some(1));
    }

    #[test]
    fn non_lambda_arguments_are_rejected() {
        let err = Query::<Person>::new().filter(lit(1i64)).unwrap_err();
        assert!(matches!(err, QueryError::NotALambda { kind: "constant" }));
    }

    #[test]
    fn executing_without_a_runner_is_a_usage_error() {
        let err = Query::<Person>::new().execute().unwrap_err();
        assert!(matches!(err, QueryError::NoRunner));
    }

    #[test]
    fn runners_receive_the_descriptor_form() {
        fn fabricate(descriptor: &QueryDescriptor) -> Result<Vec<Person>, QueryError> {
            Ok(vec![Person {
                name: descriptor.element.to_string(),
                age: i64::try_from(descriptor.filters.len()).unwrap(),
            }])
        }

        let rows = Query::<Person>::new()
            .filter(adults())
            .unwrap()
            .with_runner(Arc::new(fabricate))
            .execute()
            .unwrap();
        assert_eq!(rows[0].name, "people::Person");
        assert_eq!(rows[0].age, 1);
    }

    #[test]
    fn runner_failures_propagate() {
        fn offline(_: &QueryDescriptor) -> Result<Vec<Person>, QueryError> {
            Err(QueryError::Runner {
                message: "backend offline".into(),
            })
        }

        let err = Query::<Person>::new()
            .with_runner(Arc::new(offline))
            .execute()
            .unwrap_err();
        assert!(matches!(err, QueryError::Runner { .. }));
    }

    #[test]
    fn descriptors_round_trip_through_serde() {
        let q = Query::<Person>::new()
            .filter(adults())
            .unwrap()
            .order_by_desc(by_age())
            .unwrap()
            .skip(3)
            .take(2);

        let json = serde_json::to_string(&q.to_descriptor()).unwrap();
        let back: QueryDescriptor = serde_json::from_str(&json).unwrap();
        let rebuilt = Query::<Person>::from_descriptor(back).unwrap();
        assert_eq!(rebuilt, q);
    }

    #[test]
    fn element_mismatch_is_raised_at_construction() {
        let descriptor = QueryDescriptor::new(TypeName::new("ghosts::Ghost"));
        let Err(QueryError::ElementMismatch { recorded, expected }) =
            Query::<Person>::from_descriptor(descriptor)
        else {
            panic!("expected an element mismatch");
        };
        assert_eq!(recorded, "ghosts::Ghost");
        assert_eq!(expected, "people::Person");
    }
}
