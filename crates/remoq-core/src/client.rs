use crate::{
    exec::{ExecError, QueryResult, ResultItem, ResultPayload},
    expr::{Expr, Var, builder::lambda},
    model::{Described, MapError, SerdeMapper, ValueMapper, mapping::json_from_value},
    node::{self as wire},
    ops::QueryOp,
    translate::to_wire,
};
use async_trait::async_trait;
use derive_more::Deref;
use futures::{StreamExt, stream::BoxStream};
use serde::de::DeserializeOwned;
use std::{marker::PhantomData, sync::Arc};
use tokio_util::sync::CancellationToken;

///
/// Remote queryable facade
///
/// Fluent query composition over a remote source. Chain methods build up
/// a native expression tree exactly as they would over a local
/// collection; the terminal methods translate it to the wire form, hand
/// it to the configured client, and map the transfer-shaped result back
/// into typed values. The single-result terminals interpret the
/// pipeline's sentinel encoding: an empty sequence means no elements, a
/// longer one means the requested element was ambiguous.
///

///
/// RemoteClient
///
/// The remote side of a synchronous facade. Closures implement it
/// directly.
///

pub trait RemoteClient: Send + Sync {
    fn execute(&self, expr: &wire::Expr) -> Result<QueryResult, ExecError>;
}

impl<F> RemoteClient for F
where
    F: Fn(&wire::Expr) -> Result<QueryResult, ExecError> + Send + Sync,
{
    fn execute(&self, expr: &wire::Expr) -> Result<QueryResult, ExecError> {
        self(expr)
    }
}

///
/// AsyncRemoteClient
///

pub type ClientStream = BoxStream<'static, Result<ResultItem, ExecError>>;

#[async_trait]
pub trait AsyncRemoteClient: Send + Sync {
    async fn execute(&self, expr: &wire::Expr) -> Result<QueryResult, ExecError>;

    async fn stream(
        &self,
        expr: &wire::Expr,
        cancel: CancellationToken,
    ) -> Result<ClientStream, ExecError>;
}

///
/// RemoteQueryable
///

pub struct RemoteQueryable<T, C: ?Sized = dyn RemoteClient> {
    expr: Expr,
    client: Arc<C>,
    _marker: PhantomData<fn() -> T>,
}

pub type AsyncRemoteQueryable<T> = RemoteQueryable<T, dyn AsyncRemoteClient>;

impl<T: Described, C: ?Sized> RemoteQueryable<T, C> {
    /// A queryable over `T`'s element type, answered by `client`.
    #[must_use]
    pub fn new(client: Arc<C>) -> Self {
        Self {
            expr: Expr::resource(T::type_name()),
            client,
            _marker: PhantomData,
        }
    }
}

impl<T, C: ?Sized> RemoteQueryable<T, C> {
    /// The accumulated native tree.
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }

    ///
    /// COMPOSITION
    ///
    /// Each method leaves the receiver untouched and returns a new
    /// queryable wrapping the receiver's tree in one more operator.
    ///

    /// Keep only elements satisfying the predicate.
    #[must_use]
    pub fn filter(&self, predicate: impl FnOnce(Var) -> Expr) -> Self {
        self.chain(QueryOp::Where, Some(vec![lambda("x", predicate)]))
    }

    /// Project each element, changing the queryable's element type.
    #[must_use]
    pub fn select<U>(&self, selector: impl FnOnce(Var) -> Expr) -> RemoteQueryable<U, C> {
        self.chain_as(QueryOp::Select, Some(vec![lambda("x", selector)]))
    }

    /// Start an ascending sort. Tie-break keys chain off the returned
    /// queryable.
    #[must_use]
    pub fn order_by(&self, selector: impl FnOnce(Var) -> Expr) -> OrderedRemoteQueryable<T, C> {
        OrderedRemoteQueryable {
            inner: self.chain(QueryOp::OrderBy, Some(vec![lambda("x", selector)])),
        }
    }

    /// Start a descending sort.
    #[must_use]
    pub fn order_by_desc(
        &self,
        selector: impl FnOnce(Var) -> Expr,
    ) -> OrderedRemoteQueryable<T, C> {
        OrderedRemoteQueryable {
            inner: self.chain(QueryOp::OrderByDesc, Some(vec![lambda("x", selector)])),
        }
    }

    /// Drop the first `count` elements.
    #[must_use]
    pub fn skip(&self, count: u64) -> Self {
        self.chain(QueryOp::Skip, Some(vec![Expr::value(count)]))
    }

    /// Keep at most `count` elements.
    #[must_use]
    pub fn take(&self, count: u64) -> Self {
        self.chain(QueryOp::Take, Some(vec![Expr::value(count)]))
    }

    /// Keep only distinct elements.
    #[must_use]
    pub fn distinct(&self) -> Self {
        self.chain(QueryOp::Distinct, None)
    }

    /// Attach a navigation marker for the remote provider. Inert during
    /// local evaluation.
    #[must_use]
    pub fn include(&self, path: impl Into<String>) -> Self {
        self.chain(QueryOp::Include, Some(vec![Expr::value(path.into())]))
    }

    fn chain(&self, op: QueryOp, args: Option<Vec<Expr>>) -> Self {
        self.chain_as(op, args)
    }

    fn chain_as<U>(&self, op: QueryOp, args: Option<Vec<Expr>>) -> RemoteQueryable<U, C> {
        RemoteQueryable {
            expr: Expr::call_query(op, self.expr.clone(), args),
            client: Arc::clone(&self.client),
            _marker: PhantomData,
        }
    }

    fn wire(&self) -> Result<wire::Expr, ExecError> {
        Ok(to_wire(self.expr.clone())?)
    }

    fn wire_terminal(&self, op: QueryOp) -> Result<wire::Expr, ExecError> {
        Ok(to_wire(Expr::call_query(op, self.expr.clone(), None))?)
    }
}

impl<T, C: ?Sized> Clone for RemoteQueryable<T, C> {
    fn clone(&self) -> Self {
        Self {
            expr: self.expr.clone(),
            client: Arc::clone(&self.client),
            _marker: PhantomData,
        }
    }
}

///
/// OrderedRemoteQueryable
///
/// A queryable with an established sort, the only state tie-break keys
/// may chain onto. Everything else passes through to the inner
/// queryable.
///

#[derive(Deref)]
pub struct OrderedRemoteQueryable<T, C: ?Sized = dyn RemoteClient> {
    inner: RemoteQueryable<T, C>,
}

impl<T, C: ?Sized> OrderedRemoteQueryable<T, C> {
    /// Append an ascending tie-break key.
    #[must_use]
    pub fn then_by(&self, selector: impl FnOnce(Var) -> Expr) -> Self {
        Self {
            inner: self
                .inner
                .chain(QueryOp::ThenBy, Some(vec![lambda("x", selector)])),
        }
    }

    /// Append a descending tie-break key.
    #[must_use]
    pub fn then_by_desc(&self, selector: impl FnOnce(Var) -> Expr) -> Self {
        Self {
            inner: self
                .inner
                .chain(QueryOp::ThenByDesc, Some(vec![lambda("x", selector)])),
        }
    }
}

impl<T, C: ?Sized> Clone for OrderedRemoteQueryable<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

///
/// TERMINALS, SYNCHRONOUS
///

impl<T: DeserializeOwned> RemoteQueryable<T, dyn RemoteClient> {
    /// Execute the chain and collect every element.
    pub fn to_vec(&self) -> Result<Vec<T>, ExecError> {
        seq_into(self.client.execute(&self.wire()?)?)
    }

    /// The first element; an empty result is an error.
    pub fn first(&self) -> Result<T, ExecError> {
        first_of(self.client.execute(&self.wire_terminal(QueryOp::First)?)?)
    }

    /// The first element, or `None` when there is none.
    pub fn first_or_default(&self) -> Result<Option<T>, ExecError> {
        first_opt(
            self.client
                .execute(&self.wire_terminal(QueryOp::FirstOrDefault)?)?,
        )
    }

    /// The only element; empty and ambiguous results are errors.
    pub fn single(&self) -> Result<T, ExecError> {
        single_of(self.client.execute(&self.wire_terminal(QueryOp::Single)?)?)
    }

    /// The only element, `None` when empty; ambiguity is still an error.
    pub fn single_or_default(&self) -> Result<Option<T>, ExecError> {
        single_opt(
            self.client
                .execute(&self.wire_terminal(QueryOp::SingleOrDefault)?)?,
        )
    }
}

impl<T> RemoteQueryable<T, dyn RemoteClient> {
    /// Number of elements the chain yields.
    pub fn count(&self) -> Result<u64, ExecError> {
        count_of(self.client.execute(&self.wire_terminal(QueryOp::Count)?)?)
    }

    /// Whether the chain yields anything at all.
    pub fn any(&self) -> Result<bool, ExecError> {
        bool_of(self.client.execute(&self.wire_terminal(QueryOp::Any)?)?)
    }
}

///
/// TERMINALS, ASYNCHRONOUS
///

impl<T: DeserializeOwned> RemoteQueryable<T, dyn AsyncRemoteClient> {
    pub async fn to_vec(&self) -> Result<Vec<T>, ExecError> {
        seq_into(self.client.execute(&self.wire()?).await?)
    }

    pub async fn first(&self) -> Result<T, ExecError> {
        first_of(
            self.client
                .execute(&self.wire_terminal(QueryOp::First)?)
                .await?,
        )
    }

    pub async fn first_or_default(&self) -> Result<Option<T>, ExecError> {
        first_opt(
            self.client
                .execute(&self.wire_terminal(QueryOp::FirstOrDefault)?)
                .await?,
        )
    }

    pub async fn single(&self) -> Result<T, ExecError> {
        single_of(
            self.client
                .execute(&self.wire_terminal(QueryOp::Single)?)
                .await?,
        )
    }

    pub async fn single_or_default(&self) -> Result<Option<T>, ExecError> {
        single_opt(
            self.client
                .execute(&self.wire_terminal(QueryOp::SingleOrDefault)?)
                .await?,
        )
    }

    /// Execute the chain as a lazy stream of typed elements.
    pub async fn stream(
        &self,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<T, ExecError>>, ExecError>
    where
        T: Send + 'static,
    {
        let items = self.client.stream(&self.wire()?, cancel).await?;
        Ok(items.map(|item| item.and_then(item_into)).boxed())
    }
}

impl<T> RemoteQueryable<T, dyn AsyncRemoteClient> {
    pub async fn count(&self) -> Result<u64, ExecError> {
        count_of(
            self.client
                .execute(&self.wire_terminal(QueryOp::Count)?)
                .await?,
        )
    }

    pub async fn any(&self) -> Result<bool, ExecError> {
        bool_of(
            self.client
                .execute(&self.wire_terminal(QueryOp::Any)?)
                .await?,
        )
    }
}

///
/// Result mapping
///

fn item_into<T: DeserializeOwned>(item: ResultItem) -> Result<T, ExecError> {
    let (label, json) = match &item {
        ResultItem::Row(record) => (
            record.type_name.to_string(),
            SerdeMapper.json_from_record(record)?,
        ),
        ResultItem::Value(value) => ("result value".to_string(), json_from_value("result", value)?),
    };
    serde_json::from_value(json).map_err(|err| {
        ExecError::Map(MapError::Deserialize {
            type_name: label,
            message: err.to_string(),
        })
    })
}

const fn payload_label(result: &QueryResult) -> &'static str {
    match &result.payload {
        ResultPayload::Seq(_) => "a sequence",
        ResultPayload::One(ResultItem::Value(_)) => "a value",
        ResultPayload::One(ResultItem::Row(_)) => "a row",
    }
}

fn seq_into<T: DeserializeOwned>(result: QueryResult) -> Result<Vec<T>, ExecError> {
    let ResultPayload::Seq(items) = result.payload else {
        return Err(ExecError::ResultShape {
            expected: "a sequence",
            actual: payload_label(&result),
        });
    };
    items.into_iter().map(item_into).collect()
}

fn first_of<T: DeserializeOwned>(result: QueryResult) -> Result<T, ExecError> {
    first_opt(result)?.ok_or(ExecError::NoElements)
}

fn first_opt<T: DeserializeOwned>(result: QueryResult) -> Result<Option<T>, ExecError> {
    match result.payload {
        ResultPayload::One(item) => Ok(Some(item_into(item)?)),
        ResultPayload::Seq(items) => match items.into_iter().next() {
            Some(item) => Ok(Some(item_into(item)?)),
            None => Ok(None),
        },
    }
}

fn single_of<T: DeserializeOwned>(result: QueryResult) -> Result<T, ExecError> {
    single_opt(result)?.ok_or(ExecError::NoElements)
}

fn single_opt<T: DeserializeOwned>(result: QueryResult) -> Result<Option<T>, ExecError> {
    match result.payload {
        ResultPayload::One(item) => Ok(Some(item_into(item)?)),
        ResultPayload::Seq(items) => {
            if items.len() > 1 {
                return Err(ExecError::MoreThanOneElement);
            }
            match items.into_iter().next() {
                Some(item) => Ok(Some(item_into(item)?)),
                None => Ok(None),
            }
        }
    }
}

fn count_of(result: QueryResult) -> Result<u64, ExecError> {
    let shape = payload_label(&result);
    let ResultPayload::One(ResultItem::Value(value)) = result.payload else {
        return Err(ExecError::ResultShape {
            expected: "a count",
            actual: shape,
        });
    };
    value.to_u64().ok_or(ExecError::ResultShape {
        expected: "a count",
        actual: "a value",
    })
}

fn bool_of(result: QueryResult) -> Result<bool, ExecError> {
    let shape = payload_label(&result);
    match result.payload {
        ResultPayload::One(ResultItem::Value(crate::value::Value::Bool(b))) => Ok(b),
        _ => Err(ExecError::ResultShape {
            expected: "a boolean",
            actual: shape,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exec::{self, DefaultStages, ExecutionContext},
        expr::lit,
        source::SourceRegistry,
        test_support::{Person, people_source, people_source_async, person_resolver},
    };
    use futures::TryStreamExt;

    fn serve(expr: &wire::Expr) -> Result<QueryResult, ExecError> {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source());
        let stages = DefaultStages::new(&resolver, &provider);
        exec::run(&stages, &mut ExecutionContext::new(), expr.clone())
    }

    fn people() -> RemoteQueryable<Person> {
        RemoteQueryable::new(Arc::new(serve))
    }

    struct AsyncServe;

    #[async_trait]
    impl AsyncRemoteClient for AsyncServe {
        async fn execute(&self, expr: &wire::Expr) -> Result<QueryResult, ExecError> {
            let resolver = person_resolver();
            let provider = SourceRegistry::new().with(people_source_async());
            let stages = DefaultStages::new(&resolver, &provider);
            exec::run_async(
                &stages,
                &mut ExecutionContext::new(),
                expr.clone(),
                &CancellationToken::new(),
            )
            .await
        }

        async fn stream(
            &self,
            expr: &wire::Expr,
            _cancel: CancellationToken,
        ) -> Result<ClientStream, ExecError> {
            let result = self.execute(expr).await?;
            Ok(futures::stream::iter(result.into_items().into_iter().map(Ok)).boxed())
        }
    }

    fn people_async() -> AsyncRemoteQueryable<Person> {
        RemoteQueryable::new(Arc::new(AsyncServe))
    }

    #[test]
    fn filtered_chains_come_back_typed() {
        let names: Vec<String> = people()
            .filter(|p| p.field("age").gt(lit(30i64)))
            .to_vec()
            .unwrap()
            .into_iter()
            .map(|p: Person| p.name)
            .collect();

        assert_eq!(names, vec!["Bea", "Cal", "Dan"]);
    }

    #[test]
    fn projections_change_the_element_type() {
        let ages: Vec<i64> = people().select(|p| p.field("age")).to_vec().unwrap();
        assert_eq!(ages, vec![25, 31, 35, 40]);
    }

    #[test]
    fn ordering_feeds_tie_breaks() {
        let sorted: Vec<Person> = people()
            .order_by_desc(|p| p.field("age"))
            .then_by(|p| p.field("name"))
            .to_vec()
            .unwrap();

        assert_eq!(sorted[0].age, 40);
        assert_eq!(sorted[3].age, 25);
    }

    #[test]
    fn paging_composes() {
        let window: Vec<Person> = people().skip(1).take(2).to_vec().unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].name, "Bea");
        assert_eq!(window[1].name, "Cal");
    }

    #[test]
    fn first_maps_the_empty_sentinel() {
        let missing = people().filter(|p| p.field("age").gt(lit(99i64)));

        assert!(matches!(missing.first(), Err(ExecError::NoElements)));
        assert!(missing.first_or_default().unwrap().is_none());

        let bea: Person = people()
            .filter(|p| p.field("age").gt(lit(30i64)))
            .first()
            .unwrap();
        assert_eq!(bea.name, "Bea");
    }

    #[test]
    fn single_maps_the_ambiguity_sentinel() {
        let adults = people().filter(|p| p.field("age").gt(lit(30i64)));
        assert!(matches!(adults.single(), Err(ExecError::MoreThanOneElement)));
        assert!(matches!(
            adults.single_or_default(),
            Err(ExecError::MoreThanOneElement)
        ));

        let dan: Person = people()
            .filter(|p| p.field("age").gt(lit(39i64)))
            .single()
            .unwrap();
        assert_eq!(dan.name, "Dan");
    }

    #[test]
    fn counts_and_existence_checks() {
        assert_eq!(people().count().unwrap(), 4);
        assert!(people().any().unwrap());
        assert!(
            !people()
                .filter(|p| p.field("age").gt(lit(99i64)))
                .any()
                .unwrap()
        );
    }

    #[test]
    fn composition_leaves_the_receiver_untouched() {
        let base = people();
        let narrowed = base.filter(|p| p.field("age").gt(lit(30i64)));

        assert_eq!(base.count().unwrap(), 4);
        assert_eq!(narrowed.count().unwrap(), 3);
    }

    #[tokio::test]
    async fn async_terminals_mirror_the_sync_ones() {
        let adults = people_async().filter(|p| p.field("age").gt(lit(30i64)));

        assert_eq!(adults.count().await.unwrap(), 3);
        let first: Person = adults.first().await.unwrap();
        assert_eq!(first.name, "Bea");
    }

    #[tokio::test]
    async fn streams_yield_typed_elements() {
        let stream = people_async()
            .select::<i64>(|p| p.field("age"))
            .stream(CancellationToken::new())
            .await
            .unwrap();
        let ages: Vec<i64> = stream.try_collect().await.unwrap();

        assert_eq!(ages, vec![25, 31, 35, 40]);
    }
}
