use crate::{
    exec::{
        ExecError,
        context::ExecutionContext,
        convert::{QueryResult, declared_element, to_result},
        normalize::eval_normalized,
        prepare::{bind_resources, canonical},
    },
    expr::{
        ast::{ConstValue, Expr, FieldValue, RecordValue},
        eval::{Evaluated, Evaluator},
        reduce::{FoldAll, LocalEvalPolicy, reduce_with},
    },
    model::TypeResolver,
    node::{self as wire, Record},
    source::{ResourceProvider, SourceHandle},
    translate::from_wire_bound,
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

///
/// Execution stages
///
/// One trait, seven stages, all with default bodies. A host customizes
/// the pipeline by overriding individual stages; the orchestrators in
/// [`crate::exec::run`] and [`crate::exec::stream`] only ever talk to
/// this trait.
///
/// The execute stage exists in a synchronous and a cancellation-aware
/// asynchronous form. The async form drains every asynchronous source up
/// front and evaluates over the prefetched rows; everything else about
/// the run is identical.
///

#[async_trait]
pub trait ExecutionStages: Send + Sync {
    fn resolver(&self) -> &dyn TypeResolver;

    fn provider(&self) -> &dyn ResourceProvider;

    /// Folding policy consulted while preparing the native tree.
    fn policy(&self) -> &dyn LocalEvalPolicy {
        &FoldAll
    }

    /// Stage 1: canonicalize the received tree and bind every resource
    /// placeholder to a live source from the provider.
    fn prepare_remote(
        &self,
        ctx: &mut ExecutionContext,
        expr: wire::Expr,
    ) -> Result<wire::Expr, ExecError> {
        let expr = canonical(expr)?;
        bind_resources(self.provider(), ctx.bindings_mut(), &expr)?;
        Ok(expr)
    }

    /// Stage 2: rebuild the executable tree against the active resolver,
    /// substituting bound sources for placeholders.
    fn transform(&self, ctx: &ExecutionContext, expr: &wire::Expr) -> Result<Expr, ExecError> {
        Ok(from_wire_bound(self.resolver(), ctx.bindings(), expr)?)
    }

    /// Stage 3: fold closed subtrees under the folding policy.
    fn prepare_native(&self, _ctx: &ExecutionContext, expr: Expr) -> Result<Expr, ExecError> {
        Ok(reduce_with(self.policy(), expr))
    }

    /// Stage 4: evaluate, normalizing trailing single-result operators
    /// into their sentinel encoding.
    fn execute(&self, _ctx: &ExecutionContext, expr: &Expr) -> Result<Evaluated, ExecError> {
        let mut evaluator = Evaluator::new();
        let value = eval_normalized(&mut evaluator, expr)?;
        drain(&mut evaluator, value)
    }

    /// Stage 4, cancellation-aware: asynchronous sources are drained up
    /// front, checking the token between rows, then the chain evaluates
    /// over the prefetched row sets.
    async fn execute_async(
        &self,
        _ctx: &ExecutionContext,
        expr: &Expr,
        cancel: &CancellationToken,
    ) -> Result<Evaluated, ExecError> {
        let prefetched = prefetch_async_sources(expr, cancel).await?;
        let mut evaluator = Evaluator::with_prefetched(&prefetched);
        let value = eval_normalized(&mut evaluator, expr)?;
        drain(&mut evaluator, value)
    }

    /// Stage 5: hook over the raw evaluation outcome.
    fn process_result(
        &self,
        _ctx: &ExecutionContext,
        result: Evaluated,
    ) -> Result<Evaluated, ExecError> {
        Ok(result)
    }

    /// Stage 6: convert into the transfer form, carrying the declared
    /// element type read off the wire tree.
    fn convert_result(
        &self,
        ctx: &ExecutionContext,
        result: Evaluated,
    ) -> Result<QueryResult, ExecError> {
        to_result(ctx.remote().and_then(declared_element), result)
    }

    /// Stage 7: hook over the converted result.
    fn process_converted(
        &self,
        _ctx: &ExecutionContext,
        result: QueryResult,
    ) -> Result<QueryResult, ExecError> {
        Ok(result)
    }
}

/// An unconstrained query evaluates to its source; scan it so the result
/// leaves the execute stage materialized.
fn drain(evaluator: &mut Evaluator<'_>, value: Evaluated) -> Result<Evaluated, ExecError> {
    match value {
        source @ Evaluated::Source(_) => {
            Ok(Evaluated::Seq(evaluator.materialize(source, "execution")?))
        }
        other => Ok(other),
    }
}

///
/// DefaultStages
///
/// The stage set with nothing overridden. Hosts that only need to supply
/// a resolver and a provider use this directly.
///

pub struct DefaultStages<'a> {
    resolver: &'a dyn TypeResolver,
    provider: &'a dyn ResourceProvider,
    policy: &'a dyn LocalEvalPolicy,
}

impl<'a> DefaultStages<'a> {
    #[must_use]
    pub const fn new(resolver: &'a dyn TypeResolver, provider: &'a dyn ResourceProvider) -> Self {
        Self {
            resolver,
            provider,
            policy: &FoldAll,
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: &'a dyn LocalEvalPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl ExecutionStages for DefaultStages<'_> {
    fn resolver(&self) -> &dyn TypeResolver {
        self.resolver
    }

    fn provider(&self) -> &dyn ResourceProvider {
        self.provider
    }

    fn policy(&self) -> &dyn LocalEvalPolicy {
        self.policy
    }
}

///
/// Async prefetch
///

/// Drain every asynchronous source referenced by the tree into row sets
/// keyed by source identity. The token is observed before each source
/// and between rows.
pub async fn prefetch_async_sources(
    expr: &Expr,
    cancel: &CancellationToken,
) -> Result<Vec<(SourceHandle, Vec<Record>)>, ExecError> {
    let mut handles = Vec::new();
    collect_async_sources(expr, &mut handles);

    let mut prefetched = Vec::with_capacity(handles.len());
    for handle in handles {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let Some(source) = handle.as_async().cloned() else {
            continue;
        };

        let mut rows = Vec::new();
        let mut stream = source.scan().await?;
        while let Some(row) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            rows.push(row?);
        }
        prefetched.push((handle, rows));
    }

    Ok(prefetched)
}

/// Collect asynchronous source handles, deduplicated by identity.
pub(crate) fn collect_async_sources(expr: &Expr, out: &mut Vec<SourceHandle>) {
    match expr {
        Expr::Constant { value, .. } => collect_in_const(value, out),

        Expr::Parameter(_) | Expr::Default { .. } => {}

        Expr::Binary { left, right, .. } => {
            collect_async_sources(left, out);
            collect_async_sources(right, out);
        }

        Expr::Unary { operand, .. } => collect_async_sources(operand, out),

        Expr::Member { expr, .. } => {
            if let Some(expr) = expr {
                collect_async_sources(expr, out);
            }
        }

        Expr::Call { this, args, .. } => {
            if let Some(this) = this {
                collect_async_sources(this, out);
            }
            collect_in_slice(args.as_deref(), out);
        }

        Expr::Lambda { body, .. } => collect_async_sources(body, out),

        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            collect_async_sources(test, out);
            collect_async_sources(if_true, out);
            collect_async_sources(if_false, out);
        }

        Expr::New { args, .. } => collect_in_slice(args.as_deref(), out),

        Expr::NewArray { items, .. } => collect_in_slice(items.as_deref(), out),

        Expr::MemberInit { args, bindings, .. } => {
            collect_in_slice(args.as_deref(), out);
            for binding in bindings {
                collect_async_sources(&binding.expr, out);
            }
        }

        Expr::ListInit { inits, .. } => {
            for init in inits {
                collect_in_slice(Some(init.as_slice()), out);
            }
        }

        Expr::Block { exprs, .. } => collect_in_slice(Some(exprs.as_slice()), out),

        Expr::Loop { body, .. } => collect_async_sources(body, out),

        Expr::Goto { value, .. } => {
            if let Some(value) = value {
                collect_async_sources(value, out);
            }
        }

        Expr::Label { default, .. } => {
            if let Some(default) = default {
                collect_async_sources(default, out);
            }
        }

        Expr::Try {
            body,
            handlers,
            finally,
        } => {
            collect_async_sources(body, out);
            for handler in handlers {
                collect_async_sources(&handler.body, out);
                if let Some(filter) = &handler.filter {
                    collect_async_sources(filter, out);
                }
            }
            if let Some(finally) = finally {
                collect_async_sources(finally, out);
            }
        }

        Expr::Switch {
            subject,
            cases,
            default,
        } => {
            collect_async_sources(subject, out);
            for case in cases {
                collect_in_slice(Some(case.values.as_slice()), out);
                collect_async_sources(&case.body, out);
            }
            if let Some(default) = default {
                collect_async_sources(default, out);
            }
        }

        Expr::TypeIs { expr, .. } => collect_async_sources(expr, out),
    }
}

fn collect_in_slice(exprs: Option<&[Expr]>, out: &mut Vec<SourceHandle>) {
    for expr in exprs.unwrap_or_default() {
        collect_async_sources(expr, out);
    }
}

fn collect_in_const(value: &ConstValue, out: &mut Vec<SourceHandle>) {
    match value {
        ConstValue::Source(handle) => {
            if handle.as_async().is_some() && !out.iter().any(|known| known.ptr_eq(handle)) {
                out.push(handle.clone());
            }
        }
        ConstValue::Seq(seq) => {
            for item in &seq.items {
                collect_in_const(item, out);
            }
        }
        ConstValue::Record(record) => collect_in_record(record, out),
        ConstValue::Scalar(_) | ConstValue::Resource(_) => {}
    }
}

fn collect_in_record(record: &RecordValue, out: &mut Vec<SourceHandle>) {
    for (_, field) in &record.fields {
        collect_in_field(field, out);
    }
}

fn collect_in_field(field: &FieldValue, out: &mut Vec<SourceHandle>) {
    match field {
        FieldValue::Expr(expr) => collect_async_sources(expr, out),
        FieldValue::Record(record) => collect_in_record(record, out),
        FieldValue::List(items) => {
            for item in items {
                collect_in_field(item, out);
            }
        }
        FieldValue::Scalar(_) | FieldValue::Resource(_) => {}
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expr::{lambda, lit},
        ops::QueryOp,
        source::SourceRegistry,
        test_support::{people_source, people_source_async, person_resolver, person_ty},
        translate::to_wire,
    };

    fn received_where_chain() -> wire::Expr {
        let native = Expr::call_query(
            QueryOp::Where,
            Expr::resource(person_ty()),
            Some(vec![lambda("p", |p| p.field("age").gt(lit(30i64)))]),
        );
        to_wire(native).unwrap()
    }

    #[test]
    fn defaults_bind_then_translate() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let remote = stages
            .prepare_remote(&mut ctx, received_where_chain())
            .unwrap();
        assert_eq!(ctx.bindings().len(), 1);

        let native = stages.transform(&ctx, &remote).unwrap();
        let (origin, _) = native.query_spine().unwrap();
        assert!(matches!(
            origin,
            Expr::Constant {
                value: ConstValue::Source(_),
                ..
            }
        ));
    }

    #[test]
    fn missing_providers_fail_remote_prepare() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new();
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let err = stages
            .prepare_remote(&mut ctx, received_where_chain())
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::Source(crate::source::SourceError::UnknownResource { .. })
        ));
    }

    #[test]
    fn folding_policy_is_consulted() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new();
        let veto_all = |_: &Expr| false;
        let stages = DefaultStages::new(&resolver, &provider).with_policy(&veto_all);
        let ctx = ExecutionContext::new();

        let open = Expr::binary(crate::ops::BinaryOp::Add, lit(1i64), lit(2i64));
        let kept = stages.prepare_native(&ctx, open.clone()).unwrap();
        assert_eq!(kept, open);

        let folding = DefaultStages::new(&resolver, &provider);
        let folded = folding.prepare_native(&ctx, open).unwrap();
        assert_eq!(folded, Expr::value(3i64));
    }

    #[test]
    fn execute_drains_trailing_sources() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new();
        let stages = DefaultStages::new(&resolver, &provider);
        let ctx = ExecutionContext::new();

        let bare = Expr::source(people_source());
        let value = stages.execute(&ctx, &bare).unwrap();
        assert!(matches!(value, Evaluated::Seq(items) if items.len() == 4));
    }

    #[tokio::test]
    async fn prefetch_collects_only_async_handles() {
        let mixed = Expr::call_query(
            QueryOp::Where,
            Expr::source(people_source_async()),
            Some(vec![lambda("p", {
                let sync = people_source();
                move |p| {
                    p.field("age")
                        .gt(Expr::call_query(QueryOp::Count, Expr::source(sync), None))
                }
            })]),
        );

        let prefetched = prefetch_async_sources(&mixed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(prefetched.len(), 1);
        assert_eq!(prefetched[0].1.len(), 4);
        assert!(prefetched[0].0.as_async().is_some());
    }

    #[tokio::test]
    async fn prefetch_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let tree = Expr::source(people_source_async());
        let err = prefetch_async_sources(&tree, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn async_execute_evaluates_over_prefetched_rows() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new();
        let stages = DefaultStages::new(&resolver, &provider);
        let ctx = ExecutionContext::new();

        let chain = Expr::call_query(
            QueryOp::Count,
            Expr::call_query(
                QueryOp::Where,
                Expr::source(people_source_async()),
                Some(vec![lambda("p", |p| p.field("age").gt(lit(30i64)))]),
            ),
            None,
        );

        let value = stages
            .execute_async(&ctx, &chain, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(value, Evaluated::Value(crate::value::Value::Int(3))));
    }

    #[test]
    fn sync_execute_rejects_undrained_async_sources() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new();
        let stages = DefaultStages::new(&resolver, &provider);
        let ctx = ExecutionContext::new();

        let chain = Expr::call_query(QueryOp::Count, Expr::source(people_source_async()), None);
        let err = stages.execute(&ctx, &chain).unwrap_err();
        assert!(matches!(
            err,
            ExecError::Eval(crate::expr::EvalError::AsyncSource { .. })
        ));
    }
}
