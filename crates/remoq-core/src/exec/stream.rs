use crate::{
    exec::{
        ExecError,
        context::ExecutionContext,
        convert::{QueryResult, ResultItem},
        stages::{ExecutionStages, collect_async_sources},
    },
    expr::{
        ast::{ConstValue, Expr},
        eval::{Evaluator, Item, strip_quotes, to_item},
    },
    node::{self as wire},
    ops::QueryOp,
    source::{AsyncQueryable, RowStream},
    trace::{PipelineStage, RunShape, TraceScope},
    value::Value,
};
use futures::{StreamExt, stream, stream::BoxStream};
use std::{collections::VecDeque, sync::Arc};
use tokio_util::sync::CancellationToken;

///
/// Streaming execution
///
/// The third pipeline shape: results are handed over as an asynchronous
/// stream instead of a buffered payload. Chains over one asynchronous
/// source whose operators are row-local (filter, project, skip, take)
/// stream lazily, pulling a row at a time with the cancellation token
/// observed between rows. Every other chain runs buffered through the
/// async execute stage and streams the finished payload.
///
/// The trace scope concludes when the stream is handed over; per-row
/// work is not traced.
///

pub type ResultStream<'a> = BoxStream<'a, Result<ResultItem, ExecError>>;

/// Run a received expression and hand its results over as a stream.
pub async fn run_stream<'a, S: ExecutionStages + ?Sized>(
    stages: &'a S,
    ctx: &'a mut ExecutionContext,
    expr: wire::Expr,
    cancel: CancellationToken,
) -> Result<ResultStream<'a>, ExecError> {
    let sink = ctx.trace_handle();
    let mut scope = TraceScope::begin(sink.as_deref(), &expr, RunShape::Stream);

    let remote = scope.step(PipelineStage::PrepareRemote, stages.prepare_remote(ctx, expr))?;
    ctx.set_remote(remote.clone());

    let native = scope.step(PipelineStage::Transform, stages.transform(ctx, &remote))?;
    let native = scope.step(PipelineStage::PrepareNative, stages.prepare_native(ctx, native))?;
    ctx.set_native(native.clone());

    if let Some(plan) = streamable(&native) {
        let ctx: &'a ExecutionContext = ctx;
        return Ok(lazy_stream(stages, ctx, plan, cancel));
    }

    let value = scope.step(
        PipelineStage::Execute,
        stages.execute_async(ctx, &native, &cancel).await,
    )?;
    let value = scope.step(PipelineStage::ProcessResult, stages.process_result(ctx, value))?;
    let result = scope.step(PipelineStage::ConvertResult, stages.convert_result(ctx, value))?;
    let result = scope.step(
        PipelineStage::ProcessConverted,
        stages.process_converted(ctx, result),
    )?;
    Ok(buffered_stream(result, cancel))
}

///
/// Stream plans
///

struct StreamPlan {
    source: Arc<dyn AsyncQueryable>,
    ops: Vec<StreamOp>,
}

enum StreamOp {
    Where(Expr),
    Select(Expr),
    Skip { remaining: u64 },
    Take { remaining: u64 },
}

/// Extract a row-at-a-time plan, or decline. Declining is always safe:
/// the buffered path evaluates the same chain with identical semantics.
fn streamable(expr: &Expr) -> Option<StreamPlan> {
    let (origin, chain) = expr.query_spine()?;
    let Expr::Constant {
        value: ConstValue::Source(handle),
        ..
    } = origin
    else {
        return None;
    };
    let source = handle.as_async().cloned()?;

    let mut ops = Vec::with_capacity(chain.len());
    for (op, args) in chain {
        match op {
            QueryOp::Where | QueryOp::Select => {
                let Some([arg]) = args else {
                    return None;
                };
                let lambda = strip_quotes(arg);
                if !matches!(lambda, Expr::Lambda { .. }) || !self_contained(lambda) {
                    return None;
                }
                ops.push(if op == QueryOp::Where {
                    StreamOp::Where(lambda.clone())
                } else {
                    StreamOp::Select(lambda.clone())
                });
            }
            QueryOp::Skip | QueryOp::Take => {
                let Some([arg]) = args else {
                    return None;
                };
                let value = Evaluator::new().eval(arg).ok()?;
                // negative counts behave as zero, as in the interpreter
                let n = value.as_value().and_then(Value::to_i64)?;
                let remaining = u64::try_from(n).unwrap_or(0);
                ops.push(if op == QueryOp::Skip {
                    StreamOp::Skip { remaining }
                } else {
                    StreamOp::Take { remaining }
                });
            }
            // navigation marker, inert at this stage
            QueryOp::Include => {}
            _ => return None,
        }
    }

    Some(StreamPlan { source, ops })
}

/// True when the lambda touches no asynchronous source of its own; those
/// need the prefetching execute stage.
fn self_contained(lambda: &Expr) -> bool {
    let mut nested = Vec::new();
    collect_async_sources(lambda, &mut nested);
    nested.is_empty()
}

enum Pass {
    Keep(Item),
    Drop,
    Done,
}

/// Push one row through the operator pipeline, updating positional
/// counters in place.
fn apply_ops(ops: &mut [StreamOp], row: wire::Record) -> Result<Pass, ExecError> {
    let mut item = Item::Row(row);
    for op in ops {
        match op {
            StreamOp::Where(predicate) => {
                if !Evaluator::new().apply_predicate(predicate, &item)? {
                    return Ok(Pass::Drop);
                }
            }
            StreamOp::Select(selector) => {
                let value = Evaluator::new().apply_lambda(selector, item.into_evaluated())?;
                item = to_item(value, "select projection")?;
            }
            StreamOp::Skip { remaining } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Ok(Pass::Drop);
                }
            }
            StreamOp::Take { remaining } => {
                if *remaining == 0 {
                    return Ok(Pass::Done);
                }
                *remaining -= 1;
            }
        }
    }
    Ok(Pass::Keep(item))
}

///
/// Lazy shape
///

struct LazyState<'a, S: ?Sized> {
    stages: &'a S,
    ctx: &'a ExecutionContext,
    cancel: CancellationToken,
    source: Arc<dyn AsyncQueryable>,
    rows: Option<RowStream>,
    ops: Vec<StreamOp>,
    pending: VecDeque<ResultItem>,
    exhausted: bool,
}

fn lazy_stream<'a, S: ExecutionStages + ?Sized>(
    stages: &'a S,
    ctx: &'a ExecutionContext,
    plan: StreamPlan,
    cancel: CancellationToken,
) -> ResultStream<'a> {
    let state = LazyState {
        stages,
        ctx,
        cancel,
        source: plan.source,
        rows: None,
        ops: plan.ops,
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::try_unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Ok(Some((item, st)));
            }
            if st.exhausted {
                return Ok(None);
            }
            if st.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }

            // the source is opened on first poll, not at handover
            let mut rows = match st.rows.take() {
                Some(rows) => rows,
                None => st.source.scan().await?,
            };
            let next = rows.next().await;
            st.rows = Some(rows);

            match next {
                None => st.exhausted = true,
                Some(row) => match apply_ops(&mut st.ops, row?)? {
                    Pass::Keep(item) => {
                        let value = st.stages.process_result(st.ctx, item.into_evaluated())?;
                        let converted = st.stages.convert_result(st.ctx, value)?;
                        let converted = st.stages.process_converted(st.ctx, converted)?;
                        st.pending.extend(converted.into_items());
                    }
                    Pass::Drop => {}
                    Pass::Done => st.exhausted = true,
                },
            }
        }
    })
    .boxed()
}

///
/// Buffered shape
///

fn buffered_stream<'a>(result: QueryResult, cancel: CancellationToken) -> ResultStream<'a> {
    let pending: VecDeque<ResultItem> = result.into_items().into();
    stream::try_unfold((pending, cancel), |(mut pending, cancel)| async move {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        Ok(pending.pop_front().map(|item| (item, (pending, cancel))))
    })
    .boxed()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exec::stages::DefaultStages,
        expr::{lambda, lit},
        source::SourceRegistry,
        test_support::{
            people_source, people_source_async, person_resolver, person_ty, row_age,
        },
        trace::{TraceEvent, TraceSink},
        translate::to_wire,
    };
    use futures::TryStreamExt;
    use std::sync::{Arc, Mutex};

    fn received(native: Expr) -> wire::Expr {
        to_wire(native).unwrap()
    }

    fn source_chain(build: impl FnOnce(Expr) -> Expr) -> wire::Expr {
        received(build(Expr::resource(person_ty())))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TraceSink for Recorder {
        fn event(&self, event: &TraceEvent) {
            let label = match event {
                TraceEvent::Started { shape, .. } => format!("started:{}", shape.name()),
                TraceEvent::StageDone { stage, .. } => format!("done:{}", stage.name()),
                TraceEvent::Failed { stage, .. } => format!("failed:{}", stage.name()),
                TraceEvent::Finished { .. } => "finished".to_string(),
            };
            self.0.lock().unwrap().push(label);
        }
    }

    fn ages(items: &[ResultItem]) -> Vec<i64> {
        items
            .iter()
            .map(|item| {
                let ResultItem::Row(row) = item else {
                    panic!("expected row items, got {item:?}");
                };
                row_age(row)
            })
            .collect()
    }

    #[tokio::test]
    async fn row_local_chains_stream_lazily() {
        let recorder = Arc::new(Recorder::default());
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source_async());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new().with_trace(recorder.clone());

        let expr = source_chain(|src| {
            Expr::call_query(
                QueryOp::Skip,
                Expr::call_query(
                    QueryOp::Where,
                    src,
                    Some(vec![lambda("p", |p| p.field("age").gt(lit(30i64)))]),
                ),
                Some(vec![lit(1i64)]),
            )
        });
        let stream = run_stream(&stages, &mut ctx, expr, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<ResultItem> = stream.try_collect().await.unwrap();

        assert_eq!(ages(&items), vec![35, 40]);

        // the execute stage never ran; rows were pulled one at a time
        let events = recorder.0.lock().unwrap();
        assert!(!events.iter().any(|label| label == "done:execute"));
        assert_eq!(events.first().map(String::as_str), Some("started:stream"));
        assert_eq!(events.last().map(String::as_str), Some("finished"));
    }

    #[tokio::test]
    async fn projections_stream_plain_values() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source_async());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let expr = source_chain(|src| {
            Expr::call_query(
                QueryOp::Select,
                src,
                Some(vec![lambda("p", |p| p.field("age"))]),
            )
        });
        let stream = run_stream(&stages, &mut ctx, expr, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<ResultItem> = stream.try_collect().await.unwrap();

        let values: Vec<_> = items
            .into_iter()
            .map(|item| {
                let ResultItem::Value(Value::Int(age)) = item else {
                    panic!("expected integer values");
                };
                age
            })
            .collect();
        assert_eq!(values, vec![25, 31, 35, 40]);
    }

    #[tokio::test]
    async fn take_exhaustion_ends_the_stream() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source_async());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let expr = source_chain(|src| {
            Expr::call_query(QueryOp::Take, src, Some(vec![lit(2i64)]))
        });
        let stream = run_stream(&stages, &mut ctx, expr, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<ResultItem> = stream.try_collect().await.unwrap();

        assert_eq!(ages(&items), vec![25, 31]);
    }

    #[tokio::test]
    async fn sorted_chains_fall_back_to_buffering() {
        let recorder = Arc::new(Recorder::default());
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source_async());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new().with_trace(recorder.clone());

        let expr = source_chain(|src| {
            Expr::call_query(
                QueryOp::OrderByDesc,
                src,
                Some(vec![lambda("p", |p| p.field("age"))]),
            )
        });
        let stream = run_stream(&stages, &mut ctx, expr, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<ResultItem> = stream.try_collect().await.unwrap();

        assert_eq!(ages(&items), vec![40, 35, 31, 25]);

        let events = recorder.0.lock().unwrap();
        assert!(events.iter().any(|label| label == "done:execute"));
    }

    #[tokio::test]
    async fn synchronous_sources_buffer_too() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let expr = source_chain(|src| {
            Expr::call_query(
                QueryOp::Where,
                src,
                Some(vec![lambda("p", |p| p.field("age").gt(lit(30i64)))]),
            )
        });
        let stream = run_stream(&stages, &mut ctx, expr, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<ResultItem> = stream.try_collect().await.unwrap();

        assert_eq!(ages(&items), vec![31, 35, 40]);
    }

    #[tokio::test]
    async fn cancellation_stops_a_live_stream() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source_async());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let cancel = CancellationToken::new();
        let expr = source_chain(|src| src);
        let mut stream = run_stream(&stages, &mut ctx, expr, cancel.clone())
            .await
            .unwrap();

        let first = stream.try_next().await.unwrap();
        assert!(first.is_some());

        cancel.cancel();
        let err = stream.try_next().await.unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_before_the_first_poll() {
        let resolver = person_resolver();
        let provider = SourceRegistry::new().with(people_source_async());
        let stages = DefaultStages::new(&resolver, &provider);
        let mut ctx = ExecutionContext::new();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let expr = source_chain(|src| src);
        let mut stream = run_stream(&stages, &mut ctx, expr, cancel).await.unwrap();

        let err = stream.try_next().await.unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }

    #[test]
    fn plans_follow_the_operator_whitelist() {
        let source = Expr::source(people_source_async());

        let plain = Expr::call_query(
            QueryOp::Where,
            source.clone(),
            Some(vec![lambda("p", |p| p.field("age").gt(lit(30i64)))]),
        );
        assert!(streamable(&plain).is_some());

        let sorted = Expr::call_query(
            QueryOp::OrderBy,
            source.clone(),
            Some(vec![lambda("p", |p| p.field("age"))]),
        );
        assert!(streamable(&sorted).is_none());

        let sync_origin = Expr::call_query(
            QueryOp::Take,
            Expr::source(people_source()),
            Some(vec![lit(2i64)]),
        );
        assert!(streamable(&sync_origin).is_none());

        let cross_source = Expr::call_query(
            QueryOp::Where,
            source,
            Some(vec![lambda("p", {
                let other = people_source_async();
                move |p| {
                    p.field("age")
                        .gt(Expr::call_query(QueryOp::Count, Expr::source(other), None))
                }
            })]),
        );
        assert!(streamable(&cross_source).is_none());
    }
}
