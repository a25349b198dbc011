use crate::{
    exec::{ExecError, context::ExecutionContext, convert::QueryResult, stages::ExecutionStages},
    node::{self as wire},
    trace::{PipelineStage, RunShape, TraceScope},
};
use tokio_util::sync::CancellationToken;

///
/// Pipeline orchestrators
///
/// Thin drivers that call the stage trait in order and thread a trace
/// scope through the run. The fingerprint covers the tree exactly as it
/// arrived, before canonicalization touches it, so senders and receivers
/// can correlate their traces.
///

/// Run a received expression through all seven stages synchronously.
pub fn run<S: ExecutionStages + ?Sized>(
    stages: &S,
    ctx: &mut ExecutionContext,
    expr: wire::Expr,
) -> Result<QueryResult, ExecError> {
    let sink = ctx.trace_handle();
    let mut scope = TraceScope::begin(sink.as_deref(), &expr, RunShape::Sync);

    let remote = scope.step(PipelineStage::PrepareRemote, stages.prepare_remote(ctx, expr))?;
    ctx.set_remote(remote.clone());

    let native = scope.step(PipelineStage::Transform, stages.transform(ctx, &remote))?;
    let native = scope.step(PipelineStage::PrepareNative, stages.prepare_native(ctx, native))?;
    ctx.set_native(native.clone());

    let value = scope.step(PipelineStage::Execute, stages.execute(ctx, &native))?;
    let value = scope.step(PipelineStage::ProcessResult, stages.process_result(ctx, value))?;
    let result = scope.step(PipelineStage::ConvertResult, stages.convert_result(ctx, value))?;
    scope.step(
        PipelineStage::ProcessConverted,
        stages.process_converted(ctx, result),
    )
}

/// Run a received expression through all seven stages, draining
/// asynchronous sources under the cancellation token.
pub async fn run_async<S: ExecutionStages + ?Sized>(
    stages: &S,
    ctx: &mut ExecutionContext,
    expr: wire::Expr,
    cancel: &CancellationToken,
) -> Result<QueryResult, ExecError> {
    let sink = ctx.trace_handle();
    let mut scope = TraceScope::begin(sink.as_deref(), &expr, RunShape::Async);

    let remote = scope.step(PipelineStage::PrepareRemote, stages.prepare_remote(ctx, expr))?;
    ctx.set_remote(remote.clone());

    let native = scope.step(PipelineStage::Transform, stages.transform(ctx, &remote))?;
    let native = scope.step(PipelineStage::PrepareNative, stages.prepare_native(ctx, native))?;
    ctx.set_native(native.clone());

    let value = scope.step(
        PipelineStage::Execute,
        stages.execute_async(ctx, &native, cancel).await,
    )?;
    let value = scope.step(PipelineStage::ProcessResult, stages.process_result(ctx, value))?;
    let result = scope.step(PipelineStage::ConvertResult, stages.convert_result(ctx, value))?;
    scope.step(
        PipelineStage::ProcessConverted,
        stages.process_converted(ctx, result),
    )
}

// ============================================================================
// Tests
// ============================================================================
