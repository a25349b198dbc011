use crate::node::{self as wire, ExprFingerprint, fingerprint::fingerprint};
use std::fmt;

///
/// Pipeline tracing
///
/// Hooks for observing a pipeline run without participating in it. Every
/// event carries the fingerprint of the incoming wire tree, so a sink on
/// either side of the boundary can correlate the same logical query.
///
/// Sinks are optional. A pipeline without one pays a branch per stage and
/// nothing else.
///

///
/// PipelineStage
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PipelineStage {
    PrepareRemote,
    Transform,
    PrepareNative,
    Execute,
    ProcessResult,
    ConvertResult,
    ProcessConverted,
}

impl PipelineStage {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PrepareRemote => "prepare_remote",
            Self::Transform => "transform",
            Self::PrepareNative => "prepare_native",
            Self::Execute => "execute",
            Self::ProcessResult => "process_result",
            Self::ConvertResult => "convert_result",
            Self::ProcessConverted => "process_converted",
        }
    }
}

///
/// RunShape
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunShape {
    Sync,
    Async,
    Stream,
}

impl RunShape {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
            Self::Stream => "stream",
        }
    }
}

///
/// TraceEvent
///

#[derive(Clone, Debug)]
pub enum TraceEvent {
    Started {
        fingerprint: ExprFingerprint,
        shape: RunShape,
    },
    StageDone {
        fingerprint: ExprFingerprint,
        stage: PipelineStage,
    },
    Finished {
        fingerprint: ExprFingerprint,
    },
    Failed {
        fingerprint: ExprFingerprint,
        stage: PipelineStage,
        message: String,
    },
}

impl TraceEvent {
    #[must_use]
    pub const fn fingerprint(&self) -> &ExprFingerprint {
        match self {
            Self::Started { fingerprint, .. }
            | Self::StageDone { fingerprint, .. }
            | Self::Finished { fingerprint }
            | Self::Failed { fingerprint, .. } => fingerprint,
        }
    }
}

///
/// TraceSink
///
/// Closures implement it directly.
///

pub trait TraceSink: Send + Sync {
    fn event(&self, event: &TraceEvent);
}

impl<F> TraceSink for F
where
    F: Fn(&TraceEvent) + Send + Sync,
{
    fn event(&self, event: &TraceEvent) {
        self(event);
    }
}

///
/// TraceScope
///
/// Guard covering one pipeline run. Emits `Started` on construction and
/// `Finished` on drop unless a failure concluded the run first. Streaming
/// runs conclude their scope when the stream is handed over, not when it
/// is drained.
///

pub struct TraceScope<'a> {
    sink: Option<&'a dyn TraceSink>,
    fingerprint: ExprFingerprint,
    concluded: bool,
}

impl<'a> TraceScope<'a> {
    pub fn begin(sink: Option<&'a dyn TraceSink>, expr: &wire::Expr, shape: RunShape) -> Self {
        let fp = fingerprint(expr);
        if let Some(sink) = sink {
            sink.event(&TraceEvent::Started {
                fingerprint: fp,
                shape,
            });
        }

        Self {
            sink,
            fingerprint: fp,
            concluded: false,
        }
    }

    #[must_use]
    pub const fn fingerprint(&self) -> &ExprFingerprint {
        &self.fingerprint
    }

    /// Record a completed stage.
    pub fn stage(&self, stage: PipelineStage) {
        if let Some(sink) = self.sink {
            sink.event(&TraceEvent::StageDone {
                fingerprint: self.fingerprint,
                stage,
            });
        }
    }

    /// Conclude the run with a failure. The drop-time `Finished` event is
    /// suppressed.
    pub fn fail(&mut self, stage: PipelineStage, error: &dyn fmt::Display) {
        self.concluded = true;
        if let Some(sink) = self.sink {
            sink.event(&TraceEvent::Failed {
                fingerprint: self.fingerprint,
                stage,
                message: error.to_string(),
            });
        }
    }

    /// Run one stage under this scope, tracing its outcome either way.
    pub fn step<T, E>(&mut self, stage: PipelineStage, result: Result<T, E>) -> Result<T, E>
    where
        E: fmt::Display,
    {
        match result {
            Ok(value) => {
                self.stage(stage);
                Ok(value)
            }
            Err(err) => {
                self.fail(stage, &err);
                Err(err)
            }
        }
    }
}

impl Drop for TraceScope<'_> {
    fn drop(&mut self) {
        if self.concluded {
            return;
        }
        if let Some(sink) = self.sink {
            sink.event(&TraceEvent::Finished {
                fingerprint: self.fingerprint,
            });
        }
    }
}

impl fmt::Debug for TraceScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceScope")
            .field("fingerprint", &self.fingerprint.short())
            .field("concluded", &self.concluded)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{node::ArgValue, value::Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<TraceEvent>>,
    }

    impl TraceSink for Capture {
        fn event(&self, event: &TraceEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn probe() -> wire::Expr {
        wire::Expr::constant(ArgValue::Scalar(Value::Int(7)))
    }

    #[test]
    fn scopes_emit_start_and_finish() {
        let capture = Capture::default();
        {
            let scope = TraceScope::begin(Some(&capture), &probe(), RunShape::Sync);
            scope.stage(PipelineStage::Transform);
        }

        let events = capture.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            TraceEvent::Started {
                shape: RunShape::Sync,
                ..
            }
        ));
        assert!(matches!(
            events[1],
            TraceEvent::StageDone {
                stage: PipelineStage::Transform,
                ..
            }
        ));
        assert!(matches!(events[2], TraceEvent::Finished { .. }));
    }

    #[test]
    fn failures_suppress_the_finish_event() {
        let capture = Capture::default();
        {
            let mut scope = TraceScope::begin(Some(&capture), &probe(), RunShape::Async);
            let result: Result<(), &str> = Err("boom");
            let _ = scope.step(PipelineStage::Execute, result);
        }

        let events = capture.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        let TraceEvent::Failed { stage, message, .. } = &events[1] else {
            panic!("expected a failure event, got {:?}", events[1]);
        };
        assert_eq!(*stage, PipelineStage::Execute);
        assert_eq!(message, "boom");
    }

    #[test]
    fn every_event_carries_the_same_fingerprint() {
        let capture = Capture::default();
        {
            let scope = TraceScope::begin(Some(&capture), &probe(), RunShape::Stream);
            scope.stage(PipelineStage::PrepareRemote);
            scope.stage(PipelineStage::Execute);
        }

        let events = capture.events.lock().unwrap();
        let first = *events[0].fingerprint();
        assert!(events.iter().all(|event| *event.fingerprint() == first));
    }

    #[test]
    fn closures_are_sinks() {
        // a sink-less scope is inert
        let scope = TraceScope::begin(None, &probe(), RunShape::Sync);
        drop(scope);

        fn assert_sink(_: &dyn TraceSink) {}
        let closure = |_event: &TraceEvent| {};
        assert_sink(&closure);
    }
}
