use crate::{
    expr::Expr,
    node::{self as wire},
    source::SourceBindings,
    trace::TraceSink,
};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

///
/// ExecutionContext
///
/// Per-run state threaded through every stage. Records the expression as
/// it looked on each side of the translation boundary, holds the source
/// bindings built during remote prepare, and carries typed extension
/// slots so custom stages can hand state to one another without the
/// pipeline knowing about it.
///

#[derive(Default)]
pub struct ExecutionContext {
    remote: Option<wire::Expr>,
    native: Option<Expr>,
    bindings: SourceBindings,
    trace: Option<Arc<dyn TraceSink>>,
    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_trace(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    ///
    /// EXPRESSION SLOTS
    ///

    /// The canonicalized wire tree, recorded after remote prepare.
    #[must_use]
    pub const fn remote(&self) -> Option<&wire::Expr> {
        self.remote.as_ref()
    }

    /// The folded native tree, recorded after native prepare.
    #[must_use]
    pub const fn native(&self) -> Option<&Expr> {
        self.native.as_ref()
    }

    pub fn set_remote(&mut self, expr: wire::Expr) {
        self.remote = Some(expr);
    }

    pub fn set_native(&mut self, expr: Expr) {
        self.native = Some(expr);
    }

    ///
    /// SOURCE BINDINGS
    ///

    #[must_use]
    pub const fn bindings(&self) -> &SourceBindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut SourceBindings {
        &mut self.bindings
    }

    ///
    /// TRACING
    ///

    #[must_use]
    pub fn trace(&self) -> Option<&dyn TraceSink> {
        self.trace.as_deref()
    }

    /// Owned handle to the sink, for scopes that must outlive a shared
    /// borrow of the context.
    #[must_use]
    pub fn trace_handle(&self) -> Option<Arc<dyn TraceSink>> {
        self.trace.clone()
    }

    ///
    /// EXTENSIONS
    ///

    /// Store one value per type. A later value of the same type replaces
    /// the earlier one.
    pub fn set_extension<T: Any + Send + Sync>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    #[must_use]
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref())
    }

    pub fn extension_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.extensions
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut())
    }

    pub fn take_extension<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.extensions
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast().ok())
            .map(|boxed| *boxed)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("remote", &self.remote.is_some())
            .field("native", &self.native.is_some())
            .field("bindings", &self.bindings.len())
            .field("trace", &self.trace.is_some())
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
