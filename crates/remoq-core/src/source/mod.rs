pub mod memory;

pub use memory::MemorySource;

use crate::node::{Record, TypeName};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::{fmt, sync::Arc};
use thiserror::Error as ThisError;

///
/// Queryable sources
///
/// A source serves rows in the record transfer form. The pipeline binds
/// wire resource placeholders to handles obtained from a provider, keyed
/// by element type.
///

///
/// SourceError
///

#[derive(Debug, ThisError)]
pub enum SourceError {
    #[error("no queryable registered for element type {element}")]
    UnknownResource { element: String },

    #[error("source for {element} scan failed: {message}")]
    Scan { element: String, message: String },
}

///
/// Queryable
///

pub trait Queryable: Send + Sync {
    fn element(&self) -> TypeName;

    /// Iterate the source's rows in storage order.
    fn scan(&self) -> Result<RowIter, SourceError>;
}

pub type RowIter = Box<dyn Iterator<Item = Result<Record, SourceError>> + Send>;

///
/// AsyncQueryable
///

#[async_trait]
pub trait AsyncQueryable: Send + Sync {
    fn element(&self) -> TypeName;

    async fn scan(&self) -> Result<RowStream, SourceError>;
}

pub type RowStream = BoxStream<'static, Result<Record, SourceError>>;

///
/// SourceHandle
///
/// Cheap cloneable handle to a live source. Identity is pointer identity:
/// two handles are the same source only when they share the allocation.
///

#[derive(Clone)]
pub enum SourceHandle {
    Sync(Arc<dyn Queryable>),
    Async(Arc<dyn AsyncQueryable>),
}

impl SourceHandle {
    #[must_use]
    pub fn element(&self) -> TypeName {
        match self {
            Self::Sync(q) => q.element(),
            Self::Async(q) => q.element(),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Sync(a), Self::Sync(b)) => Arc::ptr_eq(a, b),
            (Self::Async(a), Self::Async(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub const fn as_sync(&self) -> Option<&Arc<dyn Queryable>> {
        if let Self::Sync(q) = self { Some(q) } else { None }
    }

    #[must_use]
    pub const fn as_async(&self) -> Option<&Arc<dyn AsyncQueryable>> {
        if let Self::Async(q) = self { Some(q) } else { None }
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync(q) => write!(f, "SourceHandle::Sync<{}>", q.element()),
            Self::Async(q) => write!(f, "SourceHandle::Async<{}>", q.element()),
        }
    }
}

impl PartialEq for SourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

///
/// ResourceProvider
///
/// Caller-supplied element-type -> queryable mapping, consulted during
/// pipeline prepare. Closures implement it directly.
///

pub trait ResourceProvider: Send + Sync {
    fn provide(&self, element: &TypeName) -> Option<SourceHandle>;
}

impl<F> ResourceProvider for F
where
    F: Fn(&TypeName) -> Option<SourceHandle> + Send + Sync,
{
    fn provide(&self, element: &TypeName) -> Option<SourceHandle> {
        self(element)
    }
}

///
/// SourceBindings
///
/// Resource placeholders resolved to live handles for one pipeline run,
/// keyed by element type. Built while preparing the remote expression and
/// consumed when the native tree is rebuilt.
///

#[derive(Clone, Debug, Default)]
pub struct SourceBindings {
    entries: Vec<(TypeName, SourceHandle)>,
}

impl SourceBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an element type to a handle; later bindings for the same
    /// element shadow earlier ones.
    pub fn bind(&mut self, element: TypeName, handle: SourceHandle) {
        self.entries.push((element, handle));
    }

    #[must_use]
    pub fn lookup(&self, element: &TypeName) -> Option<&SourceHandle> {
        self.entries
            .iter()
            .rev()
            .find_map(|(name, handle)| (name == element).then_some(handle))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

///
/// SourceRegistry
///
/// Provider backed by an explicit handle list.
///

#[derive(Clone, Default)]
pub struct SourceRegistry {
    handles: Vec<SourceHandle>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, handle: SourceHandle) -> Self {
        self.handles.push(handle);
        self
    }

    pub fn add(&mut self, handle: SourceHandle) {
        self.handles.push(handle);
    }
}

impl ResourceProvider for SourceRegistry {
    fn provide(&self, element: &TypeName) -> Option<SourceHandle> {
        self.handles
            .iter()
            .find(|handle| &handle.element() == element)
            .cloned()
    }
}
