use crate::{
    model::{Described, MapError, SerdeMapper, to_record},
    node::{Record, TypeName},
    source::{AsyncQueryable, Queryable, RowIter, RowStream, SourceError, SourceHandle},
};
use async_trait::async_trait;
use futures::stream;
use serde::Serialize;
use std::{marker::PhantomData, sync::Arc};

///
/// MemorySource
///
/// Rows held in memory, served through both queryable traits. The standard
/// source for server fixtures and tests; production hosts implement
/// `Queryable` over their own storage.
///

pub struct MemorySource<T> {
    element: TypeName,
    rows: Vec<Record>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> MemorySource<T>
where
    T: Described + Serialize,
{
    pub fn new(items: &[T]) -> Result<Self, MapError> {
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            rows.push(to_record(&SerdeMapper, item)?);
        }

        Ok(Self {
            element: T::type_name(),
            rows,
            _marker: PhantomData,
        })
    }
}

impl<T> MemorySource<T> {
    #[must_use]
    pub fn from_rows(element: TypeName, rows: Vec<Record>) -> Self {
        Self {
            element,
            rows,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn into_handle(self) -> SourceHandle
    where
        T: 'static,
    {
        SourceHandle::Sync(Arc::new(self))
    }

    #[must_use]
    pub fn into_async_handle(self) -> SourceHandle
    where
        T: 'static,
    {
        SourceHandle::Async(Arc::new(self))
    }
}

impl<T> Queryable for MemorySource<T> {
    fn element(&self) -> TypeName {
        self.element.clone()
    }

    fn scan(&self) -> Result<RowIter, SourceError> {
        let rows = self.rows.clone();
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

#[async_trait]
impl<T> AsyncQueryable for MemorySource<T> {
    fn element(&self) -> TypeName {
        self.element.clone()
    }

    async fn scan(&self) -> Result<RowStream, SourceError> {
        let rows = self.rows.clone();
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[derive(Serialize)]
    struct Person {
        name: String,
        age: i64,
    }

    impl Described for Person {
        const PATH: &'static str = "people::Person";
    }

    fn people() -> Vec<Person> {
        vec![
            Person {
                name: "Alice".into(),
                age: 35,
            },
            Person {
                name: "Bob".into(),
                age: 28,
            },
        ]
    }

    #[test]
    fn scan_yields_rows_in_order() {
        let source = MemorySource::new(&people()).unwrap();
        let rows: Vec<_> = Queryable::scan(&source).unwrap().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").unwrap().to_string(), "\"Alice\"");
    }

    #[tokio::test]
    async fn async_scan_matches_sync_scan() {
        let source = MemorySource::new(&people()).unwrap();
        let sync_rows: Vec<_> = Queryable::scan(&source).unwrap().map(Result::unwrap).collect();

        let mut stream = AsyncQueryable::scan(&source).await.unwrap();
        let mut async_rows = Vec::new();
        while let Some(row) = stream.next().await {
            async_rows.push(row.unwrap());
        }

        assert_eq!(sync_rows, async_rows);
    }

    #[test]
    fn handles_share_identity_only_with_themselves() {
        let a = MemorySource::new(&people()).unwrap().into_handle();
        let b = MemorySource::new(&people()).unwrap().into_handle();
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
    }
}
