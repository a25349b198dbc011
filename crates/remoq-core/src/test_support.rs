//! Shared fixtures for the crate's test suites: a registered element
//! type, canned rows, and sources over them in both flavors.

use crate::{
    model::{Described, RegistryResolver, TypeModel, TypeRegistry},
    node::{Record, TypeName},
    source::{MemorySource, SourceHandle},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Person {
    pub(crate) name: String,
    pub(crate) age: i64,
}

impl Described for Person {
    const PATH: &'static str = "people::Person";
}

pub(crate) fn person_ty() -> TypeName {
    TypeName::new(Person::PATH)
}

pub(crate) fn person_resolver() -> RegistryResolver {
    let mut reg = TypeRegistry::new();
    reg.register(TypeModel::new(
        person_ty(),
        vec!["name".into(), "age".into()],
    ))
    .unwrap();
    RegistryResolver::new(Arc::new(reg))
}

pub(crate) fn person_row(name: &str, age: i64) -> Record {
    Record::new(person_ty())
        .with("name", Value::Text(name.into()).into())
        .with("age", Value::Int(age).into())
}

/// Ada 25, Bea 31, Cal 35, Dan 40.
pub(crate) fn people_rows() -> Vec<Record> {
    vec![
        person_row("Ada", 25),
        person_row("Bea", 31),
        person_row("Cal", 35),
        person_row("Dan", 40),
    ]
}

pub(crate) fn people_source() -> SourceHandle {
    MemorySource::<Person>::from_rows(person_ty(), people_rows()).into_handle()
}

pub(crate) fn people_source_async() -> SourceHandle {
    MemorySource::<Person>::from_rows(person_ty(), people_rows()).into_async_handle()
}

/// Age of a row fixture, for assertions.
pub(crate) fn row_age(record: &Record) -> i64 {
    use crate::node::ArgValue;

    let Some(ArgValue::Scalar(Value::Int(age))) = record.get("age") else {
        panic!("fixture row without an age field: {record:?}");
    };
    *age
}
