//! End-to-end runs through the facade surface, with every exchange
//! crossing a JSON hop the way a deployed client and server would.

use remoq::core::{
    exec::{self, DefaultStages, ExecError, ResultItem, run_stream},
    expr::{Evaluator, Item},
    model::{RegistryResolver, SerdeMapper, TypeModel, from_record},
    node as wire,
    query::{QueryDescriptor, QueryError},
    source::{MemorySource, SourceBindings},
    translate::to_wire,
};
use remoq::prelude::*;
use serde::de::DeserializeOwned;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Track {
    title: String,
    plays: i64,
}

impl Described for Track {
    const PATH: &'static str = "library::Track";
}

fn catalog() -> Vec<Track> {
    vec![
        Track {
            title: "Aurora".into(),
            plays: 120,
        },
        Track {
            title: "Borealis".into(),
            plays: 4_500,
        },
        Track {
            title: "Cascade".into(),
            plays: 980,
        },
        Track {
            title: "Drift".into(),
            plays: 7_200,
        },
    ]
}

fn catalog_source() -> SourceHandle {
    MemorySource::new(&catalog()).unwrap().into_handle()
}

fn catalog_source_async() -> SourceHandle {
    MemorySource::new(&catalog()).unwrap().into_async_handle()
}

fn library_resolver() -> RegistryResolver {
    let mut reg = TypeRegistry::new();
    reg.register(TypeModel::new(
        Track::type_name(),
        vec!["title".into(), "plays".into()],
    ))
    .unwrap();
    RegistryResolver::new(Arc::new(reg))
}

/// Serialize and deserialize through JSON, as transport would.
fn over_json<T: Serialize + DeserializeOwned>(value: &T) -> Result<T, ExecError> {
    let json = serde_json::to_string(value).map_err(|err| ExecError::Remote {
        message: err.to_string(),
    })?;
    serde_json::from_str(&json).map_err(|err| ExecError::Remote {
        message: err.to_string(),
    })
}

fn serve(expr: &wire::Expr) -> Result<QueryResult, ExecError> {
    let request: wire::Expr = over_json(expr)?;

    let resolver = library_resolver();
    let provider = SourceRegistry::new().with(catalog_source());
    let stages = DefaultStages::new(&resolver, &provider);
    let result = exec::run(&stages, &mut ExecutionContext::new(), request)?;

    over_json(&result)
}

fn tracks() -> RemoteQueryable<Track> {
    RemoteQueryable::new(Arc::new(serve))
}

#[test]
fn filtered_chains_survive_the_transport_hop() {
    let popular: Vec<Track> = tracks()
        .filter(|t| t.field("plays").gt(lit(1_000i64)))
        .order_by(|t| t.field("title"))
        .to_vec()
        .unwrap();

    let titles: Vec<&str> = popular.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Borealis", "Drift"]);
}

#[test]
fn projections_and_terminals_cross_intact() {
    let plays: Vec<i64> = tracks().select(|t| t.field("plays")).to_vec().unwrap();
    assert_eq!(plays, vec![120, 4_500, 980, 7_200]);

    assert_eq!(tracks().count().unwrap(), 4);

    let quiet: Track = tracks()
        .filter(|t| t.field("plays").lt(lit(500i64)))
        .single()
        .unwrap();
    assert_eq!(quiet.title, "Aurora");
}

#[test]
fn empty_sentinels_keep_their_meaning_across_the_hop() {
    let missing = tracks().filter(|t| t.field("plays").gt(lit(1_000_000i64)));

    let none: Vec<Track> = missing.to_vec().unwrap();
    assert!(none.is_empty());
    assert!(matches!(missing.first(), Err(ExecError::NoElements)));
    assert!(missing.first_or_default().unwrap().is_none());
}

fn runner_err(err: impl std::fmt::Display) -> QueryError {
    QueryError::Runner {
        message: err.to_string(),
    }
}

fn run_catalog(descriptor: &QueryDescriptor) -> Result<Vec<Track>, QueryError> {
    let json = serde_json::to_string(descriptor).map_err(runner_err)?;
    let request: QueryDescriptor = serde_json::from_str(&json).map_err(runner_err)?;

    let mut bindings = SourceBindings::new();
    bindings.bind(Track::type_name(), catalog_source());
    let chain = request.to_expr(&library_resolver(), &bindings)?;

    let mut evaluator = Evaluator::new();
    let value = evaluator.eval(&chain).map_err(runner_err)?;
    let items = evaluator
        .materialize(value, "catalog runner")
        .map_err(runner_err)?;

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Item::Row(row) = item else {
            return Err(runner_err("catalog queries produce rows"));
        };
        out.push(from_record(&SerdeMapper, &row).map_err(runner_err)?);
    }
    Ok(out)
}

#[test]
fn descriptor_queries_meet_the_same_rows() {
    let top: Vec<Track> = Query::<Track>::new()
        .filter(lambda("t", |t| t.field("plays").gt(lit(500i64))))
        .unwrap()
        .order_by_desc(lambda("t", |t| t.field("plays")))
        .unwrap()
        .take(2)
        .with_runner(Arc::new(run_catalog))
        .execute()
        .unwrap();

    let titles: Vec<&str> = top.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Drift", "Borealis"]);
}

#[test]
fn unconstrained_descriptors_run_too() {
    let all = Query::<Track>::new()
        .with_runner(Arc::new(run_catalog))
        .execute()
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn streams_serve_the_same_catalog() {
    use futures::TryStreamExt;
    use tokio_util::sync::CancellationToken;

    let resolver = library_resolver();
    let provider = SourceRegistry::new().with(catalog_source_async());
    let stages = DefaultStages::new(&resolver, &provider);
    let mut ctx = ExecutionContext::new();

    let native = Expr::call_query(
        QueryOp::Where,
        Expr::resource(Track::type_name()),
        Some(vec![lambda("t", |t| t.field("plays").gt(lit(500i64)))]),
    );
    let request = to_wire(native).unwrap();

    let stream = run_stream(&stages, &mut ctx, request, CancellationToken::new())
        .await
        .unwrap();
    let items: Vec<ResultItem> = stream.try_collect().await.unwrap();

    let titles: Vec<String> = items
        .into_iter()
        .map(|item| {
            let ResultItem::Row(row) = item else {
                panic!("expected rows, got {item:?}");
            };
            let track: Track = from_record(&SerdeMapper, &row).unwrap();
            track.title
        })
        .collect();
    assert_eq!(titles, vec!["Borealis", "Cascade", "Drift"]);
}
