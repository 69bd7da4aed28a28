use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use supersequel::helpers::standard;
use supersequel::query::{Batch, Definition, QueryId, QueryRequest, QueryResult, User};
use supersequel::{Supersequel, SupersequelError};

/// Storage that sleeps for `statement` milliseconds when it is a number, records
/// completion order, and answers with the statement itself.
fn engine(completed: Arc<Mutex<Vec<String>>>, released: Arc<AtomicUsize>) -> Supersequel {
    Supersequel::builder()
        .helpers(standard("_"))
        .release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        })
        .query(move |statement: String| {
            let completed = Arc::clone(&completed);
            async move {
                if statement == "fail" {
                    return Err("backend rejected statement".to_string());
                }
                if let Ok(ms) = statement.parse::<u64>() {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                completed.lock().unwrap().push(statement.clone());
                Ok(statement)
            }
        })
        .build()
        .expect("engine")
}

fn setup() -> (Supersequel, Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
    let completed = Arc::new(Mutex::new(Vec::new()));
    let released = Arc::new(AtomicUsize::new(0));
    (engine(Arc::clone(&completed), Arc::clone(&released)), completed, released)
}

fn user() -> User {
    User::new(123, ["user"])
}

fn timed_definitions() -> Vec<Definition> {
    vec![
        Definition::new("immediate", "0", ["user"]),
        Definition::new("short", "100", ["user"]),
        Definition::new("long", "200", ["user"]),
    ]
}

fn result(id: &str, name: &str, results: &str) -> QueryResult {
    QueryResult { id: Some(QueryId::from(id)), name: name.to_string(), results: results.to_string() }
}

#[tokio::test]
async fn output_keeps_submission_order() {
    let (engine, completed, _) = setup();
    let started = Instant::now();
    let response = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("long").id("1").sync(),
                QueryRequest::new("long").id("2"),
                QueryRequest::new("short").id("3"),
                QueryRequest::new("immediate").id("4").sync(),
            ],
            definitions: timed_definitions(),
        })
        .await
        .expect("batch ok");
    let elapsed = started.elapsed();
    assert_eq!(
        response.queries,
        vec![
            result("1", "long", "200"),
            result("2", "long", "200"),
            result("3", "short", "100"),
            result("4", "immediate", "0"),
        ]
    );
    // the async requests overlap the sync pipeline instead of queueing behind it
    assert!(elapsed < Duration::from_millis(390), "took {elapsed:?}");
    let completed = completed.lock().unwrap().clone();
    assert_eq!(completed[0], "100", "short async request finishes first");
    let immediate = completed.iter().position(|s| s == "0").unwrap();
    let first_long = completed.iter().position(|s| s == "200").unwrap();
    assert!(first_long < immediate, "sync requests complete in submission order: {completed:?}");
}

#[tokio::test]
async fn sync_requests_see_earlier_history() {
    let (engine, _, _) = setup();
    let response = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("thing.one").id("one").sync(),
                QueryRequest::new("thing.two").id("two").sync(),
            ],
            definitions: vec![
                Definition::new("thing.one", "thing.one", ["user"]),
                Definition::new("thing.two", "thing.two is bigger than {{$history.one}}", ["user"]),
            ],
        })
        .await
        .expect("batch ok");
    assert_eq!(
        response.queries,
        vec![
            result("one", "thing.one", "thing.one"),
            result("two", "thing.two", "thing.two is bigger than 'thing.one'"),
        ]
    );
}

#[tokio::test]
async fn async_history_readers_wait_for_writers() {
    let (engine, _, _) = setup();
    let response = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("slow").id("w").sync(),
                QueryRequest::new("reader").id("r"),
            ],
            definitions: vec![
                Definition::new("slow", "50", ["user"]),
                Definition::new("reader", "after {{$history.w}}", ["user"]),
            ],
        })
        .await
        .expect("batch ok");
    assert_eq!(response.queries[0].results, "50");
    assert_eq!(response.queries[1].results, "after '50'");
}

#[tokio::test]
async fn readers_never_see_later_requests() {
    let (engine, _, _) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("reader").id("r"),
                QueryRequest::new("writer").id("w").sync(),
            ],
            definitions: vec![
                Definition::new("writer", "written", ["user"]),
                Definition::new("reader", "saw {{$history.w}}", ["user"]),
            ],
        })
        .await
        .unwrap_err();
    match &err {
        SupersequelError::Request { index, .. } => assert_eq!(*index, 0, "the earlier reader fails"),
        other => panic!("expected a request failure, got {other:?}"),
    }
    assert!(matches!(err.kind(), SupersequelError::MissingHistoryReference { id } if id == "w"));
}

#[tokio::test]
async fn sync_readers_ignore_later_async_writers() {
    let (engine, completed, _) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("slow").id("s").sync(),
                QueryRequest::new("reader").id("r").sync(),
                QueryRequest::new("fast").id("f"),
            ],
            definitions: vec![
                Definition::new("slow", "50", ["user"]),
                Definition::new("fast", "fast", ["user"]),
                Definition::new("reader", "saw {{$history.f}}", ["user"]),
            ],
        })
        .await
        .unwrap_err();
    assert_eq!(completed.lock().unwrap().first().map(String::as_str), Some("fast"), "async writer finished first");
    match &err {
        SupersequelError::Request { index, .. } => assert_eq!(*index, 1),
        other => panic!("expected a request failure, got {other:?}"),
    }
    assert!(matches!(err.kind(), SupersequelError::MissingHistoryReference { id } if id == "f"));
}

#[tokio::test]
async fn requests_cannot_read_their_own_history() {
    let (engine, _, _) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![QueryRequest::new("reader").id("r").sync()],
            definitions: vec![Definition::new("reader", "saw {{$history.r}}", ["user"])],
        })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), SupersequelError::MissingHistoryReference { id } if id == "r"));
}

#[tokio::test]
async fn missing_history_reference_fails_the_batch() {
    let (engine, _, _) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![QueryRequest::new("reader").id("r").sync()],
            definitions: vec![Definition::new("reader", "after {{$history.nobody}}", ["user"])],
        })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), SupersequelError::MissingHistoryReference { id } if id == "nobody"));
}

#[tokio::test]
async fn nested_helpers() {
    let (engine, _, _) = setup();
    let statement = [
        "UPDATE users SET ",
        "{{#_trim \", \"}}",
        "{{#each fields}}",
        "{{#unless (_eq @key \"id\")}}",
        "{{: @key}}={{#if (_isString this)}}{{_trim this}}, {{else}}{{this}}, {{/if}}",
        "{{/unless}}",
        "{{/each}}",
        "{{/_trim}}",
    ]
    .join("");
    let response = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("nested")
                    .id("1")
                    .property("fields", json!({"id": 1, "column1": 3, "column2": "  hello  "})),
            ],
            definitions: vec![Definition::new("nested", statement, ["user"])],
        })
        .await
        .expect("batch ok");
    assert_eq!(
        response.queries,
        vec![result("1", "nested", "UPDATE users SET `column1`=3, `column2`='hello'")]
    );
}

#[tokio::test]
async fn unauthorized_requests_never_compile() {
    let (engine, completed, released) = setup();
    let err = engine
        .execute(Batch {
            user: User::new(1, ["user"]),
            queries: vec![QueryRequest::new("admin.only")],
            // this template would not compile; the access check must reject it first
            definitions: vec![Definition::new("admin.only", "{{_nope x}}", ["user", "admin"])],
        })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), SupersequelError::Unauthorized { .. }), "{err}");
    assert!(completed.lock().unwrap().is_empty());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_access_is_always_allowed() {
    let (engine, _, _) = setup();
    let response = engine
        .execute(Batch {
            user: User::default(),
            queries: vec![QueryRequest::new("public")],
            definitions: vec![Definition::new("public", "SELECT 1", Vec::<String>::new())],
        })
        .await
        .expect("batch ok");
    assert_eq!(response.queries[0].results, "SELECT 1");
    assert_eq!(response.queries[0].id, None);
}

#[tokio::test]
async fn unknown_definition_identifies_the_request() {
    let (engine, _, _) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![QueryRequest::new("long").id("a"), QueryRequest::new("nope").id("b")],
            definitions: timed_definitions(),
        })
        .await
        .unwrap_err();
    match err {
        SupersequelError::Request { index, id, name, source } => {
            assert_eq!(index, 1);
            assert_eq!(id, Some(QueryId::from("b")));
            assert_eq!(name, "nope");
            assert!(matches!(*source, SupersequelError::DefinitionNotFound { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn failures_do_not_abort_siblings() {
    let (engine, completed, released) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![
                QueryRequest::new("broken").id("x").sync(),
                QueryRequest::new("short").id("y").sync(),
                QueryRequest::new("immediate").id("z"),
            ],
            definitions: vec![
                Definition::new("broken", "fail", ["user"]),
                Definition::new("short", "100", ["user"]),
                Definition::new("immediate", "0", ["user"]),
            ],
        })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), SupersequelError::Storage(_)));
    assert_eq!(err.code(), "storage_error");
    let mut completed = completed.lock().unwrap().clone();
    completed.sort();
    assert_eq!(completed, vec!["0".to_string(), "100".to_string()]);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_ids_are_rejected_before_running() {
    let (engine, completed, _) = setup();
    let err = engine
        .execute(Batch {
            user: user(),
            queries: vec![QueryRequest::new("immediate").id("1"), QueryRequest::new("immediate").id("1")],
            definitions: timed_definitions(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), SupersequelError::DuplicateQueryId { .. }));
    assert!(completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn release_runs_once_per_batch() {
    let (engine, _, released) = setup();
    for _ in 0..3 {
        engine
            .execute(Batch {
                user: user(),
                queries: vec![QueryRequest::new("immediate")],
                definitions: timed_definitions(),
            })
            .await
            .expect("batch ok");
    }
    assert_eq!(released.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn templates_are_compiled_once() {
    let (engine, _, _) = setup();
    let registry = engine.registry(vec![Definition::new("q", "SELECT {{: c}}", ["user"])]);
    let first = registry.get_or_compile("q").unwrap();
    let again = engine.registry(vec![Definition::new("q", "SELECT {{: c}}", ["user"])]);
    assert!(Arc::ptr_eq(&first, &again.get_or_compile("q").unwrap()));
    let changed = engine.registry(vec![Definition::new("q", "SELECT {{c}}", ["user"])]);
    assert!(!Arc::ptr_eq(&first, &changed.get_or_compile("q").unwrap()));
}

#[test]
fn template_cache_is_bounded() {
    let engine = Supersequel::builder()
        .cache_capacity(2)
        .query(|s: String| async move { Ok::<_, String>(s) })
        .build()
        .expect("engine");
    let statements = ["SELECT 1", "SELECT 2", "SELECT 3"];
    let compiled: Vec<_> = statements
        .iter()
        .map(|statement| {
            let registry = engine.registry(vec![Definition::new("q", *statement, ["user"])]);
            registry.get_or_compile("q").unwrap()
        })
        .collect();
    let newest = engine.registry(vec![Definition::new("q", "SELECT 3", ["user"])]);
    assert!(Arc::ptr_eq(&compiled[2], &newest.get_or_compile("q").unwrap()), "newest stays cached");
    let oldest = engine.registry(vec![Definition::new("q", "SELECT 1", ["user"])]);
    assert!(!Arc::ptr_eq(&compiled[0], &oldest.get_or_compile("q").unwrap()), "oldest was evicted");
}

#[test]
fn builder_requires_storage() {
    let err = Supersequel::builder().build().unwrap_err();
    assert!(matches!(err, SupersequelError::Config(_)));
}

#[test]
fn builder_rejects_clashing_helpers() {
    let err = Supersequel::builder()
        .helpers(standard("_"))
        .helpers(standard("_"))
        .query(|s: String| async move { Ok::<_, String>(s) })
        .build()
        .unwrap_err();
    assert!(matches!(err, SupersequelError::Config(_)));
}
