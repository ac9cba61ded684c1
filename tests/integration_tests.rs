use serde_json::{Value, json};
use tempora::{
    Engine, ErrorCode, PushStatus, Query, QueryArgs, QueryStatus, Record, RunState, StoreArgs,
    TemporaError,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn engine_with(rows: &[(i64, Value)], period_secs: u64, limit: usize) -> Engine {
    init_logging();
    let mut engine = Engine::new();
    for (ts, values) in rows {
        engine
            .store(
                "store",
                record(values.clone()),
                StoreArgs::default()
                    .timestamp(*ts)
                    .period_secs(period_secs)
                    .limit(limit),
                *ts,
            )
            .unwrap();
    }
    engine
}

fn run(engine: &mut Engine, site: &str, query: Value, now: i64) -> Record {
    let query = Query::from_value(query).unwrap();
    engine
        .query(site, "store", &query, QueryArgs::default(), now)
        .unwrap();
    engine.result(site).unwrap().values.clone()
}

fn number(values: &Record, field: &str) -> f64 {
    values[field].as_f64().unwrap()
}

#[test]
fn test_aggregation_examples() {
    let mut engine = engine_with(
        &[(0, json!({"temp": 10})), (1000, json!({"temp": 20}))],
        60,
        10,
    );

    let expected = [
        ("avg", json!(15)),
        ("sum", json!(30)),
        ("max", json!(20)),
        ("count", json!(2)),
    ];
    for (method, expected) in expected {
        let values = run(
            &mut engine,
            method,
            json!({"select": "temp", "aggregate": method}),
            2000,
        );
        assert_eq!(values["temp"], expected, "method {}", method);
    }
}

#[test]
fn test_fractional_results_stay_fractional() {
    let mut engine = engine_with(&[(0, json!({"t": 10})), (1, json!({"t": 25}))], 60, 10);
    let values = run(&mut engine, "q", json!({"select": "t", "aggregate": "avg"}), 2);
    assert_eq!(values["t"], json!(17.5));
}

#[test]
fn test_field_selected_twice_keeps_last_slot() {
    let mut engine = engine_with(&[(0, json!({"x": 2})), (1, json!({"x": 4}))], 60, 10);
    let values = run(
        &mut engine,
        "twice",
        json!({"select": ["x", "x"], "aggregate": ["avg", "sum"]}),
        2,
    );
    let sum_only = run(&mut engine, "once", json!({"select": "x", "aggregate": "sum"}), 2);
    assert_eq!(values["x"], json!(6));
    assert_eq!(values, sum_only);
}

#[test]
fn test_periodic_query_before_epoch() {
    let mut engine = engine_with(
        &[(-90_000, json!({"x": 100})), (-4_000, json!({"x": 1}))],
        600,
        10,
    );
    let query = Query::new(["x"]).aggregate(["sum"]);
    engine
        .query("q", "store", &query, QueryArgs::default().interval_secs(5), -1_000)
        .unwrap();
    assert_eq!(engine.result("q").unwrap().values["x"], json!(1));
}

#[test]
fn test_deeply_nested_where_clause_is_rejected() {
    let mut engine = engine_with(&[(0, json!({"x": 5}))], 60, 10);
    let clause = format!("{}x > 1{}", "(".repeat(600), ")".repeat(600));
    let err = engine
        .call_query("q", &[json!("store"), json!({"select": "x", "where": clause})], 1)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Value);
    assert!(engine.query_store("q").is_none());
}

#[test]
fn test_wildcard_example() {
    let mut engine = engine_with(
        &[(0, json!({"a": 1, "b": 2})), (1, json!({"a": 3, "c": 4}))],
        60,
        10,
    );
    let values = run(&mut engine, "q", json!({"select": "*", "aggregate": "sum"}), 2);
    assert_eq!(values.len(), 3);
    assert_eq!(number(&values, "a"), 4.0);
    assert_eq!(number(&values, "b"), 2.0);
    assert_eq!(number(&values, "c"), 4.0);
}

#[test]
fn test_where_clause_example() {
    let mut engine = engine_with(&[(0, json!({"x": 5})), (1, json!({"x": 15}))], 60, 10);
    let values = run(
        &mut engine,
        "q",
        json!({"select": "x", "aggregate": "sum", "where": "x>10"}),
        2,
    );
    assert_eq!(number(&values, "x"), 15.0);
}

#[test]
fn test_where_clause_with_word_connectives() {
    let mut engine = engine_with(
        &[
            (0, json!({"x": 5, "site": "north AND south"})),
            (1, json!({"x": 15, "site": "north"})),
            (2, json!({"x": 25, "site": "east"})),
        ],
        60,
        10,
    );
    let values = run(
        &mut engine,
        "q",
        json!({
            "select": ["x"],
            "aggregate": ["count"],
            "where": r#"site = "north AND south" OR x > 20"#
        }),
        3,
    );
    assert_eq!(values["x"], json!(2));
}

#[test]
fn test_store_ordering_and_bounds() {
    init_logging();
    let mut engine = Engine::new();
    let arrivals = [9_000, 1_000, 4_000, 4_000, 12_000, 2_000, 30_000, 29_500, 100, 31_000];

    for ts in arrivals {
        engine
            .store(
                "store",
                record(json!({"ts": ts})),
                StoreArgs::default().timestamp(ts).period_secs(10).limit(4),
                ts,
            )
            .unwrap();
        let store = engine.time_store("store").unwrap();
        let timestamps = store.timestamps();
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
        assert!(store.len() <= 4);
        assert!(store.span_ms() <= 10_000);
    }
}

#[test]
fn test_eviction_signal() {
    init_logging();
    let mut engine = Engine::new();
    let args = StoreArgs::default().limit(2);
    assert_eq!(
        engine.store("store", record(json!({"a": 1})), args, 0).unwrap(),
        PushStatus::Stored
    );
    assert_eq!(
        engine.store("store", record(json!({"a": 2})), args, 1).unwrap(),
        PushStatus::Stored
    );
    assert_eq!(
        engine.store("store", record(json!({"a": 3})), args, 2).unwrap(),
        PushStatus::Limit
    );
}

#[test]
fn test_query_identity_reuse() {
    let mut engine = engine_with(&[(0, json!({"x": 1})), (5, json!({"x": 2}))], 60, 10);
    let query = Query::new(["x"]).aggregate(["avg"]);
    let args = QueryArgs::default().limit(5);

    engine.query("q", "store", &query, args.clone(), 10).unwrap();
    let first = engine.result("q").unwrap().clone();
    let first_ptr = engine.query_store("q").unwrap() as *const _;

    engine.query("q", "store", &query, args.clone(), 10).unwrap();
    let second = engine.result("q").unwrap().clone();

    assert_eq!(first, second);
    assert_eq!(engine.query_store("q").unwrap().len(), 2);
    assert_eq!(engine.query_store("q").unwrap() as *const _, first_ptr);
}

#[test]
fn test_query_status_progression() {
    let mut engine = engine_with(&[(0, json!({"x": 1}))], 60, 10);
    let query = Query::new(["x"]).aggregate(["sum"]);
    let args = QueryArgs::default().limit(2);

    assert!(matches!(engine.result("q"), Err(TemporaError::NotAvailable)));
    assert_eq!(
        engine.query("q", "store", &query, args.clone(), 1).unwrap(),
        QueryStatus::Ok
    );
    assert_eq!(
        engine.query("q", "store", &query, args.clone(), 2).unwrap(),
        QueryStatus::Limit
    );
    assert_eq!(
        engine.query("q", "store", &query, args, 3).unwrap(),
        QueryStatus::Limit
    );
    let table = engine.table("q").unwrap();
    assert_eq!(table.columns, vec!["time", "x"]);
    assert_eq!(table.column("time").unwrap(), vec![&json!(2), &json!(3)]);
}

#[test]
fn test_periodic_query_schedule_and_window() {
    let mut engine = engine_with(&[(0, json!({"x": 1})), (1_000, json!({"x": 2}))], 60, 10);
    let query = Query::new(["x"]).aggregate(["sum"]);
    let args = QueryArgs::default().interval_secs(10);

    engine.query("q", "store", &query, args.clone(), 1_000).unwrap();
    engine.query("q", "store", &query, args.clone(), 5_000).unwrap();
    assert_eq!(engine.query_store("q").unwrap().len(), 1);
    engine.query("q", "store", &query, args, 11_000).unwrap();
    assert_eq!(engine.query_store("q").unwrap().len(), 2);

    let results = engine.query_store("q").unwrap().results();
    assert_eq!(results[0].values["x"], json!(3));
    // window is [1_000, 11_000]
    assert_eq!(results[1].values["x"], json!(2));
}

#[test]
fn test_reset_on_restart() {
    let mut engine = engine_with(&[(0, json!({"x": 1}))], 60, 10);
    engine
        .query("q", "store", &Query::new(["x"]), QueryArgs::default(), 1)
        .unwrap();
    engine.on_transition(RunState::Stopped, RunState::Running);

    assert!(engine.time_store("store").unwrap().is_empty());
    assert!(engine.query_store("q").unwrap().is_empty());

    assert!(matches!(engine.result("q"), Err(TemporaError::NotAvailable)));

    let status = engine
        .query("q", "store", &Query::new(["x"]), QueryArgs::default(), 2)
        .unwrap();
    assert_eq!(status, QueryStatus::Ok);
    assert!(engine.result("q").unwrap().values.is_empty());
}

#[test]
fn test_rejected_calls_do_not_mutate() {
    let mut engine = engine_with(&[(0, json!({"x": 1}))], 60, 10);
    engine
        .call_query("q", &[json!("store"), json!({"select": "x", "aggregate": "sum"})], 1)
        .unwrap();

    let bad_calls = [
        vec![json!("missing"), json!({"select": "x"})],
        vec![json!("store"), json!({"aggregate": "sum"})],
        vec![json!("store"), json!({"select": "x", "aggregate": "mean"})],
        vec![json!("store"), json!({"select": "x"}), json!("soon")],
        vec![json!("store"), json!({"select": "x"}), json!(-1), json!(3)],
        vec![json!("store"), json!({"select": "x", "where": "x >>"})],
    ];
    for args in &bad_calls {
        let err = engine.call_query("q", args, 2).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Value, "args {:?}", args);
    }
    let err = engine
        .call_query("q", &vec![json!("store"); 6], 2)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Args);

    let qs = engine.query_store("q").unwrap();
    assert_eq!(qs.len(), 1);
    assert_eq!(qs.latest().unwrap().values["x"], json!(1));
    assert_eq!(engine.time_store("store").unwrap().len(), 1);
}
