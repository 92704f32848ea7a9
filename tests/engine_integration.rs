//! Integration tests for the query engine against real database files.
#![allow(
    clippy::panic,
    clippy::too_many_lines,
    clippy::float_cmp,
    clippy::uninlined_format_args
)]

use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tabserve::config::EngineConfig;
use tabserve::models::{
    AggregateFunction, AggregationSpec, FilterClause, FilterOperator, QueryRequest, SortOrder,
};
use tabserve::{Error, QueryEngine};

fn engine_over(dir: &Path) -> QueryEngine {
    QueryEngine::new(EngineConfig {
        data_dir: dir.to_path_buf(),
        ..EngineConfig::default()
    })
}

fn seed_employees(dir: &Path) {
    let conn = Connection::open(dir.join("employees.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE employees (id INTEGER, name TEXT, age INTEGER);
         INSERT INTO employees VALUES (1, 'Alice', 30), (2, 'Bob', 25), (3, 'Carol', 40);",
    )
    .unwrap();
}

fn clause(column: &str, operator: FilterOperator, value: serde_json::Value) -> FilterClause {
    FilterClause {
        column: column.to_string(),
        operator,
        value: Some(value),
        value2: None,
    }
}

#[test]
fn test_end_to_end_sort_and_pagination() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        sort_column: Some("age".to_string()),
        sort_order: Some(SortOrder::Desc),
        limit: 2,
        offset: 0,
        ..QueryRequest::for_table("employees")
    };
    let result = engine.execute("employees.db", &request).unwrap();

    assert_eq!(result.headers, vec!["id", "name", "age"]);
    assert_eq!(
        result.data,
        vec![
            vec![json!(3), json!("Carol"), json!(40)],
            vec![json!(1), json!("Alice"), json!(30)],
        ]
    );
    assert_eq!(result.total_count, 3);
    assert!(!result.cached);
}

#[test]
fn test_total_count_invariant_under_pagination() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let base = QueryRequest {
        filters: vec![clause("age", FilterOperator::Gte, json!(25))],
        ..QueryRequest::for_table("employees")
    };
    let mut totals = Vec::new();
    for (limit, offset) in [(1, 0), (2, 1), (100, 0)] {
        let request = QueryRequest {
            limit,
            offset,
            ..base.clone()
        };
        totals.push(engine.execute("employees.db", &request).unwrap().total_count);
    }
    assert_eq!(totals, vec![3, 3, 3]);
}

#[test]
fn test_repeat_request_hits_cache_with_identical_payload() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());
    let request = QueryRequest::for_table("employees");

    let first = engine.execute("employees.db", &request).unwrap();
    let second = engine.execute("employees.db", &request).unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.headers, second.headers);
    assert_eq!(first.data, second.data);
    assert_eq!(first.total_count, second.total_count);
}

#[test]
fn test_file_modification_invalidates_cache() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());
    let request = QueryRequest::for_table("employees");

    let first = engine.execute("employees.db", &request).unwrap();
    assert_eq!(first.total_count, 3);

    // Touch the file: append a row and push the mtime forward so coarse
    // filesystem timestamps cannot mask the change.
    let path = dir.path().join("employees.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute("INSERT INTO employees VALUES (4, 'Dave', 35)", [])
        .unwrap();
    drop(conn);
    let file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(2))
        .unwrap();

    let second = engine.execute("employees.db", &request).unwrap();
    assert!(!second.cached);
    assert_eq!(second.total_count, 4);
}

#[test]
fn test_between_is_inclusive_and_gt_lt_is_strict_subset() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let between = QueryRequest {
        filters: vec![FilterClause {
            column: "age".to_string(),
            operator: FilterOperator::Between,
            value: Some(json!(25)),
            value2: Some(json!(40)),
        }],
        ..QueryRequest::for_table("employees")
    };
    let inclusive = engine.execute("employees.db", &between).unwrap();
    assert_eq!(inclusive.total_count, 3);

    let strict = QueryRequest {
        filters: vec![
            clause("age", FilterOperator::Gt, json!(25)),
            clause("age", FilterOperator::Lt, json!(40)),
        ],
        ..QueryRequest::for_table("employees")
    };
    let exclusive = engine.execute("employees.db", &strict).unwrap();
    // Boundary rows (25 and 40) drop out.
    assert_eq!(exclusive.total_count, 1);
    assert_eq!(exclusive.data[0][1], json!("Alice"));
}

#[test]
fn test_empty_in_list_matches_everything() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        filters: vec![clause("age", FilterOperator::In, json!([]))],
        ..QueryRequest::for_table("employees")
    };
    let result = engine.execute("employees.db", &request).unwrap();
    assert_eq!(result.total_count, 3);
}

#[test]
fn test_distinct_count_and_wildcard_count() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open(dir.path().join("letters.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE letters (v TEXT);
         INSERT INTO letters VALUES ('a'), ('a'), ('b'), ('c');",
    )
    .unwrap();
    drop(conn);
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        aggregations: vec![
            AggregationSpec {
                column: "v".to_string(),
                function: AggregateFunction::DistinctCount,
                alias: None,
            },
            AggregationSpec {
                column: "*".to_string(),
                function: AggregateFunction::Count,
                alias: None,
            },
        ],
        ..QueryRequest::for_table("letters")
    };
    let result = engine.execute("letters.db", &request).unwrap();
    assert_eq!(result.headers, vec!["distinct_count_v", "count_star"]);
    assert_eq!(result.data, vec![vec![json!(3), json!(4)]]);
    assert_eq!(result.total_count, 1);
}

#[test]
fn test_group_by_aggregation_with_sort() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open(dir.path().join("sales.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE sales (region TEXT, amount INTEGER);
         INSERT INTO sales VALUES ('east', 10), ('east', 30), ('west', 5);",
    )
    .unwrap();
    drop(conn);
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        group_by: vec!["region".to_string()],
        aggregations: vec![AggregationSpec {
            column: "amount".to_string(),
            function: AggregateFunction::Sum,
            alias: None,
        }],
        sort_column: Some("sum_amount".to_string()),
        sort_order: Some(SortOrder::Desc),
        ..QueryRequest::for_table("sales")
    };
    let result = engine.execute("sales.db", &request).unwrap();
    assert_eq!(result.headers, vec!["region", "sum_amount"]);
    assert_eq!(
        result.data,
        vec![
            vec![json!("east"), json!(40)],
            vec![json!("west"), json!(5)],
        ]
    );
    assert_eq!(result.total_count, 2);
}

#[test]
fn test_full_text_search_matches_partial_token() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        search_value: Some("ali".to_string()),
        ..QueryRequest::for_table("employees")
    };
    let result = engine.execute("employees.db", &request).unwrap();
    assert_eq!(result.total_count, 1);
    assert_eq!(result.data[0][1], json!("Alice"));
}

#[cfg(unix)]
#[test]
fn test_search_falls_back_to_like_on_read_only_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE people (id INTEGER, surname TEXT);
         INSERT INTO people VALUES (1, 'Smith'), (2, 'Jones');",
    )
    .unwrap();
    drop(conn);

    // A read-only file defeats index and FTS creation; search must still
    // work through the LIKE fallback.
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&path, perms).unwrap();

    let engine = engine_over(dir.path());
    let request = QueryRequest {
        search_value: Some("sm".to_string()),
        ..QueryRequest::for_table("people")
    };
    let result = engine.execute("people.db", &request).unwrap();
    assert_eq!(result.total_count, 1);
    assert_eq!(result.data[0][1], json!("Smith"));
}

#[test]
fn test_limit_is_clamped_to_hard_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open(dir.path().join("big.db")).unwrap();
    conn.execute_batch("CREATE TABLE big (n INTEGER);").unwrap();
    {
        let tx = conn.unchecked_transaction().unwrap();
        let mut stmt = tx.prepare("INSERT INTO big VALUES (?1)").unwrap();
        for n in 0..2500 {
            stmt.execute([n]).unwrap();
        }
        drop(stmt);
        tx.commit().unwrap();
    }
    drop(conn);
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        limit: 999_999,
        ..QueryRequest::for_table("big")
    };
    let result = engine.execute("big.db", &request).unwrap();
    assert_eq!(result.data.len(), 2000);
    assert_eq!(result.total_count, 2500);
}

#[test]
fn test_empty_result_still_carries_headers() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        filters: vec![clause("age", FilterOperator::Gt, json!(1000))],
        ..QueryRequest::for_table("employees")
    };
    let result = engine.execute("employees.db", &request).unwrap();
    assert_eq!(result.headers, vec!["id", "name", "age"]);
    assert!(result.data.is_empty());
    assert_eq!(result.total_count, 0);
}

#[test]
fn test_regex_filter() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        filters: vec![clause("name", FilterOperator::Regex, json!("^[AB]"))],
        ..QueryRequest::for_table("employees")
    };
    let result = engine.execute("employees.db", &request).unwrap();
    assert_eq!(result.total_count, 2);
}

#[test]
fn test_malformed_regex_is_rejected_before_execution() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        filters: vec![clause("name", FilterOperator::Regex, json!("("))],
        ..QueryRequest::for_table("employees")
    };
    let err = engine.execute("employees.db", &request).unwrap_err();
    match err {
        Error::InvalidFilter { field, .. } => assert_eq!(field, "name"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_missing_table_and_database_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let err = engine
        .execute("employees.db", &QueryRequest::for_table("nope"))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { what: "table", .. }));

    let err = engine
        .execute("missing.db", &QueryRequest::for_table("employees"))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { what: "database", .. }));
}

#[test]
fn test_unknown_filter_column_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        filters: vec![clause("salary", FilterOperator::Eq, json!(1))],
        ..QueryRequest::for_table("employees")
    };
    let err = engine.execute("employees.db", &request).unwrap_err();
    match err {
        Error::InvalidFilter { field, .. } => assert_eq!(field, "salary"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_list_tables_with_sidecar_metadata() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    std::fs::write(
        dir.path().join("employees.db.config.json"),
        r#"{
            "object_type": "GenomeData",
            "tables": {
                "employees": {
                    "display_name": "Employees",
                    "description": "Staff roster"
                }
            }
        }"#,
    )
    .unwrap();
    let engine = engine_over(dir.path());

    let tables = engine.list_tables("employees.db").unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "employees");
    assert_eq!(tables[0].row_count, 3);
    assert_eq!(tables[0].column_count, 3);
    assert_eq!(tables[0].display_name.as_deref(), Some("Employees"));
    assert_eq!(tables[0].description.as_deref(), Some("Staff roster"));
}

#[test]
fn test_table_stats() {
    let dir = tempfile::tempdir().unwrap();
    let conn = Connection::open(dir.path().join("m.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE m (v INTEGER, label TEXT);
         INSERT INTO m VALUES (10, 'x'), (20, 'y'), (30, NULL), (NULL, 'x');",
    )
    .unwrap();
    drop(conn);
    let engine = engine_over(dir.path());

    let stats = engine.table_stats("m.db", "m").unwrap();
    assert_eq!(stats.len(), 2);

    let v = &stats[0];
    assert_eq!(v.column, "v");
    assert_eq!(v.min, json!(10));
    assert_eq!(v.max, json!(30));
    assert_eq!(v.mean, Some(20.0));
    assert_eq!(v.median, Some(20.0));
    assert_eq!(v.distinct_count, 3);
    assert_eq!(v.null_count, 1);
    // Population stddev of [10, 20, 30] via the single-pass approximation.
    let stddev = v.stddev.unwrap();
    assert!((stddev - 66.666_667_f64.sqrt()).abs() < 1e-3);

    let label = &stats[1];
    assert_eq!(label.column, "label");
    assert_eq!(label.distinct_count, 2);
    assert_eq!(label.null_count, 1);
    assert!(label.mean.is_none());
    assert!(label.sample_values.contains(&json!("x")));
}

#[test]
fn test_column_projection() {
    let dir = tempfile::tempdir().unwrap();
    seed_employees(dir.path());
    let engine = engine_over(dir.path());

    let request = QueryRequest {
        columns: Some(vec!["name".to_string(), "age".to_string()]),
        sort_column: Some("name".to_string()),
        ..QueryRequest::for_table("employees")
    };
    let result = engine.execute("employees.db", &request).unwrap();
    assert_eq!(result.headers, vec!["name", "age"]);
    assert_eq!(result.data[0], vec![json!("Alice"), json!(30)]);
}
