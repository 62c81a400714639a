//! End-to-end tests for UNWIND expansion and UNWIND-driven creation.

use cypherlite::{Database, Params, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn run(db: &Database, query: &str) -> cypherlite::QueryResult {
    db.execute(query, Params::new()).unwrap()
}

// ============================================================================
// 1. Plain expansion
// ============================================================================

#[test]
fn unwind_list_produces_one_row_per_element() {
    let db = db();
    let result = run(&db, "UNWIND [10, 20, 30] AS x RETURN x");
    let xs: Vec<_> = result.data.iter().map(|r| r.get("x").cloned().unwrap()).collect();
    assert_eq!(xs, vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
}

#[test]
fn unwind_null_produces_no_rows() {
    let db = db();
    assert!(run(&db, "UNWIND null AS x RETURN x").data.is_empty());
}

#[test]
fn unwind_scalar_produces_one_row() {
    let db = db();
    let result = run(&db, "UNWIND 7 AS x RETURN x");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("x"), Some(&Value::Int(7)));
}

#[test]
fn nested_unwinds_form_a_cartesian_product() {
    let db = db();
    let result = run(&db, "UNWIND [1, 2] AS a UNWIND ['x', 'y'] AS b RETURN a, b");
    assert_eq!(result.data.len(), 4);
    assert_eq!(result.data[0].get("a"), Some(&Value::Int(1)));
    assert_eq!(result.data[0].get("b"), Some(&Value::String("x".into())));
    assert_eq!(result.data[3].get("a"), Some(&Value::Int(2)));
    assert_eq!(result.data[3].get("b"), Some(&Value::String("y".into())));
}

// ============================================================================
// 2. UNWIND + CREATE (property 7, scenario S4)
// ============================================================================

#[test]
fn unwind_create_makes_one_node_per_element() {
    let db = db();
    run(&db, "UNWIND [1, 2, 3] AS x CREATE (:N {v: x})");

    let result = run(&db, "MATCH (n:N) RETURN n.v AS v ORDER BY v");
    let vs: Vec<_> = result.data.iter().map(|r| r.get("v").cloned().unwrap()).collect();
    assert_eq!(vs, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
}

#[test]
fn unwind_range_create_collects_back() {
    let db = db();
    let result = run(
        &db,
        "UNWIND range(1, 3) AS i CREATE (n:N {i: i}) WITH n.i AS v RETURN collect(v) AS vs",
    );
    assert_eq!(
        result.data[0].get("vs"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
    );
}

#[test]
fn unwind_create_with_relationships_per_iteration() {
    let db = db();
    run(
        &db,
        "UNWIND [1, 2] AS i CREATE (a:Pair {side: 'l', i: i})-[:BOND]->(b:Pair {side: 'r', i: i})",
    );

    let result = run(
        &db,
        "MATCH (a:Pair {side: 'l'})-[:BOND]->(b:Pair {side: 'r'}) \
         WHERE a.i = b.i RETURN count(*) AS c",
    );
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(2)));
}

#[test]
fn large_unwind_create_batches() {
    let db = db();
    run(&db, "UNWIND range(1, 1200) AS i CREATE (:Bulk {i: i})");
    let result = run(&db, "MATCH (n:Bulk) RETURN count(n) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(1200)));
}

// ============================================================================
// 3. Aggregate alias feeding UNWIND (phase boundary)
// ============================================================================

#[test]
fn unwind_over_collected_alias() {
    let db = db();
    run(&db, "CREATE (:S {v: 1}), (:S {v: 2})");
    let result = run(
        &db,
        "MATCH (s:S) WITH collect(s.v) AS vs UNWIND vs AS v RETURN v ORDER BY v",
    );
    let vs: Vec<_> = result.data.iter().map(|r| r.get("v").cloned().unwrap()).collect();
    assert_eq!(vs, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn unwind_expression_over_alias_list() {
    let db = db();
    let result = run(
        &db,
        "WITH [1, 2] AS xs UNWIND xs + [3] AS x RETURN collect(x) AS all",
    );
    assert_eq!(
        result.data[0].get("all"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
    );
}
