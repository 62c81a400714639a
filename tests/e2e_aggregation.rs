//! End-to-end tests for aggregation, grouping, DISTINCT, ORDER BY, SKIP
//! and LIMIT.

use cypherlite::{Database, Params, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn run(db: &Database, query: &str) -> cypherlite::QueryResult {
    db.execute(query, Params::new()).unwrap()
}

fn setup_people() -> Database {
    let db = db();
    let people = [
        ("Alice", 25, "Oslo"),
        ("Bob", 30, "Oslo"),
        ("Cleo", 35, "Lima"),
        ("Dan", 28, "Lima"),
        ("Eve", 22, "Kyiv"),
    ];
    for (name, age, city) in people {
        run(
            &db,
            &format!("CREATE (n:Person {{name: '{name}', age: {age}, city: '{city}'}})"),
        );
    }
    db
}

// ============================================================================
// 1. count
// ============================================================================

#[test]
fn count_star_and_count_node() {
    let db = setup_people();
    let result = run(&db, "MATCH (n:Person) RETURN count(*) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(5)));

    let result = run(&db, "MATCH (n:Person) RETURN count(n) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(5)));
}

#[test]
fn count_on_empty_store_is_zero() {
    let db = db();
    let result = run(&db, "MATCH (n:Person) RETURN count(n) AS c");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(0)));
}

#[test]
fn count_distinct() {
    let db = setup_people();
    let result = run(&db, "MATCH (n:Person) RETURN count(DISTINCT n.city) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(3)));
}

// ============================================================================
// 2. sum / avg / min / max through a WITH alias (scenario S2)
// ============================================================================

#[test]
fn sum_through_with_alias() {
    let db = db();
    run(&db, "CREATE (:N {v: 1}), (:N {v: 2}), (:N {v: 3})");
    let result = run(&db, "MATCH (n:N) WITH sum(n.v) AS s RETURN s");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("s"), Some(&Value::Int(6)));
}

#[test]
fn min_max_avg() {
    let db = setup_people();
    let result = run(
        &db,
        "MATCH (n:Person) RETURN min(n.age) AS lo, max(n.age) AS hi, avg(n.age) AS mean",
    );
    assert_eq!(result.data[0].get("lo"), Some(&Value::Int(22)));
    assert_eq!(result.data[0].get("hi"), Some(&Value::Int(35)));
    assert_eq!(result.data[0].get("mean"), Some(&Value::Float(28.0)));
}

// ============================================================================
// 3. Grouping
// ============================================================================

#[test]
fn grouped_count_by_city() {
    let db = setup_people();
    let result = run(
        &db,
        "MATCH (n:Person) RETURN n.city AS city, count(n) AS c ORDER BY city",
    );
    assert_eq!(result.data.len(), 3);
    assert_eq!(result.data[0].get("city"), Some(&Value::String("Kyiv".into())));
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(1)));
    assert_eq!(result.data[1].get("city"), Some(&Value::String("Lima".into())));
    assert_eq!(result.data[1].get("c"), Some(&Value::Int(2)));
}

#[test]
fn having_filters_groups() {
    let db = setup_people();
    let result = run(
        &db,
        "MATCH (n:Person) WITH n.city AS city, count(n) AS c WHERE c > 1 RETURN city ORDER BY city",
    );
    let cities: Vec<_> = result.data.iter().map(|r| r.get("city").cloned().unwrap()).collect();
    assert_eq!(cities, vec![Value::String("Lima".into()), Value::String("Oslo".into())]);
}

// ============================================================================
// 4. collect
// ============================================================================

#[test]
fn collect_property_values() {
    let db = setup_people();
    let result = run(
        &db,
        "MATCH (n:Person) WHERE n.city = 'Oslo' RETURN collect(n.name) AS names",
    );
    let Some(Value::List(names)) = result.data[0].get("names") else {
        panic!("expected a list");
    };
    assert_eq!(names.len(), 2);
    assert!(names.contains(&Value::String("Alice".into())));
    assert!(names.contains(&Value::String("Bob".into())));
}

#[test]
fn collect_on_empty_input_is_empty_list() {
    let db = db();
    let result = run(&db, "MATCH (n:Person) RETURN collect(n.name) AS names");
    assert_eq!(result.data[0].get("names"), Some(&Value::List(Vec::new())));
}

// ============================================================================
// 5. ORDER BY / SKIP / LIMIT (property 5)
// ============================================================================

#[test]
fn order_skip_limit_slices_after_sorting() {
    let db = setup_people();
    let result = run(
        &db,
        "MATCH (n:Person) RETURN n.age AS age ORDER BY age SKIP 1 LIMIT 2",
    );
    let ages: Vec<_> = result.data.iter().map(|r| r.get("age").cloned().unwrap()).collect();
    assert_eq!(ages, vec![Value::Int(25), Value::Int(28)]);
}

#[test]
fn with_order_skip_limit_preserves_multiset() {
    let db = setup_people();
    let result = run(
        &db,
        "MATCH (n:Person) WITH n.age AS age ORDER BY age DESC RETURN collect(age) AS ages",
    );
    assert_eq!(
        result.data[0].get("ages"),
        Some(&Value::List(vec![
            Value::Int(35),
            Value::Int(30),
            Value::Int(28),
            Value::Int(25),
            Value::Int(22),
        ]))
    );
}

#[test]
fn order_by_descending() {
    let db = setup_people();
    let result = run(&db, "MATCH (n:Person) RETURN n.name AS name ORDER BY n.age DESC LIMIT 1");
    assert_eq!(result.data[0].get("name"), Some(&Value::String("Cleo".into())));
}

// ============================================================================
// 6. DISTINCT
// ============================================================================

#[test]
fn distinct_collapses_duplicates() {
    let db = setup_people();
    let result = run(&db, "MATCH (n:Person) RETURN DISTINCT n.city AS city");
    assert_eq!(result.data.len(), 3);
}

#[test]
fn distinct_nodes_key_on_identity() {
    let db = db();
    // Two distinct entities with identical properties: DISTINCT keys nodes
    // by id, not by value, so both rows survive.
    run(&db, "CREATE (:X {k: 1}), (:X {k: 1})");
    let result = run(&db, "MATCH (x:X) RETURN DISTINCT x");
    assert_eq!(result.data.len(), 2);
}

// ============================================================================
// 7. Aggregates over UNWIND-produced rows
// ============================================================================

#[test]
fn aggregate_over_unwound_list() {
    let db = db();
    let result = run(&db, "UNWIND [1, 2, 3, 4] AS x RETURN sum(x) AS s, count(x) AS c");
    assert_eq!(result.data[0].get("s"), Some(&Value::Int(10)));
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(4)));
}
