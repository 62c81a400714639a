//! End-to-end tests for the trickier execution strategies: OPTIONAL MATCH
//! null semantics, collect-then-consume pipelines, bound relationship-list
//! paths, and property-based invariants.

use cypherlite::{Database, Params, Value};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn run(db: &Database, query: &str) -> cypherlite::QueryResult {
    db.execute(query, Params::new()).unwrap()
}

// ============================================================================
// 1. OPTIONAL MATCH
// ============================================================================

#[test]
fn optional_match_preserves_rows_with_nulls() {
    let db = db();
    let result = run(&db, "OPTIONAL MATCH (n:Missing) RETURN n");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("n"), Some(&Value::Null));
}

#[test]
fn optional_match_extends_matched_rows() {
    let db = db();
    run(&db, "CREATE (:Person {name: 'Ada'})");
    run(&db, "CREATE (:Person {name: 'Bob'})-[:OWNS]->(:Pet {name: 'Rex'})");

    let result = run(
        &db,
        "MATCH (p:Person) OPTIONAL MATCH (p)-[:OWNS]->(pet:Pet) \
         RETURN p.name AS person, pet.name AS pet ORDER BY person",
    );
    assert_eq!(result.data.len(), 2);
    assert_eq!(result.data[0].get("person"), Some(&Value::String("Ada".into())));
    assert_eq!(result.data[0].get("pet"), Some(&Value::Null));
    assert_eq!(result.data[1].get("person"), Some(&Value::String("Bob".into())));
    assert_eq!(result.data[1].get("pet"), Some(&Value::String("Rex".into())));
}

#[test]
fn optional_match_short_circuits_on_null_binding() {
    let db = db();
    run(&db, "CREATE (:Person {name: 'Ada'})");
    let result = run(
        &db,
        "OPTIONAL MATCH (q:Missing) OPTIONAL MATCH (q)-[:R]->(x) RETURN q, x",
    );
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("x"), Some(&Value::Null));
}

// ============================================================================
// 2. WITH projections
// ============================================================================

#[test]
fn with_star_passes_bindings_through() {
    let db = db();
    run(&db, "CREATE (:WS {v: 5})");
    let result = run(&db, "MATCH (n:WS) WITH *, n.v AS copy RETURN n.v AS v, copy");
    assert_eq!(result.data[0].get("v"), Some(&Value::Int(5)));
    assert_eq!(result.data[0].get("copy"), Some(&Value::Int(5)));
}

#[test]
fn with_where_filters_before_projection() {
    let db = db();
    run(&db, "CREATE (:F {v: 1}), (:F {v: 2}), (:F {v: 3})");
    let result = run(
        &db,
        "MATCH (n:F) WITH n.v AS v WHERE v > 1 RETURN collect(v) AS vs",
    );
    assert_eq!(
        result.data[0].get("vs"),
        Some(&Value::List(vec![Value::Int(2), Value::Int(3)]))
    );
}

#[test]
fn create_then_with_sees_fresh_ids() {
    let db = db();
    let result = run(
        &db,
        "CREATE (n:Fresh {v: 1}) WITH n RETURN n.v AS v",
    );
    assert_eq!(result.data[0].get("v"), Some(&Value::Int(1)));
}

// ============================================================================
// 3. MATCH + COLLECT pipelines
// ============================================================================

#[test]
fn collect_then_unwind_expands_entities() {
    let db = db();
    run(&db, "CREATE (:C {v: 1}), (:C {v: 2})");
    let result = run(
        &db,
        "MATCH (n:C) WITH collect(n) AS ns UNWIND ns AS n RETURN n.v AS v ORDER BY v",
    );
    let vs: Vec<_> = result.data.iter().map(|r| r.get("v").cloned().unwrap()).collect();
    assert_eq!(vs, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn collect_then_delete_by_negative_index() {
    let db = db();
    run(&db, "CREATE (:T {i: 1}), (:T {i: 2}), (:T {i: 3})");
    run(&db, "MATCH (n:T) WITH collect(n) AS ns DETACH DELETE ns[-1]");

    let result = run(&db, "MATCH (n:T) RETURN count(n) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(2)));
}

#[test]
fn collect_then_delete_all() {
    let db = db();
    run(&db, "CREATE (:T {i: 1})-[:R]->(:T {i: 2})");
    run(&db, "MATCH (n:T) WITH collect(n) AS ns DETACH DELETE ns");
    assert!(run(&db, "MATCH (n:T) RETURN n").data.is_empty());
}

// ============================================================================
// 4. Bound relationship-list path
// ============================================================================

#[test]
fn bound_edge_list_reconstructs_endpoints() {
    let db = db();
    run(
        &db,
        "CREATE (:Stop {k: 1})-[:LEG]->(:Stop {k: 2})-[:LEG]->(:Stop {k: 3})",
    );

    let result = run(
        &db,
        "MATCH (s1:Stop {k: 1})-[r1:LEG]->(:Stop)-[r2:LEG]->(:Stop) \
         WITH [r1, r2] AS legs \
         MATCH (a)-[legs*]->(b) \
         RETURN a.k AS start, b.k AS finish",
    );
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("start"), Some(&Value::Int(1)));
    assert_eq!(result.data[0].get("finish"), Some(&Value::Int(3)));
}

#[test]
fn discontinuous_edge_list_yields_no_rows() {
    let db = db();
    run(&db, "CREATE (:Hub {k: 1})-[:W]->(:Hub {k: 2})");
    run(&db, "CREATE (:Hub {k: 3})-[:W]->(:Hub {k: 4})");

    // Two edges that do not chain: continuity verification drops the row.
    let result = run(
        &db,
        "MATCH (:Hub {k: 1})-[r1:W]->(:Hub), (:Hub {k: 3})-[r2:W]->(:Hub) \
         WITH [r1, r2] AS legs \
         MATCH (a)-[legs*]->(b) \
         RETURN a.k AS start",
    );
    assert!(result.data.is_empty());
}

// ============================================================================
// 5. Undirected matching
// ============================================================================

#[test]
fn undirected_match_sees_both_orientations() {
    let db = db();
    run(&db, "CREATE (:U {k: 1})-[:E]->(:U {k: 2})");
    let result = run(&db, "MATCH (a:U)-[:E]-(b:U) RETURN a.k AS k ORDER BY k");
    // One edge, two orientations.
    let ks: Vec<_> = result.data.iter().map(|r| r.get("k").cloned().unwrap()).collect();
    assert_eq!(ks, vec![Value::Int(1), Value::Int(2)]);
}

// ============================================================================
// 6. Property-based invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// MERGE twice on an empty graph leaves exactly one node (property 3).
    #[test]
    fn merge_is_idempotent_for_any_name(name in "[a-zA-Z][a-zA-Z0-9]{0,12}") {
        let db = Database::open_in_memory().unwrap();
        let q = format!("MERGE (n:Thing {{name: '{name}'}})");
        db.execute(&q, Params::new()).unwrap();
        db.execute(&q, Params::new()).unwrap();

        let result = db
            .execute("MATCH (n:Thing) RETURN count(n) AS c", Params::new())
            .unwrap();
        prop_assert_eq!(result.data[0].get("c"), Some(&Value::Int(1)));
    }

    /// ORDER BY permutes, never changes, the multiset of values (property 5).
    #[test]
    fn order_by_preserves_the_multiset(mut values in prop::collection::vec(-50i64..50, 1..12)) {
        let db = Database::open_in_memory().unwrap();
        for v in &values {
            db.execute(&format!("CREATE (:V {{v: {v}}})"), Params::new()).unwrap();
        }
        let result = db
            .execute(
                "MATCH (n:V) WITH n.v AS v ORDER BY v RETURN collect(v) AS vs",
                Params::new(),
            )
            .unwrap();
        let Some(Value::List(got)) = result.data[0].get("vs") else {
            return Err(TestCaseError::fail("expected list"));
        };
        values.sort();
        let expected: Vec<Value> = values.iter().map(|v| Value::Int(*v)).collect();
        prop_assert_eq!(got, &expected);
    }
}
