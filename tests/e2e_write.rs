//! End-to-end tests for mutation: SET in all its forms, REMOVE, DELETE and
//! DETACH DELETE, and the no-partial-effects guarantee.

use cypherlite::{Database, Error, Params, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn run(db: &Database, query: &str) -> cypherlite::QueryResult {
    db.execute(query, Params::new()).unwrap()
}

// ============================================================================
// 1. SET a single property
// ============================================================================

#[test]
fn set_property_and_read_back() {
    let db = db();
    run(&db, "CREATE (n:Person {name: 'Ada'})");
    run(&db, "MATCH (n:Person) SET n.age = 37");

    let result = run(&db, "MATCH (n:Person) RETURN n.age AS age");
    assert_eq!(result.data[0].get("age"), Some(&Value::Int(37)));
}

#[test]
fn set_in_same_query_is_visible_to_return() {
    let db = db();
    run(&db, "CREATE (n:Counter {v: 1})");
    let result = run(&db, "MATCH (n:Counter) SET n.v = n.v + 1 RETURN n.v AS v");
    assert_eq!(result.data[0].get("v"), Some(&Value::Int(2)));
}

#[test]
fn set_null_deletes_the_property() {
    let db = db();
    run(&db, "CREATE (n:P {a: 1, b: 2})");
    run(&db, "MATCH (n:P) SET n.a = null");

    let result = run(&db, "MATCH (n:P) RETURN n");
    let Some(Value::Map(props)) = result.data[0].get("n") else { panic!("expected map") };
    assert!(!props.contains_key("a"));
    assert_eq!(props.get("b"), Some(&Value::Int(2)));
}

// ============================================================================
// 2. SET = (replace) and SET += (merge)
// ============================================================================

#[test]
fn set_replace_swaps_the_whole_map() {
    let db = db();
    run(&db, "CREATE (n:P {a: 1, b: 2})");
    run(&db, "MATCH (n:P) SET n = {c: 3}");

    let result = run(&db, "MATCH (n:P) RETURN n");
    let Some(Value::Map(props)) = result.data[0].get("n") else { panic!("expected map") };
    assert_eq!(props.len(), 1);
    assert_eq!(props.get("c"), Some(&Value::Int(3)));
}

#[test]
fn set_merge_patches_the_map() {
    let db = db();
    run(&db, "CREATE (n:P {a: 1, b: 2})");
    run(&db, "MATCH (n:P) SET n += {b: 20, c: 3}");

    let result = run(&db, "MATCH (n:P) RETURN n");
    let Some(Value::Map(props)) = result.data[0].get("n") else { panic!("expected map") };
    assert_eq!(props.get("a"), Some(&Value::Int(1)));
    assert_eq!(props.get("b"), Some(&Value::Int(20)));
    assert_eq!(props.get("c"), Some(&Value::Int(3)));
}

#[test]
fn set_label_adds_to_the_label_set() {
    let db = db();
    run(&db, "CREATE (n:Animal {name: 'Mia'})");
    run(&db, "MATCH (n:Animal) SET n:Cat");

    let result = run(&db, "MATCH (n:Cat) RETURN n.name AS name");
    assert_eq!(result.data[0].get("name"), Some(&Value::String("Mia".into())));
    // Both labels answer.
    assert_eq!(run(&db, "MATCH (n:Animal) RETURN count(n) AS c").data[0].get("c"), Some(&Value::Int(1)));
}

// ============================================================================
// 3. REMOVE
// ============================================================================

#[test]
fn remove_property_and_label() {
    let db = db();
    run(&db, "CREATE (n:A:B {x: 1, y: 2})");
    run(&db, "MATCH (n:A) REMOVE n.x, n:B");

    let result = run(&db, "MATCH (n:A) RETURN n");
    let Some(Value::Map(props)) = result.data[0].get("n") else { panic!("expected map") };
    assert!(!props.contains_key("x"));
    assert!(run(&db, "MATCH (n:B) RETURN n").data.is_empty());
}

// ============================================================================
// 4. DELETE / DETACH DELETE (property 6, scenario S5)
// ============================================================================

#[test]
fn detach_delete_removes_node_and_edges() {
    let db = db();
    run(&db, "CREATE (a:N {v: 1})-[:R]->(b:N {v: 2})");
    run(&db, "CREATE (x:N {v: 3})-[:R]->(y:N {v: 2})");

    // One node with v=2 per edge; delete them both.
    let result = run(&db, "MATCH (n:N {v: 2}) DETACH DELETE n RETURN count(*) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(2)));

    assert!(run(&db, "MATCH (n:N {v: 2}) RETURN n").data.is_empty());
    assert!(run(&db, "MATCH ()-[r:R]->() RETURN r").data.is_empty());
}

#[test]
fn plain_delete_of_connected_node_is_a_constraint_violation() {
    let db = db();
    run(&db, "CREATE (a:N {v: 1})-[:R]->(b:N {v: 2})");

    let err = db.execute("MATCH (n:N {v: 1}) DELETE n", Params::new()).unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation(_)), "{err:?}");

    // Rolled back: the node is still there.
    assert_eq!(run(&db, "MATCH (n:N) RETURN count(n) AS c").data[0].get("c"), Some(&Value::Int(2)));
}

#[test]
fn plain_delete_of_isolated_node_succeeds() {
    let db = db();
    run(&db, "CREATE (:Lone {v: 1})");
    run(&db, "MATCH (n:Lone) DELETE n");
    assert!(run(&db, "MATCH (n:Lone) RETURN n").data.is_empty());
}

#[test]
fn returning_a_deleted_variable_is_entity_not_found() {
    let db = db();
    run(&db, "CREATE (:Lone {v: 1})");
    let err = db.execute("MATCH (n:Lone) DELETE n RETURN n", Params::new()).unwrap_err();
    assert!(matches!(err, Error::EntityNotFound(_)), "{err:?}");
}

#[test]
fn delete_edge_keeps_endpoints() {
    let db = db();
    run(&db, "CREATE (a:E {k: 1})-[:R]->(b:E {k: 2})");
    run(&db, "MATCH (:E)-[r:R]->(:E) DELETE r");

    assert!(run(&db, "MATCH ()-[r:R]->() RETURN r").data.is_empty());
    assert_eq!(run(&db, "MATCH (n:E) RETURN count(n) AS c").data[0].get("c"), Some(&Value::Int(2)));
}

// ============================================================================
// 5. Atomicity (property 1)
// ============================================================================

#[test]
fn failed_query_leaves_no_partial_mutation() {
    let db = db();
    run(&db, "CREATE (a:T {k: 1})-[:R]->(b:T {k: 2})");

    // SET applies to the first row, then the plain DELETE fails; the whole
    // transaction must roll back, including the SET.
    let err = db
        .execute("MATCH (n:T) SET n.touched = true DELETE n", Params::new())
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation(_)), "{err:?}");

    let result = run(&db, "MATCH (n:T) WHERE n.touched IS NOT NULL RETURN n");
    assert!(result.data.is_empty());
}

// ============================================================================
// 6. CREATE driven by matched rows
// ============================================================================

#[test]
fn create_per_matched_row() {
    let db = db();
    run(&db, "CREATE (:Src {v: 1}), (:Src {v: 2})");
    run(&db, "MATCH (s:Src) CREATE (:Copy {v: s.v})");

    let result = run(&db, "MATCH (c:Copy) RETURN c.v AS v ORDER BY v");
    let vs: Vec<_> = result.data.iter().map(|r| r.get("v").cloned().unwrap()).collect();
    assert_eq!(vs, vec![Value::Int(1), Value::Int(2)]);
}

#[test]
fn create_relationship_between_matched_nodes() {
    let db = db();
    run(&db, "CREATE (:L {k: 1}), (:R {k: 2})");
    run(&db, "MATCH (a:L), (b:R) CREATE (a)-[:LINK]->(b)");

    let result = run(&db, "MATCH (:L)-[r:LINK]->(:R) RETURN count(r) AS c");
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(1)));
}
