//! End-to-end tests for the basic pipeline: parse -> dispatch -> SQL ->
//! format, against an in-memory SQLite store.

use cypherlite::{Database, Params, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn run(db: &Database, query: &str) -> cypherlite::QueryResult {
    db.execute(query, Params::new()).unwrap()
}

// ============================================================================
// 1. CREATE a node, then MATCH it back
// ============================================================================

#[test]
fn create_and_match_node() {
    let db = db();
    run(&db, "CREATE (n:Person)");

    let result = run(&db, "MATCH (n:Person) RETURN n");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.meta.count, 1);
    assert_eq!(result.data[0].get("n"), Some(&Value::Map(Default::default())));
}

// ============================================================================
// 2. CREATE with properties, read them back
// ============================================================================

#[test]
fn create_with_properties_round_trip() {
    let db = db();
    run(&db, "CREATE (n:Person {name: 'Ada', age: 3})");

    let result = run(&db, "MATCH (n:Person) RETURN n");
    assert_eq!(result.data.len(), 1);
    let Some(Value::Map(props)) = result.data[0].get("n") else {
        panic!("expected a property map");
    };
    assert_eq!(props.get("name"), Some(&Value::String("Ada".into())));
    assert_eq!(props.get("age"), Some(&Value::Int(3)));
}

// ============================================================================
// 3. CREATE ... RETURN in one query (scenario S1)
// ============================================================================

#[test]
fn create_returns_projected_property() {
    let db = db();
    let result = run(&db, "CREATE (a:Person {name: 'Alice'}) RETURN a.name AS n");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("n"), Some(&Value::String("Alice".into())));
}

// ============================================================================
// 4. WHERE filters
// ============================================================================

#[test]
fn match_with_where_filter() {
    let db = db();
    for (name, age) in [("Ada", 3), ("Bob", 30), ("Cleo", 25)] {
        run(&db, &format!("CREATE (n:Person {{name: '{name}', age: {age}}})"));
    }

    let result = run(&db, "MATCH (n:Person) WHERE n.age > 10 RETURN n.name AS name ORDER BY name");
    let names: Vec<_> = result.data.iter().map(|r| r.get("name").cloned().unwrap()).collect();
    assert_eq!(names, vec![Value::String("Bob".into()), Value::String("Cleo".into())]);
}

#[test]
fn where_with_computed_predicate_falls_back_to_row_engine() {
    let db = db();
    run(&db, "CREATE (:Pair {a: 2, b: 5}), (:Pair {a: 3, b: 4})");

    let result = run(&db, "MATCH (p:Pair) WHERE p.a * 2 < p.b RETURN p.a AS a");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("a"), Some(&Value::Int(2)));
}

// ============================================================================
// 5. Parameters
// ============================================================================

#[test]
fn parameters_flow_through_create_and_match() {
    let db = db();
    let mut params = Params::new();
    params.insert("name".into(), Value::from("Grace"));
    db.execute("CREATE (n:Person {name: $name})", params.clone()).unwrap();

    let result = db
        .execute("MATCH (n:Person {name: $name}) RETURN n.name AS name", params)
        .unwrap();
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("name"), Some(&Value::String("Grace".into())));
}

#[test]
fn missing_parameter_is_an_error() {
    let db = db();
    let err = db.execute("RETURN $nope AS x", Params::new()).unwrap_err();
    assert!(matches!(err, cypherlite::Error::EvaluationError(_)), "{err:?}");
}

// ============================================================================
// 6. Relationships
// ============================================================================

#[test]
fn relationship_create_and_match() {
    let db = db();
    run(
        &db,
        "CREATE (a:City {name: 'Paris'})-[r:ROAD {km: 878}]->(b:City {name: 'Berlin'})",
    );

    let result = run(
        &db,
        "MATCH (a:City)-[r:ROAD]->(b:City) RETURN a.name AS from, r.km AS km, b.name AS to",
    );
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("from"), Some(&Value::String("Paris".into())));
    assert_eq!(result.data[0].get("km"), Some(&Value::Int(878)));
    assert_eq!(result.data[0].get("to"), Some(&Value::String("Berlin".into())));
}

#[test]
fn left_arrow_swaps_direction() {
    let db = db();
    run(&db, "CREATE (a:N {k: 1})<-[:TO]-(b:N {k: 2})");

    let result = run(&db, "MATCH (x:N)-[:TO]->(y:N) RETURN x.k AS from, y.k AS to");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("from"), Some(&Value::Int(2)));
    assert_eq!(result.data[0].get("to"), Some(&Value::Int(1)));
}

#[test]
fn multi_hop_chain_matches() {
    let db = db();
    run(&db, "CREATE (:Hop {i: 1})-[:NEXT]->(:Hop {i: 2})-[:NEXT]->(:Hop {i: 3})");

    let result = run(
        &db,
        "MATCH (a:Hop)-[:NEXT]->(b:Hop)-[:NEXT]->(c:Hop) RETURN a.i AS a, b.i AS b, c.i AS c",
    );
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("a"), Some(&Value::Int(1)));
    assert_eq!(result.data[0].get("b"), Some(&Value::Int(2)));
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(3)));
}

// ============================================================================
// 7. Result shape
// ============================================================================

#[test]
fn no_rows_is_an_empty_list() {
    let db = db();
    let result = run(&db, "MATCH (n:Ghost) RETURN n");
    assert!(result.data.is_empty());
    assert_eq!(result.meta.count, 0);
}

#[test]
fn columns_keep_declaration_order() {
    let db = db();
    run(&db, "CREATE (n:P {a: 1, b: 2})");
    let result = run(&db, "MATCH (n:P) RETURN n.b AS b, n.a AS a");
    let keys: Vec<_> = result.data[0].keys().cloned().collect();
    assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
}

#[test]
fn label_predicate_in_where() {
    let db = db();
    run(&db, "CREATE (:Animal:Cat {name: 'Mia'}), (:Animal {name: 'Rex'})");
    let result = run(&db, "MATCH (n:Animal) WHERE n:Cat RETURN n.name AS name");
    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].get("name"), Some(&Value::String("Mia".into())));
}

// ============================================================================
// 8. Errors
// ============================================================================

#[test]
fn parse_error_carries_coordinates() {
    let db = db();
    let err = db.execute("MATCH (n RETURN n", Params::new()).unwrap_err();
    match err {
        cypherlite::Error::ParseError { line, column, .. } => {
            assert_eq!(line, 1);
            assert!(column > 1);
        }
        other => panic!("expected ParseError, got {other:?}"),
    }
}

#[test]
fn undefined_variable_is_a_syntax_error() {
    let db = db();
    let err = db.execute("MATCH (n) RETURN m", Params::new()).unwrap_err();
    assert!(matches!(err, cypherlite::Error::SyntaxError(_)), "{err:?}");
}

#[test]
fn unknown_function_is_an_evaluation_error() {
    let db = db();
    let err = db.execute("RETURN frobnicate(1) AS x", Params::new()).unwrap_err();
    assert!(matches!(err, cypherlite::Error::EvaluationError(_)), "{err:?}");
}

#[test]
fn on_disk_store_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.db");
    {
        let db = Database::open(&path).unwrap();
        db.execute("CREATE (n:Persist {v: 42})", Params::new()).unwrap();
    }
    let db = Database::open(&path).unwrap();
    let result = db.execute("MATCH (n:Persist) RETURN n.v AS v", Params::new()).unwrap();
    assert_eq!(result.data[0].get("v"), Some(&Value::Int(42)));
}
