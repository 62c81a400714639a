//! End-to-end tests for temporal functions and ISO 8601 boundary encoding.

use cypherlite::{Database, Params, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_in_memory().unwrap()
}

fn single(db: &Database, query: &str) -> Value {
    let result = db.execute(query, Params::new()).unwrap();
    assert_eq!(result.data.len(), 1, "expected one row from {query}");
    result.data[0].values().next().cloned().unwrap()
}

// ============================================================================
// 1. Durations
// ============================================================================

#[test]
fn fractional_months_spill_down_the_unit_ladder() {
    let db = db();
    // 0.5 months = 15.2184375 days; the day fraction cascades into
    // hours/minutes/seconds.
    assert_eq!(
        single(&db, "RETURN duration({months: 0.5}) AS d"),
        Value::String("P15DT5H14M33S".into())
    );
}

#[test]
fn hours_are_never_normalized_to_days() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN duration({hours: 30}) AS d"),
        Value::String("PT30H".into())
    );
}

#[test]
fn months_are_never_normalized_to_years() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN duration({months: 14}) AS d"),
        Value::String("P14M".into())
    );
}

#[test]
fn duration_from_iso_string() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN duration('P1Y2M3DT4H5M6S') AS d"),
        Value::String("P14M3DT4H5M6S".into())
    );
}

#[test]
fn mixed_duration_components() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN duration({days: 2, hours: 3, minutes: 30}) AS d"),
        Value::String("P2DT3H30M".into())
    );
}

// ============================================================================
// 2. Date / time constructors
// ============================================================================

#[test]
fn date_from_string_round_trips() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN date('2024-02-29') AS d"),
        Value::String("2024-02-29".into())
    );
}

#[test]
fn datetime_with_offset_renders_iso() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN datetime('2024-06-01T12:00:00+02:00') AS d"),
        Value::String("2024-06-01T12:00:00+02:00".into())
    );
}

#[test]
fn datetime_from_map_with_iana_zone() {
    let db = db();
    assert_eq!(
        single(
            &db,
            "RETURN datetime({year: 2024, month: 1, day: 15, hour: 9, timezone: 'Europe/Paris'}) AS d",
        ),
        Value::String("2024-01-15T09:00:00+01:00[Europe/Paris]".into())
    );
}

#[test]
fn localdatetime_and_localtime() {
    let db = db();
    assert_eq!(
        single(&db, "RETURN localdatetime('2024-03-04T05:06:07') AS d"),
        Value::String("2024-03-04T05:06:07".into())
    );
    assert_eq!(
        single(&db, "RETURN localtime('05:06:07') AS t"),
        Value::String("05:06:07".into())
    );
}

#[test]
fn timestamp_is_epoch_milliseconds() {
    let db = db();
    let Value::Int(ts) = single(&db, "RETURN timestamp() AS t") else {
        panic!("expected integer timestamp");
    };
    // 2020-01-01 in epoch millis; sanity bound, not an exact clock check.
    assert!(ts > 1_577_836_800_000);
}

// ============================================================================
// 3. Temporal values as stored properties
// ============================================================================

#[test]
fn temporal_property_round_trips_as_iso_string() {
    let db = db();
    db.execute(
        "CREATE (e:Event {at: datetime('2024-06-01T12:00:00Z')})",
        Params::new(),
    )
    .unwrap();
    assert_eq!(
        single(&db, "MATCH (e:Event) RETURN e.at AS at"),
        Value::String("2024-06-01T12:00:00Z".into())
    );
}

#[test]
fn temporal_comparison_in_where() {
    let db = db();
    db.execute("CREATE (:D {d: '2024-01-01'}), (:D {d: '2025-01-01'})", Params::new()).unwrap();
    let result = db
        .execute("MATCH (n:D) WHERE n.d < '2024-06-01' RETURN count(n) AS c", Params::new())
        .unwrap();
    assert_eq!(result.data[0].get("c"), Some(&Value::Int(1)));
}
