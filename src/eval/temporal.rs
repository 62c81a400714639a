//! Temporal functions: `datetime`, `date`, `time`, `localdatetime`,
//! `localtime`, `duration`, `timestamp`.
//!
//! Each constructor accepts no argument (now), an ISO 8601 string, or a
//! component map. IANA timezone names are resolved to the fixed offset in
//! effect at the given local date/time and rendered as `±HH:MM[Zone/Name]`.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use indexmap::IndexMap;

use crate::model::{IsoDuration, Value};
use crate::{Error, Result};

/// Average Gregorian month, in days, for spilling fractional months.
const DAYS_PER_MONTH: f64 = 30.436875;
/// Average Gregorian year, in days, for spilling fractional years.
const DAYS_PER_YEAR: f64 = 365.2425;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

fn utc_offset() -> FixedOffset {
    FixedOffset::east_opt(0).expect("zero offset is always valid")
}

/// Entry point for the function registry.
pub fn call(name: &str, args: &[Value]) -> Result<Value> {
    let arg = args.first();
    match name {
        "datetime" => datetime(arg),
        "localdatetime" => localdatetime(arg),
        "date" => date(arg),
        "time" => time(arg),
        "localtime" => localtime(arg),
        "duration" => duration(arg.ok_or_else(|| {
            Error::EvaluationError("duration() requires an argument".into())
        })?),
        "timestamp" => Ok(Value::Int(Utc::now().timestamp_millis())),
        _ => Err(Error::EvaluationError(format!("Unknown temporal function: {name}"))),
    }
}

// ============================================================================
// Constructors
// ============================================================================

fn datetime(arg: Option<&Value>) -> Result<Value> {
    match arg {
        None => {
            let now = Utc::now();
            Ok(Value::DateTime { instant: now.fixed_offset(), zone: None })
        }
        Some(Value::String(s)) => parse_datetime_string(s),
        Some(Value::Map(map)) => datetime_from_map(map),
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(type_error("datetime", other)),
    }
}

fn localdatetime(arg: Option<&Value>) -> Result<Value> {
    match arg {
        None => Ok(Value::LocalDateTime(Utc::now().naive_utc())),
        Some(Value::String(s)) => {
            let dt = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
                .map_err(|_| parse_error("localdatetime", s))?;
            Ok(Value::LocalDateTime(dt))
        }
        Some(Value::Map(map)) => {
            let (naive, _) = naive_from_map(map)?;
            Ok(Value::LocalDateTime(naive))
        }
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(type_error("localdatetime", other)),
    }
}

fn date(arg: Option<&Value>) -> Result<Value> {
    match arg {
        None => Ok(Value::Date(Utc::now().date_naive())),
        Some(Value::String(s)) => {
            let d = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| parse_error("date", s))?;
            Ok(Value::Date(d))
        }
        Some(Value::Map(map)) => {
            let (naive, _) = naive_from_map(map)?;
            Ok(Value::Date(naive.date()))
        }
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(type_error("date", other)),
    }
}

fn time(arg: Option<&Value>) -> Result<Value> {
    match arg {
        None => {
            let now = Utc::now();
            Ok(Value::Time { time: now.time(), offset: utc_offset() })
        }
        Some(Value::String(s)) => {
            let (time_part, offset) = split_offset(s);
            let t = parse_time_component(time_part)?;
            let offset = match offset {
                Some(o) => parse_offset(o)?,
                None => utc_offset(),
            };
            Ok(Value::Time { time: t, offset })
        }
        Some(Value::Map(map)) => {
            let (naive, zone) = naive_from_map(map)?;
            let offset = match &zone {
                Some(z) => resolve_zone(z, &naive)?.1,
                None => utc_offset(),
            };
            Ok(Value::Time { time: naive.time(), offset })
        }
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(type_error("time", other)),
    }
}

fn localtime(arg: Option<&Value>) -> Result<Value> {
    match arg {
        None => Ok(Value::LocalTime(Utc::now().time())),
        Some(Value::String(s)) => Ok(Value::LocalTime(parse_time_component(s)?)),
        Some(Value::Map(map)) => {
            let (naive, _) = naive_from_map(map)?;
            Ok(Value::LocalTime(naive.time()))
        }
        Some(Value::Null) => Ok(Value::Null),
        Some(other) => Err(type_error("localtime", other)),
    }
}

// ============================================================================
// datetime parsing helpers
// ============================================================================

fn parse_datetime_string(s: &str) -> Result<Value> {
    // Trailing [Zone/Name] names the zone explicitly.
    let (body, zone_name) = match (s.find('['), s.ends_with(']')) {
        (Some(open), true) => (&s[..open], Some(s[open + 1..s.len() - 1].to_string())),
        _ => (s, None),
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(body) {
        return Ok(Value::DateTime { instant: dt, zone: zone_name });
    }

    // No offset in the string: interpret as local in the named zone, or UTC.
    let naive = NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| {
            NaiveDate::parse_from_str(body, "%Y-%m-%d").map(|d| d.and_time(NaiveTime::MIN))
        })
        .map_err(|_| parse_error("datetime", s))?;

    match zone_name {
        Some(name) => {
            let (_, offset) = resolve_zone(&name, &naive)?;
            let instant = offset
                .from_local_datetime(&naive)
                .single()
                .unwrap_or_else(|| offset.from_utc_datetime(&naive));
            Ok(Value::DateTime { instant, zone: Some(name) })
        }
        None => {
            let offset = utc_offset();
            Ok(Value::DateTime { instant: offset.from_utc_datetime(&naive), zone: None })
        }
    }
}

fn datetime_from_map(map: &IndexMap<String, Value>) -> Result<Value> {
    let (naive, zone) = naive_from_map(map)?;
    match zone {
        Some(name) => {
            let (zone_name, offset) = resolve_zone(&name, &naive)?;
            let instant = offset
                .from_local_datetime(&naive)
                .single()
                .unwrap_or_else(|| offset.from_utc_datetime(&naive));
            Ok(Value::DateTime { instant, zone: zone_name })
        }
        None => {
            let offset = utc_offset();
            Ok(Value::DateTime { instant: offset.from_utc_datetime(&naive), zone: None })
        }
    }
}

/// Assemble a naive date-time from a component map; returns the `timezone`
/// entry separately.
fn naive_from_map(map: &IndexMap<String, Value>) -> Result<(NaiveDateTime, Option<String>)> {
    let get_int = |key: &str, default: i64| -> Result<i64> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v.as_int().ok_or_else(|| {
                Error::EvaluationError(format!("Temporal component '{key}' must be an integer"))
            }),
        }
    };

    let year = get_int("year", 1970)? as i32;
    let month = get_int("month", 1)? as u32;
    let day = get_int("day", 1)? as u32;
    let hour = get_int("hour", 0)? as u32;
    let minute = get_int("minute", 0)? as u32;
    let second = get_int("second", 0)? as u32;
    let millisecond = get_int("millisecond", 0)? as u32;
    let microsecond = get_int("microsecond", 0)? as u32;
    let nanosecond = get_int("nanosecond", 0)? as u32;

    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        Error::EvaluationError(format!("Invalid date components: {year}-{month}-{day}"))
    })?;
    let nanos = millisecond * 1_000_000 + microsecond * 1_000 + nanosecond;
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos).ok_or_else(|| {
        Error::EvaluationError(format!("Invalid time components: {hour}:{minute}:{second}"))
    })?;

    let zone = match map.get("timezone") {
        Some(Value::String(z)) => Some(z.clone()),
        _ => None,
    };
    Ok((date.and_time(time), zone))
}

/// Resolve a timezone string to a fixed offset for the given local
/// date-time. Offset strings (`+01:00`, `Z`) resolve directly; anything else
/// is looked up as an IANA name and the name is kept for rendering.
fn resolve_zone(zone: &str, local: &NaiveDateTime) -> Result<(Option<String>, FixedOffset)> {
    if zone == "Z" || zone == "z" {
        return Ok((None, utc_offset()));
    }
    if zone.starts_with('+') || zone.starts_with('-') {
        return Ok((None, parse_offset(zone)?));
    }
    let tz = Tz::from_str(zone)
        .map_err(|_| Error::EvaluationError(format!("Unknown timezone: {zone}")))?;
    let offset = tz
        .offset_from_local_datetime(local)
        .earliest()
        .map(|o| o.fix())
        .unwrap_or_else(|| tz.offset_from_utc_datetime(local).fix());
    Ok((Some(zone.to_string()), offset))
}

fn parse_offset(s: &str) -> Result<FixedOffset> {
    let err = || Error::EvaluationError(format!("Invalid timezone offset: {s}"));
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(err()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().map_err(|_| err())?, m.parse::<i32>().map_err(|_| err())?),
        None if rest.len() == 4 => (
            rest[..2].parse::<i32>().map_err(|_| err())?,
            rest[2..].parse::<i32>().map_err(|_| err())?,
        ),
        None => (rest.parse::<i32>().map_err(|_| err())?, 0),
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(err)
}

fn split_offset(s: &str) -> (&str, Option<&str>) {
    if let Some(stripped) = s.strip_suffix('Z') {
        return (stripped, Some("+00:00"));
    }
    // Look for a +/- after the time digits.
    for (i, c) in s.char_indices().skip(1) {
        if c == '+' || c == '-' {
            return (&s[..i], Some(&s[i..]));
        }
    }
    (s, None)
}

fn parse_time_component(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S%.f"))
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| parse_error("time", s))
}

// ============================================================================
// Durations
// ============================================================================

/// Build a duration from an ISO string or a component map.
///
/// Fractional map components spill down the unit ladder: a fractional year
/// becomes days at 365.2425 d/y, a fractional month becomes days at
/// 30.436875 d/m, and fractional days/hours/minutes/seconds cascade into the
/// smaller carriers. Hours are never normalized up into days, nor months
/// into years.
pub fn duration(arg: &Value) -> Result<Value> {
    match arg {
        Value::String(s) => parse_iso_duration(s).map(Value::Duration),
        Value::Map(map) => duration_from_map(map).map(Value::Duration),
        Value::Null => Ok(Value::Null),
        other => Err(type_error("duration", other)),
    }
}

fn duration_from_map(map: &IndexMap<String, Value>) -> Result<IsoDuration> {
    let get = |key: &str| -> Result<f64> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(0.0),
            Some(v) => v.as_float().ok_or_else(|| {
                Error::EvaluationError(format!("Duration component '{key}' must be numeric"))
            }),
        }
    };

    let years = get("years")?;
    let months_in = get("months")?;
    let weeks = get("weeks")?;
    let days_in = get("days")?;
    let hours = get("hours")?;
    let minutes = get("minutes")?;
    let seconds_in = get("seconds")?;
    let millis = get("milliseconds")?;
    let nanos_in = get("nanoseconds")?;

    // Whole years fold into months; fractions of a year or month spill into
    // days using the average Gregorian lengths.
    let total_months = years.trunc() * 12.0 + months_in;
    let months = total_months.trunc();
    let day_spill = years.fract() * DAYS_PER_YEAR + total_months.fract() * DAYS_PER_MONTH;

    let total_days = days_in + weeks * 7.0 + day_spill;
    let days = total_days.trunc();

    let total_seconds = total_days.fract() * 86_400.0
        + hours * 3_600.0
        + minutes * 60.0
        + seconds_in
        + millis / 1_000.0;
    let seconds = total_seconds.trunc();
    let nanos = (total_seconds.fract() * NANOS_PER_SECOND).round() + nanos_in;

    // A rounded fraction can land exactly on a second boundary.
    let (seconds, nanos) = if nanos >= NANOS_PER_SECOND {
        (seconds + (nanos / NANOS_PER_SECOND).trunc(), nanos % NANOS_PER_SECOND)
    } else {
        (seconds, nanos)
    };

    Ok(IsoDuration {
        months: months as i64,
        days: days as i64,
        seconds: seconds as i64,
        nanoseconds: nanos as i64,
    })
}

fn parse_iso_duration(s: &str) -> Result<IsoDuration> {
    let err = || Error::EvaluationError(format!("Invalid duration: {s}"));
    let rest = s.strip_prefix('P').ok_or_else(err)?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };

    let mut out = IsoDuration::default();
    let mut parse_fields = |part: &str, in_time: bool| -> Result<()> {
        let mut num = String::new();
        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' || c == '-' {
                num.push(c);
            } else {
                let value: f64 = num.parse().map_err(|_| err())?;
                num.clear();
                match (c, in_time) {
                    ('Y', false) => out.months += (value * 12.0) as i64,
                    ('M', false) => out.months += value as i64,
                    ('W', false) => out.days += (value * 7.0) as i64,
                    ('D', false) => out.days += value as i64,
                    ('H', true) => out.seconds += (value * 3600.0) as i64,
                    ('M', true) => out.seconds += (value * 60.0) as i64,
                    ('S', true) => {
                        out.seconds += value.trunc() as i64;
                        out.nanoseconds += (value.fract() * NANOS_PER_SECOND).round() as i64;
                    }
                    _ => return Err(err()),
                }
            }
        }
        if num.is_empty() { Ok(()) } else { Err(err()) }
    };
    parse_fields(date_part, false)?;
    if let Some(t) = time_part {
        parse_fields(t, true)?;
    }
    Ok(out)
}

// ============================================================================
// Errors
// ============================================================================

fn type_error(function: &str, got: &Value) -> Error {
    Error::EvaluationError(format!(
        "{function}() expects a string or map, got {}",
        got.type_name()
    ))
}

fn parse_error(function: &str, input: &str) -> Error {
    Error::EvaluationError(format!("Cannot parse {function} from '{input}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_month_spills_to_days() {
        let mut map = IndexMap::new();
        map.insert("months".to_string(), Value::Float(0.5));
        let d = duration_from_map(&map).unwrap();
        assert_eq!(d.months, 0);
        assert_eq!(d.days, 15);
        // 0.2184375 days = 5h 14m 33s
        assert_eq!(d.seconds, 5 * 3600 + 14 * 60 + 33);
        assert_eq!(IsoDuration { ..d }.to_string(), "P15DT5H14M33S");
    }

    #[test]
    fn hours_are_not_normalized() {
        let mut map = IndexMap::new();
        map.insert("hours".to_string(), Value::Int(30));
        let d = duration_from_map(&map).unwrap();
        assert_eq!(d.days, 0);
        assert_eq!(d.to_string(), "PT30H");
    }

    #[test]
    fn months_are_not_normalized_to_years() {
        let mut map = IndexMap::new();
        map.insert("months".to_string(), Value::Int(14));
        let d = duration_from_map(&map).unwrap();
        assert_eq!(d.months, 14);
        assert_eq!(d.to_string(), "P14M");
    }

    #[test]
    fn iso_duration_round_trip() {
        let d = parse_iso_duration("P1Y2M3DT4H5M6S").unwrap();
        assert_eq!(d.months, 14);
        assert_eq!(d.days, 3);
        assert_eq!(d.seconds, 4 * 3600 + 5 * 60 + 6);
    }

    #[test]
    fn datetime_with_offset_renders_iso() {
        let v = parse_datetime_string("2024-06-01T12:00:00+02:00").unwrap();
        assert_eq!(v.temporal_string().unwrap(), "2024-06-01T12:00:00+02:00");
    }

    #[test]
    fn datetime_with_zone_name() {
        let mut map = IndexMap::new();
        map.insert("year".to_string(), Value::Int(2024));
        map.insert("month".to_string(), Value::Int(1));
        map.insert("day".to_string(), Value::Int(15));
        map.insert("hour".to_string(), Value::Int(9));
        map.insert("timezone".to_string(), Value::String("Europe/Paris".into()));
        let v = datetime_from_map(&map).unwrap();
        assert_eq!(
            v.temporal_string().unwrap(),
            "2024-01-15T09:00:00+01:00[Europe/Paris]"
        );
    }
}
