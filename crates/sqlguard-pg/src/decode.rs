//! Row decoding into [`Record`]s.

use bigdecimal::BigDecimal;
use serde_json::Value;
use sqlguard_core::Record;
use std::fmt::Write as _;

use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgRow, PgValueFormat, PgValueRef};
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Decode one row, keeping the server's column order.
pub(crate) fn decode_row(row: &PgRow) -> Result<Record, sqlx::Error> {
    let mut record = Record::new();
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.type_info().name())?;
        record.push(column.name(), value);
    }
    Ok(record)
}

fn decode_column(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get::<bool, _>(index)?),
        "INT2" => Value::from(row.try_get::<i16, _>(index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(index)?),
        "FLOAT4" => float(f64::from(row.try_get::<f32, _>(index)?)),
        "FLOAT8" => float(row.try_get::<f64, _>(index)?),
        "NUMERIC" => Value::String(row.try_get::<BigDecimal, _>(index)?.to_string()),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => {
            Value::String(row.try_get::<String, _>(index)?)
        }
        "TIMESTAMP" => Value::String(
            row.try_get::<chrono::NaiveDateTime, _>(index)?
                .to_string(),
        ),
        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(index)?
                .to_rfc3339(),
        ),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(index)?.to_string()),
        "TIME" => Value::String(row.try_get::<chrono::NaiveTime, _>(index)?.to_string()),
        "UUID" => Value::String(row.try_get::<uuid::Uuid, _>(index)?.to_string()),
        "BYTEA" => Value::String(hex_text(&row.try_get::<Vec<u8>, _>(index)?)),
        "OID" => Value::from(row.try_get::<Oid, _>(index)?.0),
        "INTERVAL" => Value::String(interval_text(&row.try_get::<PgInterval, _>(index)?)),
        "JSON" | "JSONB" => row.try_get::<Value, _>(index)?,
        "TEXT[]" | "VARCHAR[]" | "NAME[]" => Value::from(row.try_get::<Vec<String>, _>(index)?),
        "INT4[]" => Value::from(row.try_get::<Vec<i32>, _>(index)?),
        "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(index)?),
        "VOID" => Value::Null,
        _ => fallback_text(raw),
    };
    Ok(value)
}

fn float(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(f.to_string()))
}

/// Types without a dedicated decoder. Text-format values are kept as sent; binary-format
/// values (the extended protocol's default) are rendered as `\x`-prefixed hex of the wire
/// bytes.
fn fallback_text(raw: PgValueRef<'_>) -> Value {
    match raw.format() {
        PgValueFormat::Text => match raw.as_str() {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => raw.as_bytes().map(hex_text).map(Value::String).unwrap_or(Value::Null),
        },
        PgValueFormat::Binary => raw.as_bytes().map(hex_text).map(Value::String).unwrap_or(Value::Null),
    }
}

/// Bytes in Postgres's `bytea` hex output form.
fn hex_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Interval in Postgres's default output style, e.g. `1 mon 2 days 03:04:05.5`.
fn interval_text(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let years = interval.months / 12;
    let months = interval.months % 12;
    let plural = |n: i32| if n == 1 { "" } else { "s" };
    if years != 0 {
        parts.push(format!("{} year{}", years, plural(years)));
    }
    if months != 0 {
        parts.push(format!("{} mon{}", months, plural(months)));
    }
    if interval.days != 0 {
        parts.push(format!("{} day{}", interval.days, plural(interval.days)));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let micros = micros.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let frac = micros % 1_000_000;
        if frac != 0 {
            let digits = format!("{:06}", frac);
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_floats_become_text() {
        assert_eq!(float(1.5), serde_json::json!(1.5));
        assert_eq!(float(f64::NAN), Value::String("NaN".to_string()));
        assert_eq!(float(f64::INFINITY), Value::String("inf".to_string()));
    }

    #[test]
    fn test_bytes_render_as_bytea_hex() {
        assert_eq!(hex_text(b"sqlguard"), "\\x73716c6775617264");
        assert_eq!(hex_text(&[0x00, 0xff]), "\\x00ff");
        assert_eq!(hex_text(&[]), "\\x");
    }

    #[test]
    fn test_interval_rendering() {
        let interval = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(interval_text(&interval(0, 0, 0)), "00:00:00");
        assert_eq!(interval_text(&interval(1, 2, 11_045_500_000)), "1 mon 2 days 03:04:05.5");
        assert_eq!(interval_text(&interval(14, 0, 0)), "1 year 2 mons");
        assert_eq!(interval_text(&interval(0, -1, -2_000_000)), "-1 days -00:00:02");
    }
}
