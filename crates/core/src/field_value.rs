use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single row as a column → value mapping. Snapshot rows and stored rows
/// share this shape.
pub type Record = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Milliseconds since Unix epoch.
    Timestamp(i64),
    Json(serde_json::Value),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// The value as an identifier key. Snapshots occasionally carry numeric
    /// identifiers, so integers are accepted alongside text. Empty text is
    /// not an identifier.
    pub fn as_key(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) if !s.is_empty() => Some(s.clone()),
            FieldValue::Integer(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Coerce a timestamp-like value into `Timestamp`. Accepts RFC 3339 text,
    /// naive date-time or date text (read as UTC), and epoch milliseconds.
    /// Returns `None` when the value cannot be read as a point in time.
    pub fn to_timestamp(&self) -> Option<FieldValue> {
        match self {
            FieldValue::Timestamp(ms) => Some(FieldValue::Timestamp(*ms)),
            FieldValue::Integer(ms) => Some(FieldValue::Timestamp(*ms)),
            FieldValue::Float(ms) if ms.is_finite() => Some(FieldValue::Timestamp(*ms as i64)),
            FieldValue::Text(s) => parse_timestamp_text(s).map(FieldValue::Timestamp),
            _ => None,
        }
    }

    /// Human-readable rendering used in conflict diagnostics.
    pub fn display_value(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(n) | FieldValue::Timestamp(n) => n.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Json(v) => v.to_string(),
        }
    }
}

fn parse_timestamp_text(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc().timestamp_millis());
    }
    s.parse::<i64>().ok()
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => FieldValue::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => FieldValue::Text(s),
            other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                FieldValue::Json(other)
            }
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_and_naive_text_normalize_to_millis() {
        let rfc = FieldValue::Text("2024-03-01T12:00:00Z".into());
        assert_eq!(rfc.to_timestamp(), Some(FieldValue::Timestamp(1_709_294_400_000)));

        let offset = FieldValue::Text("2024-03-01T13:00:00+01:00".into());
        assert_eq!(offset.to_timestamp(), Some(FieldValue::Timestamp(1_709_294_400_000)));

        let naive = FieldValue::Text("2024-03-01 12:00:00.250".into());
        assert_eq!(naive.to_timestamp(), Some(FieldValue::Timestamp(1_709_294_400_250)));

        let date = FieldValue::Text("2024-03-01".into());
        assert_eq!(date.to_timestamp(), Some(FieldValue::Timestamp(1_709_251_200_000)));
    }

    #[test]
    fn numeric_timestamps_are_millis() {
        assert_eq!(
            FieldValue::Integer(1_700_000_000_000).to_timestamp(),
            Some(FieldValue::Timestamp(1_700_000_000_000))
        );
        assert_eq!(
            FieldValue::Float(1_700_000_000_000.7).to_timestamp(),
            Some(FieldValue::Timestamp(1_700_000_000_000))
        );
    }

    #[test]
    fn garbage_is_not_a_timestamp() {
        assert_eq!(FieldValue::Text("yesterday-ish".into()).to_timestamp(), None);
        assert_eq!(FieldValue::Boolean(true).to_timestamp(), None);
        assert_eq!(FieldValue::Null.to_timestamp(), None);
    }

    #[test]
    fn json_values_convert_by_shape() {
        let v: serde_json::Value = serde_json::json!({
            "a": null, "b": true, "c": 3, "d": 1.5, "e": "x", "f": [1], "g": {"h": 1}
        });
        let serde_json::Value::Object(map) = v else { unreachable!() };
        let conv: Record = map.into_iter().map(|(k, v)| (k, FieldValue::from(v))).collect();
        assert_eq!(conv["a"], FieldValue::Null);
        assert_eq!(conv["b"], FieldValue::Boolean(true));
        assert_eq!(conv["c"], FieldValue::Integer(3));
        assert_eq!(conv["d"], FieldValue::Float(1.5));
        assert_eq!(conv["e"], FieldValue::Text("x".into()));
        assert_eq!(conv["f"], FieldValue::Json(serde_json::json!([1])));
        assert_eq!(conv["g"], FieldValue::Json(serde_json::json!({"h": 1})));
    }

    #[test]
    fn keys_accept_text_and_integers_only() {
        assert_eq!(FieldValue::Text("abc".into()).as_key(), Some("abc".into()));
        assert_eq!(FieldValue::Integer(42).as_key(), Some("42".into()));
        assert_eq!(FieldValue::Text(String::new()).as_key(), None);
        assert_eq!(FieldValue::Null.as_key(), None);
        assert_eq!(FieldValue::Boolean(false).as_key(), None);
    }
}
