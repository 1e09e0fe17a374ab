//! Lenient decoding for fields older writers stored in other shapes.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::Metadata;

/// RFC 3339 string, or epoch milliseconds.
pub(crate) fn datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    datetime_from_value(&value).map_err(D::Error::custom)
}

pub(crate) fn datetime_from_value(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| format!("invalid date '{}': {}", s, e)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .ok_or_else(|| format!("invalid timestamp {}", n)),
        other => Err(format!("expected a date, got {}", other)),
    }
}

/// Object, JSON-encoded object string, or null.
pub(crate) fn metadata<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Metadata::new()),
        Value::Object(map) => Ok(map),
        Value::String(raw) if raw.trim().is_empty() => Ok(Metadata::new()),
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => Err(D::Error::custom("metadata string is not a JSON object")),
        },
        other => Err(D::Error::custom(format!("expected metadata object, got {}", other))),
    }
}

/// Shallow merge: keys in `patch` overwrite keys in `base`.
pub(crate) fn merge_metadata(base: &mut Metadata, patch: Metadata) {
    for (key, value) in patch {
        base.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "datetime")]
        at: DateTime<Utc>,
        #[serde(default, deserialize_with = "metadata")]
        metadata: Metadata,
    }

    #[test]
    fn test_datetime_accepts_string_and_millis() {
        let a: Probe = serde_json::from_value(json!({"at": "2024-01-01T00:00:00Z"})).unwrap();
        let b: Probe = serde_json::from_value(json!({"at": 1704067200000i64})).unwrap();
        assert_eq!(a.at, b.at);
        assert!(serde_json::from_value::<Probe>(json!({"at": true})).is_err());
    }

    #[test]
    fn test_metadata_decodes_serialized_string() {
        let probe: Probe = serde_json::from_value(json!({
            "at": "2024-01-01T00:00:00Z",
            "metadata": "{\"topic\":\"billing\"}"
        }))
        .unwrap();
        assert_eq!(probe.metadata.get("topic"), Some(&json!("billing")));

        let empty: Probe =
            serde_json::from_value(json!({"at": "2024-01-01T00:00:00Z", "metadata": null})).unwrap();
        assert!(empty.metadata.is_empty());
    }
}
