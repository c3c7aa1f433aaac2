//! The canonical serialisation that defines the transaction hash.
//!
//! The agent hashes a row at ingestion time; the verifier recomputes the
//! same hash later from the live row. The byte string produced here is
//! therefore a wire contract: keys are emitted in ascending byte order
//! with `,`/`:` separators and no whitespace, and `_at`-suffixed epoch
//! timestamps are rewritten as UTC datetime strings before serialisation.
//! The UTC conversion is deliberate; both sides of the contract must use
//! it regardless of the host timezone.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::hash::sha256_hex;

/// Smallest value treated as an epoch timestamp (13 decimal digits, ms).
const EPOCH_MS_FLOOR: i64 = 1_000_000_000_000;

/// Values at or above this are epoch microseconds (16+ decimal digits).
const EPOCH_US_FLOOR: i64 = 1_000_000_000_000_000;

/// Transaction hash of a row payload: lowercase hex sha-256 over the
/// canonical bytes of the timestamp-normalised payload.
pub fn transaction_hash(payload: &Value) -> String {
    let normalized = normalize_row(payload);
    sha256_hex(canonical_json(&normalized).as_bytes())
}

/// Rewrite `_at`-suffixed epoch fields of a row payload as UTC strings.
///
/// Strings are left alone (the source already serialised them); numbers
/// above the millisecond floor are converted. Other keys and non-object
/// payloads pass through unchanged.
pub fn normalize_row(payload: &Value) -> Value {
    let Value::Object(map) = payload else {
        return payload.clone();
    };
    let mut normalized = map.clone();
    for (key, value) in normalized.iter_mut() {
        if !key.ends_with("_at") {
            continue;
        }
        if let Value::Number(number) = value {
            let epoch = number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f as i64));
            if let Some(converted) = epoch.filter(|n| *n > EPOCH_MS_FLOOR).and_then(epoch_to_string)
            {
                *value = Value::String(converted);
            }
        }
    }
    Value::Object(normalized)
}

/// Format an epoch value as `YYYY-MM-DDTHH:MM:SS.ffffff` in UTC with
/// trailing zeros stripped from the fraction and at least millisecond
/// precision guaranteed (`.000` when the fraction is empty).
fn epoch_to_string(epoch: i64) -> Option<String> {
    let datetime: DateTime<Utc> = if epoch >= EPOCH_US_FLOOR {
        DateTime::from_timestamp_micros(epoch)?
    } else {
        DateTime::from_timestamp_millis(epoch)?
    };
    let mut text = datetime.format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    if !text.contains('.') {
        text.push_str(".000");
    }
    Some(text)
}

/// Serialise a JSON value with ascending key order, `,`/`:` separators and
/// no whitespace. A single traversal; independent of any map ordering
/// behaviour of the JSON library.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => out.push_str(&number.to_string()),
        Value::String(text) => write_string(text, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_string(text: &str, out: &mut String) {
    // serde_json applies the JSON string escaping rules; serialising a
    // bare string cannot fail.
    out.push_str(&serde_json::to_string(text).expect("string serialisation cannot fail"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ------------------------------------------------------------------
    // Canonical JSON emission
    // ------------------------------------------------------------------

    #[test]
    fn keys_are_sorted_with_compact_separators() {
        let value = json!({"b": 1, "a": {"d": 2, "c": [1, null, true]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"c":[1,null,true],"d":2},"b":1}"#);
    }

    #[test]
    fn strings_are_escaped() {
        let value = json!({"note": "a\"b\nc"});
        assert_eq!(canonical_json(&value), r#"{"note":"a\"b\nc"}"#);
    }

    #[test]
    fn canonicalisation_is_deterministic() {
        let value = json!({"z": 1, "a": [3, 2, 1], "m": {"x": "y"}});
        assert_eq!(canonical_json(&value), canonical_json(&value));
    }

    // ------------------------------------------------------------------
    // `_at` timestamp normalisation
    // ------------------------------------------------------------------

    #[test]
    fn epoch_millis_become_utc_strings() {
        let normalized = normalize_row(&json!({"created_at": 1749877844134_i64}));
        assert_eq!(normalized["created_at"], json!("2025-06-14T05:10:44.134"));
    }

    #[test]
    fn epoch_micros_become_utc_strings() {
        let normalized = normalize_row(&json!({"updated_at": 1749877844134567_i64}));
        assert_eq!(normalized["updated_at"], json!("2025-06-14T05:10:44.134567"));
    }

    #[test]
    fn whole_seconds_keep_millisecond_precision() {
        let normalized = normalize_row(&json!({"created_at": 1749877844000_i64}));
        assert_eq!(normalized["created_at"], json!("2025-06-14T05:10:44.000"));
    }

    #[test]
    fn string_timestamps_are_left_alone() {
        let payload = json!({"created_at": "2025-06-14T05:10:44.134"});
        assert_eq!(normalize_row(&payload), payload);
    }

    #[test]
    fn small_numbers_are_not_timestamps() {
        // An `_at` column holding an ordinary number stays numeric.
        let payload = json!({"looked_at": 42});
        assert_eq!(normalize_row(&payload), payload);
    }

    #[test]
    fn non_at_keys_are_untouched() {
        let payload = json!({"timestamp": 1749877844134_i64});
        assert_eq!(normalize_row(&payload), payload);
    }

    #[test]
    fn normalisation_round_trips_through_the_string_form() {
        // Hashing the epoch form and hashing its own string rendering must
        // agree, for any millisecond value in the 13-digit range.
        for epoch in [1749877844134_i64, 1700000000001, 1999999999999, 1749877844000] {
            let rendered = normalize_row(&json!({ "created_at": epoch }));
            let hash_from_epoch = transaction_hash(&json!({ "created_at": epoch }));
            let hash_from_string = transaction_hash(&rendered);
            assert_eq!(hash_from_epoch, hash_from_string, "epoch {epoch}");
        }
    }

    // ------------------------------------------------------------------
    // Transaction hash
    // ------------------------------------------------------------------

    #[test]
    fn single_insert_canonical_form() {
        let payload = json!({"id": 1, "name": "A", "created_at": 1749877844134_i64});
        let normalized = normalize_row(&payload);
        assert_eq!(
            canonical_json(&normalized),
            r#"{"created_at":"2025-06-14T05:10:44.134","id":1,"name":"A"}"#
        );
    }

    #[test]
    fn hash_is_sha256_of_canonical_bytes() {
        let payload = json!({"id": 1});
        assert_eq!(
            transaction_hash(&payload),
            crate::hash::sha256_hex(br#"{"id":1}"#)
        );
    }

    #[test]
    fn hash_is_deterministic() {
        let payload = json!({"id": 7, "amount": 10000, "created_at": 1749877844134_i64});
        assert_eq!(transaction_hash(&payload), transaction_hash(&payload));
    }

    #[test]
    fn hash_changes_with_any_field() {
        let base = json!({"id": 7, "amount": 10000});
        let tampered = json!({"id": 7, "amount": 10001});
        assert_ne!(transaction_hash(&base), transaction_hash(&tampered));
    }
}
