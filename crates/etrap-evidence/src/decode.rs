//! Recovery of semantic values from the CDC wire encoding.
//!
//! The CDC connector emits non-string column types (numerics, bytea, some
//! timestamps) as base64-looking text. The decoder turns such strings back
//! into the value the database itself would report and passes everything
//! else through untouched. The decision tree is explicit; no probing by
//! trial and error.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

/// Integers recovered from 1-8 decoded bytes are accepted only below this
/// bound; anything larger falls through to the text interpretations.
const MAX_PLAUSIBLE_INT: u64 = 1_000_000_000_000;

/// Share of printable characters a Latin-1 interpretation must exceed.
const MIN_PRINTABLE_RATIO: f64 = 0.8;

/// Decode every leaf of a record, preserving the container shape.
pub fn decode_record(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, decode_record(item)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(decode_record).collect()),
        leaf => decode_value(leaf),
    }
}

/// Decode a single wire value.
///
/// A string is a decoding candidate only if it is non-empty, its last byte
/// is `=` and every character is in the base64 alphabet. Candidates decode
/// to, in order of preference: a small big-endian integer (1-8 bytes, in
/// `(0, 10^12)`), a UTF-8 string, a mostly-printable Latin-1 string, or
/// the original text when nothing applies.
pub fn decode_value(value: Value) -> Value {
    let Value::String(ref text) = value else {
        return value;
    };
    if !is_base64_candidate(text) {
        return value;
    }
    let Ok(decoded) = BASE64.decode(text) else {
        return value;
    };

    if (1..=8).contains(&decoded.len()) {
        let mut n: u64 = 0;
        for byte in &decoded {
            n = (n << 8) | u64::from(*byte);
        }
        if n > 0 && n < MAX_PLAUSIBLE_INT {
            return Value::from(n);
        }
    }

    match String::from_utf8(decoded) {
        Ok(utf8) => Value::String(utf8),
        Err(err) => {
            let latin1: String = err.into_bytes().iter().map(|&b| b as char).collect();
            if mostly_printable(&latin1) {
                Value::String(latin1)
            } else {
                value
            }
        }
    }
}

fn is_base64_candidate(text: &str) -> bool {
    !text.is_empty()
        && text.ends_with('=')
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// Strictly more than 80 % of the characters must be printable.
fn mostly_printable(text: &str) -> bool {
    let total = text.chars().count();
    let printable = text.chars().filter(|&c| is_printable(c)).count();
    printable as f64 > total as f64 * MIN_PRINTABLE_RATIO
}

/// Printable in the `str.isprintable` sense: controls, format characters
/// and separators other than the ASCII space do not count. The inputs here
/// are Latin-1 code points, where that set is the C0/C1 controls, the
/// no-break space and the soft hyphen.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !(c.is_control() || c.is_whitespace() || c == '\u{00ad}')
}
