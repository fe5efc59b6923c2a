use serde_json::Value;

/// Largest integer an IEEE double holds exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Decides whether an actual output matches the expected one
///
/// When both sides (trimmed) open with `[` or `{` and both parse as JSON, they
/// are compared by [`canonical_json`]. Otherwise the trimmed strings must be
/// identical.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();

    if looks_structured(actual) && looks_structured(expected) {
        if let (Ok(actual_value), Ok(expected_value)) = (
            serde_json::from_str::<Value>(actual),
            serde_json::from_str::<Value>(expected),
        ) {
            return canonical_json(&actual_value) == canonical_json(&expected_value);
        }
    }
    actual == expected
}

fn looks_structured(text: &str) -> bool {
    text.starts_with('[') || text.starts_with('{')
}

/// Deterministic JSON encoding used for structured equality
///
/// Object keys are sorted, array order is kept, and integral floats are written
/// as integers so `1.0` and `1` agree the way they do in JavaScript.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(number) => match number.as_f64() {
            Some(f) if number.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
                out.push_str(&(f as i64).to_string());
            }
            _ => out.push_str(&number.to_string()),
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}
