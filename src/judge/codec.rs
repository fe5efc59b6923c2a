use serde_json::Value;

use crate::sandbox::protocol::ReturnedValue;

/// Turns a declared case input into the value handed to the function
///
/// Inputs opening with `[` or `{` are tried as JSON first; anything else, or
/// anything that fails to parse, is passed as a literal string.
pub fn decode_input(input: &str) -> Value {
    if input.starts_with('[') || input.starts_with('{') {
        if let Ok(value) = serde_json::from_str(input) {
            return value;
        }
    }
    Value::String(input.to_string())
}

/// Renders a returned value the way it is reported as `actualOutput`
pub fn encode_output(value: &ReturnedValue) -> String {
    match value {
        ReturnedValue::Undefined => "undefined".to_string(),
        ReturnedValue::Structured { value } => value.to_string(),
        ReturnedValue::Scalar { text } => text.clone(),
    }
}
