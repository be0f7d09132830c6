use serde_json::Value;

const DISPLAY_VALUE: &str = "display_value";
const VALUE: &str = "value";

/// Resolve a reference field (`assigned_to`, `assignment_group`, ...) to its
/// display string.
///
/// The remote API encodes a linked record either as a plain string or as an
/// object carrying `value` (the internal id) and `display_value`. Objects can
/// also arrive string-encoded. Absent, null and empty references resolve to
/// `""`, as does anything that cannot be decoded.
pub fn extract_display_value(raw: Option<&Value>) -> String {
    match raw {
        None | Some(Value::Null) => String::new(),
        Some(Value::Object(map)) => from_object(map),
        Some(Value::String(s)) => from_string(s),
        Some(_) => String::new(),
    }
}

fn from_string(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('{') {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => from_object(&map),
            _ => String::new(),
        };
    }
    s.to_string()
}

/// `value` is only consulted when `display_value` is absent; an empty or
/// non-string `display_value` never exposes the raw id.
fn from_object(map: &serde_json::Map<String, Value>) -> String {
    let field = match map.get(DISPLAY_VALUE) {
        Some(display) => display,
        None => match map.get(VALUE) {
            Some(value) => value,
            None => return String::new(),
        },
    };
    match field {
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}
