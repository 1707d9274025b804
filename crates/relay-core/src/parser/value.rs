use std::collections::BTreeMap;
use std::fmt;

// ==============================================================================
// Value
// ==============================================================================

/// A decoded request or response payload.
///
/// Mirrors JSON, plus `Raw` for result bytes that did not decode as a JSON
/// object and are carried through untouched as an opaque scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Raw(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Raw(_) => "raw",
        }
    }

    /// Canonical text form of a terminal value.
    ///
    /// Strings pass through, integers are base 10, floats carry neither an
    /// exponent nor trailing zeros. Everything else falls back to its JSON text
    /// (raw bytes as lossy UTF-8).
    pub fn stringify(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => format_number(n),
            Self::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            other => other.to_string(),
        }
    }
}

fn format_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    // `Display` for f64 never switches to exponent notation and prints the
    // shortest representation that round-trips.
    n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", format_number(n)),
            Self::String(s) => write!(f, "{}", serde_json::Value::String(s.clone())),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}:{item}", serde_json::Value::String(key.clone()))?;
                }
                write!(f, "}}")
            }
            Self::Raw(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringify_formats_numbers_without_exponent() {
        assert_eq!(Value::from(json!(1e21)).stringify(), "1000000000000000000000");
        assert_eq!(Value::from(json!(2.50)).stringify(), "2.5");
        assert_eq!(Value::from(json!(100.0)).stringify(), "100");
        assert_eq!(Value::from(json!(-42)).stringify(), "-42");
        assert_eq!(Value::from(json!(u64::MAX)).stringify(), u64::MAX.to_string());
    }

    #[test]
    fn stringify_falls_back_to_json_text() {
        assert_eq!(Value::from(json!(true)).stringify(), "true");
        assert_eq!(Value::Null.stringify(), "null");
        assert_eq!(Value::from(json!({"b": 1, "a": "x"})).stringify(), r#"{"a":"x","b":1}"#);
        assert_eq!(Value::Raw(b"\"0x10\"".to_vec()).stringify(), "\"0x10\"");
    }
}
