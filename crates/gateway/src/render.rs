//! Parameter rendering: `{name}` placeholders to SQL literals.
//!
//! Rendering is the only place user-supplied values enter SQL text. Strings
//! are single-quoted with embedded quotes doubled; numbers and booleans are
//! emitted bare. Placeholders without a bound parameter stay verbatim, and
//! substituted text is never rescanned.

use std::collections::BTreeMap;

/// A bound query parameter, typed once at the API boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Convert a JSON value, rejecting types that have no SQL literal form.
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Self, RenderError> {
        match value {
            serde_json::Value::String(s) => Ok(ParamValue::String(s.clone())),
            serde_json::Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ParamValue::Int(i))
                } else if n.is_u64() {
                    Err(RenderError::UnsupportedType {
                        name: name.to_string(),
                        found: "integer out of 64-bit signed range",
                    })
                } else {
                    n.as_f64()
                        .map(ParamValue::Float)
                        .ok_or_else(|| RenderError::UnsupportedType {
                            name: name.to_string(),
                            found: "number",
                        })
                }
            }
            serde_json::Value::Null => Err(RenderError::UnsupportedType {
                name: name.to_string(),
                found: "null",
            }),
            serde_json::Value::Array(_) => Err(RenderError::UnsupportedType {
                name: name.to_string(),
                found: "array",
            }),
            serde_json::Value::Object(_) => Err(RenderError::UnsupportedType {
                name: name.to_string(),
                found: "object",
            }),
        }
    }

    /// The literal this value renders to.
    pub fn to_sql_literal(&self, name: &str) -> Result<String, RenderError> {
        match self {
            ParamValue::String(s) => Ok(quote_string(s)),
            ParamValue::Int(i) => Ok(i.to_string()),
            ParamValue::Float(f) if f.is_finite() => Ok(f.to_string()),
            ParamValue::Float(_) => Err(RenderError::NonFiniteFloat {
                name: name.to_string(),
            }),
            ParamValue::Bool(b) => Ok(b.to_string()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Errors raised while turning parameters into SQL text. Always a caller error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("parameter '{name}' has unsupported type: {found}")]
    UnsupportedType { name: String, found: &'static str },

    #[error("parameter '{name}' is not a finite number")]
    NonFiniteFloat { name: String },

    #[error("parameters must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}

/// Convert a JSON object of parameters into typed values.
pub fn params_from_json(
    value: &serde_json::Value,
) -> Result<BTreeMap<String, ParamValue>, RenderError> {
    let object = value.as_object().ok_or(RenderError::NotAnObject {
        found: json_kind(value),
    })?;
    object
        .iter()
        .map(|(name, v)| Ok((name.clone(), ParamValue::from_json(name, v)?)))
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Single-quote a string, doubling every embedded single quote.
fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Substitute `{name}` placeholders in `template` with parameter literals.
pub fn render(
    template: &str,
    parameters: &BTreeMap<String, ParamValue>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match placeholder_name(after) {
            Some(name) => {
                match parameters.get(name) {
                    Some(value) => out.push_str(&value.to_sql_literal(name)?),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match placeholder_name(after) {
            Some(name) => {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
                rest = &after[name.len() + 1..];
            }
            None => rest = after,
        }
    }
    names
}

/// If `s` starts with `identifier}`, return the identifier.
fn placeholder_name(s: &str) -> Option<&str> {
    let end = s.find('}')?;
    let name = &s[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}
