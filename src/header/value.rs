use serde::Serialize;
use std::fmt;

/// A single weakly-typed header value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    /// Types a token as a number: float when it contains a `.`, int otherwise.
    ///
    /// Returns `None` when the token does not convert.
    pub fn parse_number(token: &str) -> Option<Value> {
        if token.contains('.') {
            token.parse::<f64>().ok().map(Value::Float)
        } else {
            token.parse::<i64>().ok().map(Value::Int)
        }
    }

    /// Types a token as a number, keeping the raw text when it does not convert.
    pub fn from_token(token: &str) -> Value {
        Self::parse_number(token).unwrap_or_else(|| Value::Str(token.to_owned()))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => f.write_str(&format_float(*v)),
            Value::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// Shortest text that parses back to the same `f64`, always carrying a `.`
/// so that it is typed as a float again.
pub(crate) fn format_float(value: f64) -> String {
    let mut text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text
}

/// One logical entry of a header block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Field {
    /// A `#` line or the `end_of_header` sentinel, kept as written.
    Comment(String),
    Scalar(Value),
    Vector(Vec<Value>),
}

impl Field {
    pub fn is_comment(&self) -> bool {
        matches!(self, Field::Comment(_))
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Field::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Field::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Comment(text) => f.write_str(text),
            Field::Scalar(value) => write!(f, "{value}"),
            Field::Vector(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Scalar(value)
    }
}

impl From<Vec<Value>> for Field {
    fn from(values: Vec<Value>) -> Self {
        Field::Vector(values)
    }
}
