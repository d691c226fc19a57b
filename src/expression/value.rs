//! Runtime values bound to variables and produced by formulas.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Name -> value map a condition is evaluated against.
pub type Bindings = HashMap<String, Value>;

/// Declared type of a variable, operand or formula result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    /// Either `Int` or `Float`; only known once evaluated.
    Number,
    Str,
    List,
    Time,
    /// Dynamically typed, e.g. an open extra field.
    Any,
}

impl ValueType {
    /// Whether a value declared as `actual` may stand where `self` is expected.
    ///
    /// `Null` is accepted everywhere so optional fields can be bound.
    pub fn accepts(self, actual: ValueType) -> bool {
        if self == actual || actual == ValueType::Null {
            return true;
        }
        if self == ValueType::Any || actual == ValueType::Any {
            return true;
        }
        matches!(
            (self, actual),
            (ValueType::Number, ValueType::Int | ValueType::Float)
                | (ValueType::Int | ValueType::Float, ValueType::Number)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Number => "number",
            ValueType::Str => "str",
            ValueType::List => "list",
            ValueType::Time => "time",
            ValueType::Any => "any",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<String>),
    Time(DateTime<Utc>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::List(_) => ValueType::List,
            Value::Time(_) => ValueType::Time,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Equality with int/float promotion. Values of unrelated types are unequal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }

    /// Ordering between comparable values; `None` when the pair has no order.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Sort key ordering: nulls first, then by `compare`, incomparable pairs tie.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.compare(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Membership test: substring for strings, element for lists.
    pub fn contains(&self, needle: &Value) -> Option<bool> {
        match (self, needle) {
            (Value::Str(haystack), Value::Str(needle)) => Some(haystack.contains(needle.as_str())),
            (Value::List(items), Value::Str(needle)) => Some(items.iter().any(|item| item == needle)),
            (Value::List(items), Value::List(needles)) => {
                Some(needles.iter().all(|needle| items.contains(needle)))
            }
            _ => None,
        }
    }

    /// Convert a JSON value; objects and mixed arrays have no counterpart.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_json::Value::String(s) => Some(Value::Str(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Object(_) => None,
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, raw: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in raw.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    write!(f, "{value:.1}")
                } else {
                    write!(f, "{value}")
                }
            }
            Value::Str(value) => write_quoted(f, value),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write_quoted(f, item)?;
                }
                f.write_str("]")
            }
            Value::Time(value) => {
                write_quoted(f, &value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Int(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        i64::try_from(value)
            .map(Value::Int)
            .unwrap_or(Value::Float(value as f64))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Str(value.clone())
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::List(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Time(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn numbers_compare_across_int_and_float() {
        assert!(Value::Int(2).loose_eq(&Value::Float(2.0)));
        assert_eq!(
            Value::Int(1).compare(&Value::Float(1.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn unrelated_types_have_no_order() {
        assert_eq!(Value::Int(1).compare(&Value::from("1")), None);
        assert!(!Value::Int(1).loose_eq(&Value::from("1")));
    }

    #[test]
    fn contains_handles_strings_and_lists() {
        let tags = Value::List(vec!["home".to_string(), "work".to_string()]);
        assert_eq!(tags.contains(&Value::from("work")), Some(true));
        assert_eq!(Value::from("Python").contains(&Value::from("th")), Some(true));
        assert_eq!(Value::Int(3).contains(&Value::Int(3)), None);
    }

    #[test]
    fn nulls_sort_first() {
        let mut values = vec![Value::Int(3), Value::Null, Value::Int(1)];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values, vec![Value::Null, Value::Int(1), Value::Int(3)]);
    }

    #[test]
    fn display_quotes_strings_and_times() {
        assert_eq!(Value::from("a\"b").to_string(), "\"a\\\"b\"");
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(Value::from(at).to_string(), "\"2024-03-01T12:00:00Z\"");
    }

    #[test]
    fn number_accepts_concrete_numerics() {
        assert!(ValueType::Int.accepts(ValueType::Number));
        assert!(ValueType::Number.accepts(ValueType::Float));
        assert!(ValueType::Time.accepts(ValueType::Null));
        assert!(!ValueType::Int.accepts(ValueType::Str));
        assert!(ValueType::Any.accepts(ValueType::List));
    }
}
