//! Scalar values carried by filters, partition specs, delete indicators and result rows.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single relational value.
///
/// Timestamps are represented as strings in the canonical `%Y-%m-%d %H:%M:%S%.6f`
/// format so that ordering on strings matches ordering in time.
///
/// `ScalarValue` has a total order: numbers compare numerically across `Int` and `Float`,
/// values of different kinds order as `Null < Boolean < number < String`.
///
/// # Examples
///
/// ```
/// use sluice_schemas::ScalarValue;
///
/// assert!(ScalarValue::Int(2) > ScalarValue::Float(1.5));
/// assert_eq!(ScalarValue::from("a"), ScalarValue::String("a".to_string()));
/// assert!(ScalarValue::Null.is_null());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema_gen", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum ScalarValue {
    #[default]
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ScalarValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Integer view of the value, parsing strings and truncating floats
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(value) => Some(*value),
            ScalarValue::Float(value) => Some(*value as i64),
            ScalarValue::String(value) => value.trim().parse().ok(),
            ScalarValue::Boolean(_) | ScalarValue::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(value) => Some(*value as f64),
            ScalarValue::Float(value) => Some(*value),
            ScalarValue::String(value) => value.trim().parse().ok(),
            ScalarValue::Boolean(_) | ScalarValue::Null => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ScalarValue::Null => 0,
            ScalarValue::Boolean(_) => 1,
            ScalarValue::Int(_) | ScalarValue::Float(_) => 2,
            ScalarValue::String(_) => 3,
        }
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => a.cmp(b),
            (ScalarValue::Int(a), ScalarValue::Int(b)) => a.cmp(b),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.total_cmp(b),
            (ScalarValue::Int(a), ScalarValue::Float(b)) => (*a as f64).total_cmp(b),
            (ScalarValue::Float(a), ScalarValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (ScalarValue::String(a), ScalarValue::String(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            ScalarValue::Null => {}
            ScalarValue::Boolean(value) => value.hash(state),
            // Int and Float compare equal across kinds, so both hash the f64 bits
            ScalarValue::Int(value) => (*value as f64).to_bits().hash(state),
            ScalarValue::Float(value) => {
                let normalized = if *value == 0.0 { 0.0 } else { *value };
                normalized.to_bits().hash(state)
            }
            ScalarValue::String(value) => value.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(value) => write!(f, "{value}"),
            ScalarValue::Int(value) => write!(f, "{value}"),
            ScalarValue::Float(value) => write!(f, "{value}"),
            ScalarValue::String(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int(value.into())
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::String(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<ScalarValue> for serde_json::Value {
    fn from(value: ScalarValue) -> Self {
        match value {
            ScalarValue::Null => serde_json::Value::Null,
            ScalarValue::Boolean(value) => serde_json::Value::Bool(value),
            ScalarValue::Int(value) => serde_json::Value::from(value),
            ScalarValue::Float(value) => serde_json::Number::from_f64(value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ScalarValue::String(value) => serde_json::Value::String(value),
        }
    }
}

impl From<serde_json::Value> for ScalarValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ScalarValue::Null,
            serde_json::Value::Bool(value) => ScalarValue::Boolean(value),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(value) => ScalarValue::Int(value),
                None => number
                    .as_f64()
                    .map(ScalarValue::Float)
                    .unwrap_or(ScalarValue::Null),
            },
            serde_json::Value::String(value) => ScalarValue::String(value),
            nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                ScalarValue::String(nested.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn numbers_compare_across_kinds() {
        assert_eq!(ScalarValue::Int(1), ScalarValue::Float(1.0));
        assert!(ScalarValue::Int(1) < ScalarValue::Float(1.5));
        assert!(ScalarValue::Null < ScalarValue::Int(i64::MIN));
    }

    #[test]
    fn equal_numbers_hash_alike() {
        let set: HashSet<ScalarValue> = [ScalarValue::Int(3), ScalarValue::Float(3.0)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn deserializes_untagged() {
        let values: Vec<ScalarValue> = serde_json::from_str(r#"[null, true, 1, 1.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ScalarValue::Null,
                ScalarValue::Boolean(true),
                ScalarValue::Int(1),
                ScalarValue::Float(1.5),
                ScalarValue::String("x".into())
            ]
        );
    }
}
