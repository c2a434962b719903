//! The configuration value tree.
//!
//! Interior nodes are string-keyed maps, leaves are scalars, sequences, or
//! callback handles. YAML data files convert losslessly into this tree;
//! callbacks can only enter it through the init map, since a data file has
//! no way to express them.

use crate::config::Config;
use crate::error::{Result, StagehandError};
use crate::stage::Stage;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A stage callback handle.
///
/// Wraps the user's build function so it can live inside the configuration
/// tree next to plain scalars. The driver is single-threaded, so a plain
/// `Rc` suffices.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(&Config, &Stage) -> Result<()>>);

impl Callback {
    /// Wrap a closure as a callback handle.
    pub fn new(f: impl Fn(&Config, &Stage) -> Result<()> + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callback for a stage.
    pub fn call(&self, config: &Config, stage: &Stage) -> Result<()> {
        (self.0)(config, stage)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A node in the configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Func(Callback),
}

impl Value {
    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
            Value::Func(_) => "callback",
        }
    }

    /// True for string, integer, and boolean leaves.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Str(_) | Value::Int(_) | Value::Bool(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_func(&self) -> Option<&Callback> {
        match self {
            Value::Func(f) => Some(f),
            _ => None,
        }
    }

    /// Render a scalar leaf as a string.
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Build a mapping node from key/value pairs.
    pub fn map<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a sequence node.
    pub fn seq<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::Seq(items.into_iter().collect())
    }

    /// Convert a parsed YAML document into a tree node.
    ///
    /// `key` names the position in the tree for diagnostics. Nulls, floats,
    /// and tagged values have no counterpart in the tree and are rejected.
    pub fn from_yaml(key: &str, yaml: &serde_yaml::Value) -> Result<Value> {
        match yaml {
            serde_yaml::Value::String(s) => Ok(Value::Str(s.clone())),
            serde_yaml::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => Err(StagehandError::BadConfigShape {
                    key: key.to_string(),
                    reason: format!("non-integer number {n} is not supported"),
                }),
            },
            serde_yaml::Value::Sequence(items) => {
                let mut seq = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    seq.push(Value::from_yaml(&format!("{key}[{i}]"), item)?);
                }
                Ok(Value::Seq(seq))
            }
            serde_yaml::Value::Mapping(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let k = k.as_str().ok_or_else(|| StagehandError::BadConfigShape {
                        key: key.to_string(),
                        reason: format!("mapping key {k:?} is not a string"),
                    })?;
                    map.insert(k.to_string(), Value::from_yaml(&format!("{key}.{k}"), v)?);
                }
                Ok(Value::Map(map))
            }
            serde_yaml::Value::Null => Err(StagehandError::BadConfigShape {
                key: key.to_string(),
                reason: "null is not a supported configuration value".to_string(),
            }),
            serde_yaml::Value::Tagged(t) => Err(StagehandError::BadConfigShape {
                key: key.to_string(),
                reason: format!("tagged value !{} is not supported", t.tag),
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Callback> for Value {
    fn from(f: Callback) -> Self {
        Value::Func(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_conversion() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            r#"
basename: hello
retries: 3
verbose: true
mirrors:
  - one
  - two
"#,
        )
        .unwrap();

        let value = Value::from_yaml("", &yaml).unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["basename"], Value::Str("hello".to_string()));
        assert_eq!(map["retries"], Value::Int(3));
        assert_eq!(map["verbose"], Value::Bool(true));
        assert_eq!(map["mirrors"].as_seq().unwrap().len(), 2);
    }

    #[test]
    fn test_yaml_rejects_null() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("key: ~").unwrap();
        let err = Value::from_yaml("", &yaml).unwrap_err();
        assert!(matches!(err, StagehandError::BadConfigShape { .. }));
    }

    #[test]
    fn test_yaml_rejects_float() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("pi: 3.14").unwrap();
        assert!(Value::from_yaml("", &yaml).is_err());
    }

    #[test]
    fn test_scalar_string() {
        assert_eq!(Value::Str("x".into()).scalar_string().unwrap(), "x");
        assert_eq!(Value::Int(7).scalar_string().unwrap(), "7");
        assert_eq!(Value::Bool(false).scalar_string().unwrap(), "false");
        assert!(Value::seq([]).scalar_string().is_none());
    }
}
