//! Root configuration tree.
//!
//! One `Config` is built per process from the user's init map overlaid on
//! an optional YAML data file. It is written during initialization and
//! argument post-processing, then read-only for the rest of the run; stage
//! callbacks only ever see `&Config`.
//!
//! Scalar and sequence reads pass through `[% … %]` template expansion
//! against the tree root.

mod expand;
mod value;

pub use value::{Callback, Value};

use crate::error::{Result, StagehandError};
use chrono::Local;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Timestamp format shared by the log tree and the re-exec environment.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Process configuration for one driver invocation.
#[derive(Debug, Clone)]
pub struct Config {
    root: BTreeMap<String, Value>,
    basename: String,
    timestamp_str: String,
    workdir: PathBuf,
    debug: u32,
}

impl Config {
    /// Build the configuration tree.
    ///
    /// Starts empty, installs the data file (a mapping, or a sequence whose
    /// first element is a mapping), then overlays every top-level key of
    /// `init` (init wins). `timestamp_str` is inherited from
    /// `<BASENAME>_TIMESTAMP_STR` when the invocation is a re-execution,
    /// otherwise stamped from the local clock and exported for children.
    pub fn new(init: BTreeMap<String, Value>, data_file: Option<&Path>) -> Result<Self> {
        let mut root = BTreeMap::new();
        let mut config_files = Vec::new();

        if let Some(path) = data_file {
            root = load_data_file(path)?;
            config_files.push(Value::Str(path.to_string_lossy().into_owned()));
        }

        for (key, value) in init {
            root.insert(key, value);
        }

        let basename = match root.get("basename") {
            Some(Value::Str(s)) if !s.is_empty() => s.clone(),
            Some(other) => {
                return Err(StagehandError::BadConfigShape {
                    key: "basename".to_string(),
                    reason: format!("expected a non-empty string, got {}", other.type_name()),
                })
            }
            None => return Err(StagehandError::MissingConfig { key: "basename".to_string() }),
        };

        let env_var = timestamp_env_var(&basename);
        let timestamp_str = match std::env::var(&env_var) {
            Ok(inherited) if !inherited.is_empty() => inherited,
            _ => {
                let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
                std::env::set_var(&env_var, &now);
                now
            }
        };
        debug!(%basename, %timestamp_str, "configuration tree built");

        root.insert("timestamp_str".to_string(), Value::Str(timestamp_str.clone()));
        root.insert("_config_files".to_string(), Value::Seq(config_files));
        root.insert("arch".to_string(), Value::Str(std::env::consts::ARCH.to_string()));

        let workdir = std::env::current_dir().map_err(|e| StagehandError::io(".", e))?;

        Ok(Self { root, basename, timestamp_str, workdir, debug: 0 })
    }

    /// Override the invocation working directory (archives and logs land here).
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    pub fn timestamp_str(&self) -> &str {
        &self.timestamp_str
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn get_debug(&self) -> u32 {
        self.debug
    }

    pub fn set_debug(&mut self, level: u32) {
        self.debug = level;
    }

    /// Raw navigation without expansion. `None` when any step is missing.
    pub fn try_get(&self, path: &[&str]) -> Option<&Value> {
        let (last, parents) = path.split_last()?;
        let mut map = &self.root;
        for key in parents {
            map = map.get(*key)?.as_map()?;
        }
        map.get(*last)
    }

    /// Navigate the tree by keys and return the value at the end.
    ///
    /// Scalars are expanded; sequences are expanded element-wise. Mappings
    /// and callbacks are returned as-is.
    pub fn get(&self, path: &[&str]) -> Result<Value> {
        let value = self.try_get(path).ok_or_else(|| StagehandError::MissingConfig {
            key: path.join("."),
        })?;
        self.expand_value(value)
    }

    /// Expand a value that was read from this tree.
    pub(crate) fn expand_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Str(s) => Ok(Value::Str(expand::expand(&self.root, s)?)),
            Value::Seq(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.expand_value(item)?);
                }
                Ok(Value::Seq(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// `get` narrowed to a string leaf.
    pub fn get_str(&self, path: &[&str]) -> Result<String> {
        match self.get(path)? {
            Value::Str(s) => Ok(s),
            other => Err(StagehandError::BadConfigShape {
                key: path.join("."),
                reason: format!("expected a string, got {}", other.type_name()),
            }),
        }
    }

    /// Fail fatally unless every listed top-level key is present.
    pub fn required_config(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            if !self.root.contains_key(*key) {
                return Err(StagehandError::MissingConfig { key: key.to_string() });
            }
        }
        Ok(())
    }

    /// The files whose modification times gate artifact freshness.
    pub fn config_files(&self) -> Vec<PathBuf> {
        self.try_get(&["_config_files"])
            .and_then(Value::as_seq)
            .map(|seq| seq.iter().filter_map(Value::as_str).map(PathBuf::from).collect())
            .unwrap_or_default()
    }

    /// Install a synthesized top-level key (argv, opts, added option values).
    pub(crate) fn set_top(&mut self, key: &str, value: Value) {
        self.root.insert(key.to_string(), value);
    }

    /// The `stages` mapping, shape-checked.
    pub(crate) fn stages(&self) -> Result<&BTreeMap<String, Value>> {
        match self.root.get("stages") {
            Some(Value::Map(m)) => Ok(m),
            Some(other) => Err(StagehandError::BadConfigShape {
                key: "stages".to_string(),
                reason: format!("expected a mapping, got {}", other.type_name()),
            }),
            None => Err(StagehandError::MissingConfig { key: "stages".to_string() }),
        }
    }

    /// One stage's configuration mapping.
    pub(crate) fn stage_config(&self, name: &str) -> Result<&BTreeMap<String, Value>> {
        match self.stages()?.get(name) {
            Some(Value::Map(m)) => Ok(m),
            Some(other) => Err(StagehandError::BadConfigShape {
                key: format!("stages.{name}"),
                reason: format!("expected a mapping, got {}", other.type_name()),
            }),
            None => Err(StagehandError::MissingConfig { key: format!("stages.{name}") }),
        }
    }
}

/// Environment variable carrying `timestamp_str` across re-execution.
pub(crate) fn timestamp_env_var(basename: &str) -> String {
    let mut var: String = basename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    var.push_str("_TIMESTAMP_STR");
    var
}

fn load_data_file(path: &Path) -> Result<BTreeMap<String, Value>> {
    let content = std::fs::read_to_string(path).map_err(|e| StagehandError::io(path, e))?;
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| StagehandError::InvalidConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    // A mapping is used directly; a sequence is accepted when its first
    // element is a mapping (multi-document convenience form).
    let mapping = match &yaml {
        serde_yaml::Value::Mapping(_) => &yaml,
        serde_yaml::Value::Sequence(items) => match items.first() {
            Some(first @ serde_yaml::Value::Mapping(_)) => first,
            _ => {
                return Err(StagehandError::InvalidConfigFile {
                    path: path.to_path_buf(),
                    reason: "sequence form requires a mapping as first element".to_string(),
                })
            }
        },
        _ => {
            return Err(StagehandError::InvalidConfigFile {
                path: path.to_path_buf(),
                reason: "top level must be a mapping".to_string(),
            })
        }
    };

    match Value::from_yaml("", mapping)? {
        Value::Map(map) => Ok(map),
        _ => unreachable!("mapping conversion always yields a map"),
    }
}
