//! Per-stage runtime handle.
//!
//! A `Stage` is built once per stage per invocation (the outer driver and
//! the in-namespace worker each construct their own) and carries the
//! stage's resolved configuration: every scalar is template-expanded at
//! construction, shapes are validated up front, and the accessors below
//! are plain reads. The container name is `basename + "_" + name` and is
//! identical across the outer and inner runs of a stage.
//!
//! Only the orchestrator constructs handles; user callbacks receive
//! `&Stage`.

use crate::config::{Callback, Config, Value};
use crate::error::{Result, StagehandError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Runtime handle for one build stage.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    container_name: String,
    mount_point: Option<PathBuf>,
    from_image: String,
    func_exec: Callback,
    func_deps: Option<Callback>,
    consumes: Vec<String>,
    depends: Vec<String>,
    produces: Vec<String>,
    commit: Vec<String>,
    user: Option<String>,
    user_home: Option<String>,
    config: BTreeMap<String, Value>,
}

impl Stage {
    /// Build the handle for `name` from the configuration tree.
    ///
    /// `mount_point` is `Some` only inside the build namespace. Requires
    /// `stages.<name>` to be a mapping carrying at least `from` and
    /// `func_exec`.
    pub(crate) fn new(cx: &Config, name: &str, mount_point: Option<PathBuf>) -> Result<Self> {
        let raw = cx.stage_config(name)?;

        let mut config = BTreeMap::new();
        for (key, value) in raw {
            config.insert(key.clone(), cx.expand_value(value)?);
        }

        let key = |field: &str| format!("stages.{name}.{field}");

        let from_image = match config.get("from") {
            Some(Value::Str(s)) => s.clone(),
            Some(other) => {
                return Err(StagehandError::BadConfigShape {
                    key: key("from"),
                    reason: format!("expected a string, got {}", other.type_name()),
                })
            }
            None => return Err(StagehandError::MissingConfig { key: key("from") }),
        };

        let func_exec = match config.get("func_exec") {
            Some(Value::Func(f)) => f.clone(),
            Some(other) => {
                return Err(StagehandError::BadConfigShape {
                    key: key("func_exec"),
                    reason: format!("expected a callback, got {}", other.type_name()),
                })
            }
            None => return Err(StagehandError::MissingConfig { key: key("func_exec") }),
        };

        let func_deps = match config.get("func_deps") {
            Some(Value::Func(f)) => Some(f.clone()),
            Some(other) => {
                return Err(StagehandError::BadConfigShape {
                    key: key("func_deps"),
                    reason: format!("expected a callback, got {}", other.type_name()),
                })
            }
            None => None,
        };

        let consumes = name_list(&config, "consumes", &key("consumes"))?;
        let depends = name_list(&config, "depends", &key("depends"))?;
        let produces = name_list(&config, "produces", &key("produces"))?;
        let commit = name_list(&config, "commit", &key("commit"))?;

        let user = optional_string(&config, "user", &key("user"))?;
        let user_home = optional_string(&config, "user_home", &key("user_home"))?;

        Ok(Self {
            name: name.to_string(),
            container_name: format!("{}_{}", cx.basename(), name),
            mount_point,
            from_image,
            func_exec,
            func_deps,
            consumes,
            depends,
            produces,
            commit,
            user,
            user_home,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deterministic working-container name for this stage.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// The host path of the container root. `Some` only inside the namespace.
    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    pub fn from_image(&self) -> &str {
        &self.from_image
    }

    pub fn func_exec(&self) -> &Callback {
        &self.func_exec
    }

    pub fn func_deps(&self) -> Option<&Callback> {
        self.func_deps.as_ref()
    }

    /// Stages whose artifact archives this stage imports.
    pub fn consumes(&self) -> &[String] {
        &self.consumes
    }

    /// Ordering-only dependencies.
    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    /// Absolute directories archived at the end of this stage.
    pub fn produces(&self) -> &[String] {
        &self.produces
    }

    /// Image names to commit the working container to, first name first.
    pub fn commit_tags(&self) -> &[String] {
        &self.commit
    }

    /// User to create before consume, `name[=uid][:group[=gid]]`.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn user_home(&self) -> Option<&str> {
        self.user_home.as_deref()
    }

    /// Any other entry of this stage's configuration, expanded.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.config.get(field)
    }
}

/// Read an optional string-or-sequence field as a list of strings.
fn name_list(config: &BTreeMap<String, Value>, field: &str, key: &str) -> Result<Vec<String>> {
    let bad = |got: &Value| StagehandError::BadConfigShape {
        key: key.to_string(),
        reason: format!("expected a string or a sequence of strings, got {}", got.type_name()),
    };
    match config.get(field) {
        None => Ok(Vec::new()),
        Some(Value::Str(s)) => Ok(vec![s.clone()]),
        Some(Value::Seq(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| bad(item)))
            .collect(),
        Some(other) => Err(bad(other)),
    }
}

fn optional_string(
    config: &BTreeMap<String, Value>,
    field: &str,
    key: &str,
) -> Result<Option<String>> {
    match config.get(field) {
        None => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(StagehandError::BadConfigShape {
            key: key.to_string(),
            reason: format!("expected a string, got {}", other.type_name()),
        }),
    }
}
