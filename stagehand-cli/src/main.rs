//! Pipeline runner for stages declared entirely in YAML.
//!
//! Custom pipelines link `stagehand-core` and register Rust callbacks; this
//! binary covers the simpler case where every stage body is a list of
//! commands to run in the stage's container:
//!
//! ```yaml
//! basename: hello
//! stages:
//!   build:
//!     from: docker://docker.io/alpine:3.20
//!     commands:
//!       - [apk, add, --no-cache, build-base]
//!       - [make, -C, /src, install]
//!     produces: [/opt/hello]
//! ```
//!
//! Each stage gets a synthesized `func_exec` that replays its `commands`
//! through the builder; everything else (ordering, artifacts, commits,
//! logs) is the library's business. The binary re-executes itself for
//! inner mode, so it must resolve its configuration the same way on both
//! sides, which it does by letting the library parse the same arguments.

use anyhow::{bail, Context, Result};
use stagehand_core::{Callback, Params, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let path = match config_arg(&args).or_else(default_config) {
        Some(path) => path,
        None => bail!("no configuration file; pass --config=<path> or provide stagehand.yml"),
    };

    let document = load_document(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let init = build_init(&document)?;

    stagehand_core::run_or_exit(init)
}

/// The `--config` argument, if present (`--config=PATH` or `--config PATH`).
fn config_arg(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
    }
    None
}

fn default_config() -> Option<PathBuf> {
    ["stagehand.yml", "stagehand.yaml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Parse the pipeline file into a configuration tree node.
fn load_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&content)?;

    let mapping = match &yaml {
        serde_yaml::Value::Mapping(_) => &yaml,
        serde_yaml::Value::Sequence(items) => match items.first() {
            Some(first @ serde_yaml::Value::Mapping(_)) => first,
            _ => bail!("sequence form requires a mapping as first element"),
        },
        _ => bail!("top level must be a mapping"),
    };

    Ok(Value::from_yaml("", mapping)?)
}

/// Turn the parsed pipeline into an init map with a synthesized callback
/// per stage.
fn build_init(document: &Value) -> Result<BTreeMap<String, Value>> {
    let Some(root) = document.as_map() else {
        bail!("pipeline document must be a mapping");
    };
    let mut init = root.clone();

    if let Some(Value::Map(stages)) = root.get("stages") {
        let mut wired = BTreeMap::new();
        for (name, stage) in stages {
            let Some(stage_map) = stage.as_map() else {
                // Leave malformed stages alone; the library reports the
                // shape error with full context.
                wired.insert(name.clone(), stage.clone());
                continue;
            };
            let mut stage_map = stage_map.clone();
            stage_map
                .insert("func_exec".to_string(), Value::Func(Callback::new(replay_commands)));
            wired.insert(name.clone(), Value::Map(stage_map));
        }
        init.insert("stages".to_string(), Value::Map(wired));
    }

    Ok(init)
}

/// Synthesized stage body: run the stage's declared `commands` in its
/// container. A stage without `commands` (consume-only, commit-only) is a
/// no-op.
fn replay_commands(
    _cx: &stagehand_core::Config,
    stage: &stagehand_core::Stage,
) -> stagehand_core::Result<()> {
    match stage.get("commands") {
        Some(commands) => stage.run(Params::new(), commands),
        None => Ok(()),
    }
}
