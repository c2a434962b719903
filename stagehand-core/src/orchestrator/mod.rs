//! Top-level stage orchestration.
//!
//! One driver binary serves two roles. The *outer* driver plans the stage
//! order and, for each stage, creates the working container and re-executes
//! itself through `buildah unshare` so the child lands inside the
//! container's user namespace with the root mounted. That *inner* worker,
//! recognized by `--internal=<stage>`, runs the stage body:
//! `func_deps`, consume, `func_exec`, produce.
//!
//! The mount path crosses into the inner process via the environment
//! variable named by [`MOUNT_ENV`]; the invocation timestamp crosses via
//! `<BASENAME>_TIMESTAMP_STR`.

mod logging;

use crate::artifact;
use crate::builder::{builder_command, global, Params};
use crate::config::{Config, Value};
use crate::error::{Result, StagehandError};
use crate::plan;
use crate::process::{run as run_process, RunOptions};
use crate::stage::Stage;
use clap::{Arg, ArgAction, Command};
use self::logging::{stage_log_dir, RedirectGuard};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, Level};

/// Environment variable carrying the container mount path into the inner
/// worker. The name is fixed for compatibility with existing pipelines.
pub const MOUNT_ENV: &str = "BUILDAHUTIL_MOUNT";

/// Drive the pipeline described by `init`, reading arguments from the
/// process environment.
pub fn run(init: BTreeMap<String, Value>) -> Result<()> {
    run_with_args(init, std::env::args().collect())
}

/// Like [`run`], with an explicit argument vector (`argv[0]` included).
pub fn run_with_args(init: BTreeMap<String, Value>, argv: Vec<String>) -> Result<()> {
    let (cx, internal) = build_config(init, argv)?;
    cx.required_config(&["basename", "stages"])?;

    match internal {
        Some(stage) => inner(&cx, &stage),
        None => outer(&cx),
    }
}

/// [`run`], then exit: 0 on success, nonzero with a `<basename> failed`
/// diagnostic otherwise.
pub fn run_or_exit(init: BTreeMap<String, Value>) -> ! {
    let basename = init
        .get("basename")
        .and_then(Value::as_str)
        .unwrap_or("stagehand")
        .to_string();
    match run(init) {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("{basename} failed: {err}");
            std::process::exit(1);
        }
    }
}

/// Parse arguments, load the configuration tree, and record the synthesized
/// context (`argv`, `opts`). Returns the tree and the `--internal` stage,
/// if any.
pub(crate) fn build_config(
    init: BTreeMap<String, Value>,
    argv: Vec<String>,
) -> Result<(Config, Option<String>)> {
    let added = added_opt_names(&init)?;
    let matches = arg_parser(&init, &added)
        .try_get_matches_from(&argv)
        .map_err(|e| StagehandError::InvalidArguments(e.to_string()))?;

    let debug = match matches.get_one::<String>("debug") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| StagehandError::InvalidArguments(format!("--debug={raw}")))?,
        None => 0,
    };
    init_tracing(debug);

    let explicit_config = matches.get_one::<String>("config").map(PathBuf::from);
    let internal = matches.get_one::<String>("internal").cloned();

    let data_file = match &explicit_config {
        Some(path) => Some(path.clone()),
        None => default_data_file(&init),
    };

    let mut opts = BTreeMap::new();
    for name in &added {
        if let Some(value) = matches.get_one::<String>(name) {
            opts.insert(name.clone(), Value::Str(value.clone()));
        }
    }

    let mut cx = Config::new(init, data_file.as_deref())?;
    cx.set_debug(debug);
    cx.set_top("argv", Value::Seq(argv.into_iter().map(Value::Str).collect()));
    cx.set_top("opts", Value::Map(opts));

    Ok((cx, internal))
}

fn arg_parser(init: &BTreeMap<String, Value>, added: &[String]) -> Command {
    let mut cmd = Command::new("stagehand")
        .disable_version_flag(true)
        .arg(Arg::new("debug").long("debug").value_name("N").action(ArgAction::Set))
        .arg(Arg::new("config").long("config").value_name("PATH").action(ArgAction::Set))
        .arg(
            Arg::new("internal")
                .long("internal")
                .value_name("STAGE")
                .hide(true)
                .action(ArgAction::Set),
        );

    for name in added {
        let mut arg = Arg::new(name.clone())
            .long(name.clone())
            .value_name("VALUE")
            .action(ArgAction::Set);
        if let Some(help) = init
            .get("added_opts")
            .and_then(Value::as_map)
            .and_then(|m| m.get(name))
            .and_then(Value::as_str)
        {
            arg = arg.help(help.to_string());
        }
        cmd = cmd.arg(arg);
    }
    cmd
}

/// User-registered extra flags: the keys of the init map's `added_opts`.
fn added_opt_names(init: &BTreeMap<String, Value>) -> Result<Vec<String>> {
    match init.get("added_opts") {
        None => Ok(Vec::new()),
        Some(Value::Map(m)) => Ok(m.keys().cloned().collect()),
        Some(other) => Err(StagehandError::BadConfigShape {
            key: "added_opts".to_string(),
            reason: format!("expected a mapping, got {}", other.type_name()),
        }),
    }
}

/// Default data file: `<basename>.yml` or `<basename>.yaml` in the working
/// directory, when the init map names a basename.
fn default_data_file(init: &BTreeMap<String, Value>) -> Option<PathBuf> {
    let basename = init.get("basename").and_then(Value::as_str)?;
    for extension in ["yml", "yaml"] {
        let candidate = PathBuf::from(format!("{basename}.{extension}"));
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn init_tracing(debug: u32) {
    let level = match debug {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Outer mode: run every stage in planner order.
fn outer(cx: &Config) -> Result<()> {
    let order = plan::plan(cx)?;
    info!(stages = order.len(), "starting pipeline");

    for name in order.sequence() {
        dispatch_stage(cx, name)?;
    }
    Ok(())
}

/// Run one stage with its output scoped into the log tree.
fn dispatch_stage(cx: &Config, name: &str) -> Result<()> {
    let log_dir = stage_log_dir(cx)?;
    let guard = RedirectGuard::to_file(&log_dir.join(name))?;
    let result = outer_stage(cx, name);
    drop(guard);
    result
}

fn outer_stage(cx: &Config, name: &str) -> Result<()> {
    let stage = Stage::new(cx, name, None)?;

    if !stage.produces().is_empty() && artifact::is_fresh(cx, name)? {
        info!(stage = %name, "artifact up to date, skipping stage");
        return Ok(());
    }

    remove_stale_container(stage.container_name())?;
    stage.from(Params::new())?;

    reenter(cx, &stage)?;

    match stage.commit_tags().split_first() {
        Some((first, rest)) => {
            let mut params = Params::new();
            params.insert("rm".to_string(), Value::Bool(true));
            stage.commit(params, first)?;

            if !rest.is_empty() {
                let mut params = Params::new();
                params.insert("image".to_string(), Value::Str(first.clone()));
                let tags: Vec<&str> = rest.iter().map(String::as_str).collect();
                global::tag(params, &tags)?;
            }
        }
        None => {
            global::rm(Params::new(), &[stage.container_name()])?;
        }
    }

    info!(stage = %name, "stage complete");
    Ok(())
}

/// Re-execute this driver inside the stage's mount namespace.
fn reenter(cx: &Config, stage: &Stage) -> Result<()> {
    let driver = std::env::current_exe()
        .map_err(|e| StagehandError::io("current_exe", e))?;

    let mut cmd = vec![
        driver.to_string_lossy().into_owned(),
        format!("--internal={}", stage.name()),
    ];
    if cx.get_debug() > 0 {
        cmd.push(format!("--debug={}", cx.get_debug()));
    }
    for file in cx.config_files() {
        cmd.push(format!("--config={}", file.display()));
    }

    let mut params = Params::new();
    params.insert("container".to_string(), Value::Str(stage.container_name().to_string()));
    params.insert("envname".to_string(), Value::Str(MOUNT_ENV.to_string()));

    debug!(stage = %stage.name(), "re-executing driver inside namespace");
    global::unshare(params, &cmd)
}

/// A leftover container from an earlier failed run is removed quietly.
fn remove_stale_container(container: &str) -> Result<()> {
    let mut argv = builder_command("rm")?;
    argv.push(container.to_string());
    let tolerate = |_status: i32| -> Result<()> { Ok(()) };
    let opts = RunOptions::new("buildah rm")
        .suppress_output()
        .suppress_error()
        .on_nonzero(&tolerate);
    run_process(&opts, &argv)?;
    Ok(())
}

/// Inner mode: already inside the namespace for `name`.
///
/// The timestamp inherited through the environment keeps the inner log
/// files in the same directory as the outer ones.
fn inner(cx: &Config, name: &str) -> Result<()> {
    let mount = std::env::var(MOUNT_ENV)
        .map_err(|_| StagehandError::MountEnvMissing { var: MOUNT_ENV.to_string() })?;

    let log_dir = stage_log_dir(cx)?;
    let guard = RedirectGuard::to_file(&log_dir.join(format!("{name}-internal")))?;
    let result = inner_stage(cx, name, PathBuf::from(mount));
    drop(guard);
    result
}

fn inner_stage(cx: &Config, name: &str, mount: PathBuf) -> Result<()> {
    info!(stage = %name, mount = %mount.display(), "inner worker starting");
    let stage = Stage::new(cx, name, Some(mount))?;

    if let Some(deps) = stage.func_deps() {
        deps.call(cx, &stage)?;
    }
    artifact::consume(cx, &stage)?;
    stage.func_exec().call(cx, &stage)?;
    artifact::produce(cx, &stage)?;

    info!(stage = %name, "inner worker finished");
    Ok(())
}
