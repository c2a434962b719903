//! Inter-stage artifact transfer.
//!
//! A producing stage archives its `produces` directories from the mounted
//! container root into `<basename>_<stage>.tar.bz2` in the invocation
//! working directory; consuming stages inject that archive at `/` of their
//! container through the builder, which explodes it with modes preserved.
//! The sparse/permission flags below are contract, not taste: consumers
//! depend on the archive exploding faithfully.

use crate::builder::Params;
use crate::config::{Config, Value};
use crate::error::{Result, StagehandError};
use crate::process::{locate, run, RunOptions};
use crate::stage::Stage;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// The external archiver program.
pub const ARCHIVER_PROGRAM: &str = "tar";

/// Archive path for a stage: `<workdir>/<basename>_<stage>.tar.bz2`.
pub fn archive_path(cx: &Config, stage_name: &str) -> PathBuf {
    cx.workdir().join(format!("{}_{}.tar.bz2", cx.basename(), stage_name))
}

/// Archive the stage's `produces` directories from the mounted container
/// root. A pre-existing archive is moved aside to `<archive>.bak` first.
///
/// The archiver exits 1 for noncritical warnings (a known overlayfs false
/// positive); only statuses above 1 are fatal.
pub fn produce(cx: &Config, stage: &Stage) -> Result<()> {
    let produces = stage.produces();
    if produces.is_empty() {
        return Ok(());
    }

    let mount = stage.mount_point().ok_or_else(|| StagehandError::MountEnvMissing {
        var: crate::orchestrator::MOUNT_ENV.to_string(),
    })?;

    let archive = archive_path(cx, stage.name());
    if archive.exists() {
        let backup = archive.with_extension("bz2.bak");
        std::fs::rename(&archive, &backup).map_err(|e| StagehandError::io(&archive, e))?;
        debug!(backup = %backup.display(), "moved previous archive aside");
    }

    let tar = locate(ARCHIVER_PROGRAM)?;
    let mut argv = vec![
        tar.to_string_lossy().into_owned(),
        "--create".to_string(),
        "--bzip2".to_string(),
        "--preserve-permissions".to_string(),
        "--sparse".to_string(),
        format!("--file={}", archive.display()),
        format!("--directory={}", mount.display()),
    ];
    for dir in produces {
        argv.push(dir.trim_start_matches('/').to_string());
    }

    info!(stage = %stage.name(), archive = %archive.display(), "archiving stage output");
    run(&RunOptions::new(ARCHIVER_PROGRAM).on_nonzero(&archiver_status), &argv)?;
    Ok(())
}

/// Archiver exit policy: status 1 means "file changed as we read it" on
/// overlayfs and is only a warning; anything higher is real.
fn archiver_status(status: i32) -> Result<()> {
    if status == 1 {
        warn!("archiver reported warnings (status 1), continuing");
        Ok(())
    } else {
        Err(StagehandError::CommandFailed { name: ARCHIVER_PROGRAM.to_string(), status })
    }
}

/// Prepare the stage's container for its build callback.
///
/// Creates the configured user and group first, then injects the archive
/// of every stage named in `consumes` at `/` of the container.
pub fn consume(cx: &Config, stage: &Stage) -> Result<()> {
    if let Some(entry) = stage.user() {
        let spec = UserSpec::parse(entry)?;
        create_user(stage, &spec, stage.user_home())?;
    }

    for producer in stage.consumes() {
        let declared = cx
            .try_get(&["stages", producer.as_str(), "produces"])
            .map(|v| !matches!(v, Value::Seq(s) if s.is_empty()))
            .unwrap_or(false);
        if !declared {
            return Err(StagehandError::BadConfigShape {
                key: format!("stages.{producer}.produces"),
                reason: format!(
                    "stage '{}' consumes '{producer}', which produces nothing",
                    stage.name()
                ),
            });
        }

        let archive = archive_path(cx, producer);
        if !archive.exists() {
            return Err(StagehandError::ArchiveMissing {
                stage: producer.clone(),
                path: archive,
            });
        }

        info!(stage = %stage.name(), %producer, "injecting artifact archive");
        let archive_str = archive.to_string_lossy();
        stage.add(Params::new(), &[archive_str.as_ref()], "/")?;
    }

    Ok(())
}

/// Whether the stage's archive is newer than the driver executable and
/// every recorded configuration file. A hit means the whole stage can be
/// skipped.
pub fn is_fresh(cx: &Config, stage_name: &str) -> Result<bool> {
    let archive = archive_path(cx, stage_name);
    let Some(archive_mtime) = mtime_of(&archive) else {
        return Ok(false);
    };

    let driver = std::env::current_exe().map_err(|e| StagehandError::io("current_exe", e))?;
    let Some(driver_mtime) = mtime_of(&driver) else {
        return Ok(false);
    };
    if archive_mtime <= driver_mtime {
        return Ok(false);
    }

    for file in cx.config_files() {
        match mtime_of(&file) {
            Some(mtime) if archive_mtime > mtime => {}
            _ => return Ok(false),
        }
    }

    Ok(true)
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Parsed `user` entry, grammar `name[=uid][:group[=gid]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub uid: Option<String>,
    pub group: Option<String>,
    pub gid: Option<String>,
}

impl UserSpec {
    pub fn parse(entry: &str) -> Result<Self> {
        let bad = |reason: &str| StagehandError::BadConfigShape {
            key: "user".to_string(),
            reason: format!("entry {entry:?} {reason}"),
        };

        let (user_part, group_part) = match entry.split_once(':') {
            Some((u, g)) => (u, Some(g)),
            None => (entry, None),
        };

        let (name, uid) = split_assignment(user_part);
        if name.is_empty() {
            return Err(bad("has an empty user name"));
        }

        let (group, gid) = match group_part {
            Some(part) => {
                let (group, gid) = split_assignment(part);
                if group.is_empty() {
                    return Err(bad("has an empty group name"));
                }
                (Some(group), gid)
            }
            None => (None, None),
        };

        Ok(Self { name, uid, group, gid })
    }
}

fn split_assignment(part: &str) -> (String, Option<String>) {
    match part.split_once('=') {
        Some((name, id)) => (name.to_string(), Some(id.to_string())),
        None => (part.to_string(), None),
    }
}

/// Create the group and user inside the container with plain `groupadd` /
/// `useradd` so the commands work across base distributions.
fn create_user(stage: &Stage, spec: &UserSpec, home: Option<&str>) -> Result<()> {
    debug!(user = %spec.name, "creating stage user");
    stage.run(Params::new(), &Value::Seq(user_commands(spec, home)))
}

/// The group/user creation command lines for a parsed `user` entry.
fn user_commands(spec: &UserSpec, home: Option<&str>) -> Vec<Value> {
    let mut commands: Vec<Value> = Vec::new();

    if let Some(group) = &spec.group {
        let mut groupadd: Vec<Value> = vec!["groupadd".into()];
        if let Some(gid) = &spec.gid {
            groupadd.push(format!("--gid={gid}").into());
        }
        groupadd.push(group.as_str().into());
        commands.push(Value::Seq(groupadd));
    }

    let mut useradd: Vec<Value> = vec!["useradd".into()];
    if let Some(uid) = &spec.uid {
        useradd.push(format!("--uid={uid}").into());
    }
    if let Some(group) = &spec.group {
        useradd.push(format!("--gid={group}").into());
    }
    if let Some(home) = home {
        useradd.push(format!("--home-dir={home}").into());
    }
    useradd.push(spec.name.as_str().into());
    commands.push(Value::Seq(useradd));

    commands
}
