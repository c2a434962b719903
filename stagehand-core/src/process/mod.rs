//! External process execution.
//!
//! The driver shells out to security-sensitive tools (the builder, the
//! archiver, user-management commands inside containers), so program lookup
//! never consults `PATH`: a `<NAME>_PROG` environment override is honored
//! when it points at an executable, otherwise only a fixed list of system
//! directories is searched. Lookups are cached process-wide.

use crate::error::{Result, StagehandError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, trace};

/// Directories searched for programs, in order. `PATH` is deliberately not
/// consulted: a writable directory early in `PATH` could hijack the tools
/// this driver runs.
const SECURE_PATH: [&str; 4] = ["/usr/bin", "/sbin", "/usr/sbin", "/bin"];

static LOCATED: Lazy<Mutex<HashMap<String, PathBuf>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Exit-status policy hook. Returning `Err` makes the status fatal.
pub type StatusHook<'a> = &'a dyn Fn(i32) -> Result<()>;

/// Options for [`run`].
///
/// `name` labels the command in diagnostics. Without a `nonzero` hook any
/// nonzero exit status is fatal; with one, the hook decides (some tools,
/// notably the archiver, exit 1 on noncritical warnings).
#[derive(Default)]
pub struct RunOptions<'a> {
    pub name: String,
    pub capture_output: bool,
    pub suppress_output: bool,
    pub suppress_error: bool,
    pub nonzero: Option<StatusHook<'a>>,
    pub zero: Option<StatusHook<'a>>,
}

impl<'a> RunOptions<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Return the child's standard output as a string.
    pub fn capture(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Send the child's standard output to a null sink.
    pub fn suppress_output(mut self) -> Self {
        self.suppress_output = true;
        self
    }

    /// Send the child's standard error to a null sink.
    pub fn suppress_error(mut self) -> Self {
        self.suppress_error = true;
        self
    }

    /// Install the nonzero-status policy hook.
    pub fn on_nonzero(mut self, hook: StatusHook<'a>) -> Self {
        self.nonzero = Some(hook);
        self
    }

    /// Install the zero-status hook.
    pub fn on_zero(mut self, hook: StatusHook<'a>) -> Self {
        self.zero = Some(hook);
        self
    }
}

/// Result of [`run`]: the exit status, and captured output when requested.
#[derive(Debug)]
pub struct RunOutput {
    pub status: i32,
    pub stdout: Option<String>,
}

/// Execute `argv` as a direct process (no shell) and wait for it.
///
/// `argv[0]` must be the absolute program path, normally obtained from
/// [`locate`]. The current environment is inherited.
pub fn run(opts: &RunOptions, argv: &[String]) -> Result<RunOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| StagehandError::SpawnFailed {
        name: opts.name.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
    })?;

    trace!(name = %opts.name, ?argv, "running");

    let mut command = Command::new(program);
    command.args(args);

    if opts.capture_output {
        command.stdout(Stdio::piped());
    } else if opts.suppress_output {
        command.stdout(Stdio::null());
    }
    if opts.suppress_error {
        command.stderr(Stdio::null());
    }

    let child = command.spawn().map_err(|e| StagehandError::SpawnFailed {
        name: opts.name.clone(),
        source: e,
    })?;
    let output = child.wait_with_output().map_err(|e| StagehandError::SpawnFailed {
        name: opts.name.clone(),
        source: e,
    })?;

    let status = match output.status.code() {
        Some(code) => code,
        None => {
            let signal = output.status.signal().unwrap_or(0);
            return Err(StagehandError::DiedWithSignal { name: opts.name.clone(), signal });
        }
    };

    if status == 0 {
        if let Some(hook) = opts.zero {
            hook(status)?;
        }
    } else {
        match opts.nonzero {
            Some(hook) => hook(status)?,
            None => {
                return Err(StagehandError::CommandFailed { name: opts.name.clone(), status })
            }
        }
    }

    let stdout = opts
        .capture_output
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned());

    Ok(RunOutput { status, stdout })
}

/// Resolve a program name to an absolute path.
///
/// Resolution order: `<NAME>_PROG` environment variable if it names an
/// executable, then the secure search list. The result is cached for the
/// life of the process.
pub fn locate(name: &str) -> Result<PathBuf> {
    let mut cache = LOCATED.lock().expect("program cache poisoned");
    if let Some(path) = cache.get(name) {
        return Ok(path.clone());
    }

    let path = locate_uncached(name)?;
    debug!(%name, path = %path.display(), "located program");
    cache.insert(name.to_string(), path.clone());
    Ok(path)
}

fn locate_uncached(name: &str) -> Result<PathBuf> {
    if let Ok(overridden) = std::env::var(prog_env_var(name)) {
        let path = PathBuf::from(&overridden);
        if is_executable(&path) {
            return Ok(path);
        }
    }

    for dir in SECURE_PATH {
        let candidate = Path::new(dir).join(name);
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }

    Err(StagehandError::ProgramNotFound { name: name.to_string() })
}

/// Environment variable overriding the path of program `name`.
fn prog_env_var(name: &str) -> String {
    let mut var: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    var.push_str("_PROG");
    var
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sh() -> String {
        locate("sh").unwrap().to_string_lossy().into_owned()
    }

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_run_success() {
        let out = run(&RunOptions::new("true"), &argv(&[&sh(), "-c", "exit 0"])).unwrap();
        assert_eq!(out.status, 0);
        assert!(out.stdout.is_none());
    }

    #[test]
    fn test_run_captures_output() {
        let opts = RunOptions::new("echo").capture();
        let out = run(&opts, &argv(&[&sh(), "-c", "printf hello"])).unwrap();
        assert_eq!(out.stdout.as_deref(), Some("hello"));
    }

    #[test]
    fn test_nonzero_without_hook_is_fatal() {
        let err = run(&RunOptions::new("false"), &argv(&[&sh(), "-c", "exit 3"])).unwrap_err();
        match err {
            StagehandError::CommandFailed { name, status } => {
                assert_eq!(name, "false");
                assert_eq!(status, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nonzero_hook_can_tolerate() {
        let hook = |status: i32| {
            if status <= 1 {
                Ok(())
            } else {
                Err(StagehandError::CommandFailed { name: "t".into(), status })
            }
        };
        let opts = RunOptions::new("warny").on_nonzero(&hook);
        let out = run(&opts, &argv(&[&sh(), "-c", "exit 1"])).unwrap();
        assert_eq!(out.status, 1);

        let err = run(&opts, &argv(&[&sh(), "-c", "exit 2"])).unwrap_err();
        assert!(matches!(err, StagehandError::CommandFailed { status: 2, .. }));
    }

    #[test]
    fn test_death_by_signal() {
        let err =
            run(&RunOptions::new("doomed"), &argv(&[&sh(), "-c", "kill -9 $$"])).unwrap_err();
        assert!(matches!(err, StagehandError::DiedWithSignal { signal: 9, .. }));
    }

    #[test]
    fn test_spawn_failure() {
        let err = run(&RunOptions::new("ghost"), &argv(&["/nonexistent/prog"])).unwrap_err();
        assert!(matches!(err, StagehandError::SpawnFailed { .. }));
    }

    #[test]
    fn test_locate_returns_absolute_path() {
        let path = locate("sh").unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_locate_unknown_program() {
        let err = locate("no-such-program-stagehand").unwrap_err();
        assert!(matches!(err, StagehandError::ProgramNotFound { .. }));
    }

    #[test]
    fn test_locate_env_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let prog = dir.path().join("fakeprog");
        let mut f = std::fs::File::create(&prog).unwrap();
        f.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        drop(f);
        let mut perms = std::fs::metadata(&prog).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&prog, perms).unwrap();

        std::env::set_var("LOCATE_OVERRIDE_T1_PROG", &prog);
        assert_eq!(locate("locate-override-t1").unwrap(), prog);
        std::env::remove_var("LOCATE_OVERRIDE_T1_PROG");
    }

    #[test]
    fn test_locate_env_override_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("notexec");
        std::fs::write(&plain, "data").unwrap();

        std::env::set_var("LOCATE_OVERRIDE_T2_PROG", &plain);
        let err = locate("locate-override-t2").unwrap_err();
        assert!(matches!(err, StagehandError::ProgramNotFound { .. }));
        std::env::remove_var("LOCATE_OVERRIDE_T2_PROG");
    }

    #[test]
    fn test_prog_env_var_name() {
        assert_eq!(prog_env_var("tar"), "TAR_PROG");
        assert_eq!(prog_env_var("my-tool"), "MY_TOOL_PROG");
    }
}
