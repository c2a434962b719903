//! Per-container builder subcommands, exposed as stage-handle methods.
//!
//! The container name always comes from the handle, never from the caller,
//! and every wrapper leads with `--add-history` so committed images carry
//! provenance for each operation.

use crate::builder::grammar::{translate, Schema};
use crate::builder::{builder_command, label, Params};
use crate::config::Value;
use crate::error::{Result, StagehandError};
use crate::process::{run, RunOptions};
use crate::stage::Stage;
use std::path::PathBuf;
use tracing::debug;

impl Stage {
    /// `buildah add`: copy `sources` (files, URLs, or archives, which the
    /// builder explodes) into the container at `dest`.
    pub fn add(&self, params: Params, sources: &[&str], dest: &str) -> Result<()> {
        let schema = Schema {
            arg_init: &["--add-history"],
            arg_str: &["chmod", "chown"],
            arg_flag: &["quiet"],
            ..Schema::default()
        };
        let t = translate("add", &schema, params)?;

        let mut argv = builder_command("add")?;
        argv.extend(t.argv);
        argv.push(self.container_name().to_string());
        argv.extend(sources.iter().map(|s| s.to_string()));
        argv.push(dest.to_string());
        run(&RunOptions::new(label("add")).suppress_output(), &argv)?;
        Ok(())
    }

    /// `buildah commit`: write the working container to `image`.
    pub fn commit(&self, params: Params, image: &str) -> Result<()> {
        let schema = Schema {
            arg_init: &["--add-history"],
            arg_flag: &["quiet", "rm", "squash"],
            arg_str: &["format", "sign-by"],
            arg_flag_str: &["disable-compression"],
            ..Schema::default()
        };
        let t = translate("commit", &schema, params)?;

        let mut argv = builder_command("commit")?;
        argv.extend(t.argv);
        argv.push(self.container_name().to_string());
        argv.push(image.to_string());
        debug!(container = %self.container_name(), %image, "committing");
        run(&RunOptions::new(label("commit")).suppress_output(), &argv)?;
        Ok(())
    }

    /// `buildah config`: set image metadata on the working container.
    pub fn config(&self, params: Params) -> Result<()> {
        let schema = Schema {
            arg_init: &["--add-history"],
            arg_str: &["author", "cmd", "shell", "user", "workingdir"],
            arg_array: &["annotation", "env", "label", "port", "volume"],
            arg_list: &["entrypoint"],
            ..Schema::default()
        };
        let t = translate("config", &schema, params)?;

        let mut argv = builder_command("config")?;
        argv.extend(t.argv);
        argv.push(self.container_name().to_string());
        run(&RunOptions::new(label("config")), &argv)?;
        Ok(())
    }

    /// `buildah copy`: copy `sources` into the container at `dest` without
    /// archive explosion.
    pub fn copy(&self, params: Params, sources: &[&str], dest: &str) -> Result<()> {
        let schema = Schema {
            arg_init: &["--add-history"],
            arg_str: &["chmod", "chown"],
            arg_flag: &["quiet"],
            ..Schema::default()
        };
        let t = translate("copy", &schema, params)?;

        let mut argv = builder_command("copy")?;
        argv.extend(t.argv);
        argv.push(self.container_name().to_string());
        argv.extend(sources.iter().map(|s| s.to_string()));
        argv.push(dest.to_string());
        run(&RunOptions::new(label("copy")).suppress_output(), &argv)?;
        Ok(())
    }

    /// `buildah from`: create this stage's working container from its base
    /// image, under the handle's deterministic name.
    pub fn from(&self, params: Params) -> Result<String> {
        let mut params = params;
        params.insert("name".to_string(), Value::Str(self.container_name().to_string()));

        let schema = Schema {
            arg_init: &["--add-history"],
            arg_str: &["name"],
            arg_flag_str: &["pull"],
            arg_flag: &["quiet"],
            ..Schema::default()
        };
        let t = translate("from", &schema, params)?;

        let mut argv = builder_command("from")?;
        argv.extend(t.argv);
        argv.push(self.from_image().to_string());
        debug!(container = %self.container_name(), image = %self.from_image(), "creating container");
        let out = run(&RunOptions::new(label("from")).capture(), &argv)?;
        Ok(out.stdout.unwrap_or_default().trim().to_string())
    }

    /// `buildah mount`: mount this container's root, returning the host path.
    pub fn mount(&self, params: Params) -> Result<PathBuf> {
        let schema = Schema { arg_init: &["--add-history"], ..Schema::default() };
        let t = translate("mount", &schema, params)?;

        let mut argv = builder_command("mount")?;
        argv.extend(t.argv);
        argv.push(self.container_name().to_string());
        let out = run(&RunOptions::new(label("mount")).capture(), &argv)?;
        Ok(PathBuf::from(out.stdout.unwrap_or_default().trim()))
    }

    /// `buildah run`: execute commands in the working container.
    ///
    /// `commands` is a single scalar (one one-word command), a sequence of
    /// scalars (one command), or a sequence of sequences (several commands).
    /// Parameters are reapplied to every command.
    pub fn run(&self, params: Params, commands: &Value) -> Result<()> {
        let schema = Schema {
            arg_init: &["--add-history"],
            arg_str: &["user", "workingdir"],
            arg_array: &["env", "volume"],
            ..Schema::default()
        };
        let t = translate("run", &schema, params)?;

        for command in command_lists(commands)? {
            let mut argv = builder_command("run")?;
            argv.extend(t.argv.iter().cloned());
            argv.push(self.container_name().to_string());
            argv.push("--".to_string());
            argv.extend(command);
            run(&RunOptions::new(label("run")), &argv)?;
        }
        Ok(())
    }

    /// `buildah umount`: unmount this container's root.
    pub fn umount(&self, params: Params) -> Result<()> {
        let schema = Schema { arg_init: &["--add-history"], ..Schema::default() };
        let t = translate("umount", &schema, params)?;

        let mut argv = builder_command("umount")?;
        argv.extend(t.argv);
        argv.push(self.container_name().to_string());
        run(&RunOptions::new(label("umount")).suppress_output(), &argv)?;
        Ok(())
    }
}

/// Normalize the accepted `run` command shapes into a list of argv lists.
fn command_lists(commands: &Value) -> Result<Vec<Vec<String>>> {
    let bad = |got: &Value| StagehandError::BadParameterType {
        callee: "run".to_string(),
        name: "commands".to_string(),
        expected: "a scalar, a sequence of scalars, or a sequence of sequences",
        got: got.type_name(),
    };

    match commands {
        Value::Seq(items) if items.is_empty() => Ok(Vec::new()),
        Value::Seq(items) if items.iter().all(Value::is_scalar) => {
            Ok(vec![scalar_argv(items, bad)?])
        }
        Value::Seq(items) => items
            .iter()
            .map(|item| match item {
                Value::Seq(words) => scalar_argv(words, bad),
                other => Err(bad(other)),
            })
            .collect(),
        other => match other.scalar_string() {
            Some(word) => Ok(vec![vec![word]]),
            None => Err(bad(other)),
        },
    }
}

fn scalar_argv(
    words: &[Value],
    bad: impl Fn(&Value) -> StagehandError,
) -> Result<Vec<String>> {
    words.iter().map(|w| w.scalar_string().ok_or_else(|| bad(w))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_scalar_command() {
        let lists = command_lists(&Value::Str("ls".into())).unwrap();
        assert_eq!(lists, vec![vec!["ls".to_string()]]);
    }

    #[test]
    fn test_one_command_sequence() {
        let cmds = Value::seq(["apk".into(), "add".into(), "curl".into()]);
        let lists = command_lists(&cmds).unwrap();
        assert_eq!(lists, vec![vec!["apk".to_string(), "add".to_string(), "curl".to_string()]]);
    }

    #[test]
    fn test_many_commands() {
        let cmds = Value::seq([
            Value::seq(["apk".into(), "update".into()]),
            Value::seq(["apk".into(), "add".into(), "curl".into()]),
        ]);
        let lists = command_lists(&cmds).unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0], vec!["apk".to_string(), "update".to_string()]);
    }

    #[test]
    fn test_empty_sequence_is_no_commands() {
        assert!(command_lists(&Value::seq([])).unwrap().is_empty());
    }

    #[test]
    fn test_mixed_shapes_rejected() {
        let cmds = Value::seq([Value::seq(["ls".into()]), Value::map::<&str, _>([])]);
        assert!(command_lists(&cmds).is_err());
    }

    #[test]
    fn test_map_rejected() {
        assert!(command_lists(&Value::map::<&str, _>([])).is_err());
    }
}
