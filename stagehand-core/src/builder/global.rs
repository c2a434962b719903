//! Global builder subcommands (no container target).

use crate::builder::grammar::{translate, Schema};
use crate::builder::{builder_command, label, Params};
use crate::config::Value;
use crate::error::{Result, StagehandError};
use crate::process::{run, RunOptions};
use std::path::PathBuf;
use tracing::debug;

/// `buildah bud`: build from a containerfile in `context_dir`.
pub fn bud(params: Params, context_dir: &str) -> Result<()> {
    let schema = Schema {
        arg_str: &["arch", "file", "format", "tag"],
        arg_array: &["build-arg", "volume"],
        arg_flag: &["no-cache", "quiet", "squash"],
        ..Schema::default()
    };
    let t = translate("bud", &schema, params)?;

    let mut argv = builder_command("bud")?;
    argv.extend(t.argv);
    argv.push(context_dir.to_string());
    run(&RunOptions::new(label("bud")), &argv)?;
    Ok(())
}

/// `buildah containers`: list working containers, output returned verbatim.
pub fn containers(params: Params) -> Result<String> {
    let schema = Schema {
        arg_flag: &["all", "json", "noheading", "quiet"],
        arg_str: &["filter", "format"],
        ..Schema::default()
    };
    let t = translate("containers", &schema, params)?;

    let mut argv = builder_command("containers")?;
    argv.extend(t.argv);
    let out = run(&RunOptions::new(label("containers")).capture(), &argv)?;
    Ok(out.stdout.unwrap_or_default())
}

/// `buildah from`: create a working container from `image`.
///
/// Returns the container name the builder reports.
pub fn from(params: Params, image: &str) -> Result<String> {
    let schema = Schema {
        arg_str: &["name"],
        arg_flag_str: &["pull"],
        arg_flag: &["quiet"],
        arg_array: &["volume"],
        ..Schema::default()
    };
    let t = translate("from", &schema, params)?;

    let mut argv = builder_command("from")?;
    argv.extend(t.argv);
    argv.push(image.to_string());
    let out = run(&RunOptions::new(label("from")).capture(), &argv)?;
    Ok(out.stdout.unwrap_or_default().trim().to_string())
}

/// `buildah info`: builder host/runtime facts as a parsed document.
///
/// Parameters are accepted and ignored; no output format selector is
/// supported yet.
pub fn info(params: Params) -> Result<serde_json::Value> {
    let _ = params;

    let argv = builder_command("info")?;
    let name = label("info");
    let out = run(&RunOptions::new(&name).capture(), &argv)?;
    let text = out.stdout.unwrap_or_default();
    serde_json::from_str(&text)
        .map_err(|e| StagehandError::UnparseableOutput { name, reason: e.to_string() })
}

/// `buildah mount`: mount a container's root, returning the host path.
pub fn mount(params: Params, container: &str) -> Result<PathBuf> {
    let t = translate("mount", &Schema::default(), params)?;

    let mut argv = builder_command("mount")?;
    argv.extend(t.argv);
    argv.push(container.to_string());
    let out = run(&RunOptions::new(label("mount")).capture(), &argv)?;
    Ok(PathBuf::from(out.stdout.unwrap_or_default().trim()))
}

/// `buildah rm`: remove working containers. `all` is exclusive and removes
/// every container instead of the named ones.
pub fn rm(params: Params, names: &[&str]) -> Result<()> {
    let all = params.contains_key("all");
    let schema = Schema { exclusive: &["all"], ..Schema::default() };
    let t = translate("rm", &schema, params)?;

    let mut argv = builder_command("rm")?;
    argv.extend(t.argv);
    if !all {
        argv.extend(names.iter().map(|s| s.to_string()));
    }
    run(&RunOptions::new(label("rm")).suppress_output(), &argv)?;
    Ok(())
}

/// `buildah rmi`: remove images. `all` and `prune` are each exclusive.
pub fn rmi(params: Params, names: &[&str]) -> Result<()> {
    let wholesale = params.contains_key("all") || params.contains_key("prune");
    let schema =
        Schema { exclusive: &["all", "prune"], arg_flag: &["force"], ..Schema::default() };
    let t = translate("rmi", &schema, params)?;

    let mut argv = builder_command("rmi")?;
    argv.extend(t.argv);
    if !wholesale {
        argv.extend(names.iter().map(|s| s.to_string()));
    }
    run(&RunOptions::new(label("rmi")).suppress_output(), &argv)?;
    Ok(())
}

/// `buildah tag`: apply additional names to an image.
///
/// The source image is the required `image` parameter.
pub fn tag(params: Params, tags: &[&str]) -> Result<()> {
    let schema = Schema { extract: &["image"], ..Schema::default() };
    let t = translate("tag", &schema, params)?;
    let image = t.extracted.get("image").and_then(Value::as_str).ok_or_else(|| {
        StagehandError::MissingParameter { callee: "tag".to_string(), name: "image".to_string() }
    })?;

    let mut argv = builder_command("tag")?;
    argv.push(image.to_string());
    argv.extend(tags.iter().map(|s| s.to_string()));
    run(&RunOptions::new(label("tag")), &argv)?;
    Ok(())
}

/// `buildah umount`: unmount container roots. `all` is exclusive.
pub fn umount(params: Params, names: &[&str]) -> Result<()> {
    let all = params.contains_key("all");
    let schema = Schema { exclusive: &["all"], ..Schema::default() };
    let t = translate("umount", &schema, params)?;

    let mut argv = builder_command("umount")?;
    argv.extend(t.argv);
    if !all {
        argv.extend(names.iter().map(|s| s.to_string()));
    }
    run(&RunOptions::new(label("umount")).suppress_output(), &argv)?;
    Ok(())
}

/// `buildah unshare`: run `cmd` inside the user namespace with a container
/// mounted.
///
/// The required `container` parameter names the container to mount; the
/// optional `envname` parameter makes the builder export the mount path in
/// that environment variable. This is the primitive by which the outer
/// driver re-enters itself inside the namespace.
pub fn unshare(params: Params, cmd: &[String]) -> Result<()> {
    let schema = Schema { extract: &["container", "envname"], ..Schema::default() };
    let t = translate("unshare", &schema, params)?;

    let container = t.extracted.get("container").and_then(Value::as_str).ok_or_else(|| {
        StagehandError::MissingParameter {
            callee: "unshare".to_string(),
            name: "container".to_string(),
        }
    })?;

    let mut argv = builder_command("unshare")?;
    argv.push("--mount".to_string());
    match t.extracted.get("envname").and_then(Value::as_str) {
        Some(envname) => argv.push(format!("{envname}={container}")),
        None => argv.push(container.to_string()),
    }
    argv.push("--".to_string());
    argv.extend(cmd.iter().cloned());

    debug!(%container, "entering build namespace");
    run(&RunOptions::new(label("unshare")), &argv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, Value)]) -> Params {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    // Wrappers that reject bad calls must do so before any process is
    // spawned; none of these tests require the builder to be installed.

    #[test]
    fn test_rm_exclusive_violation() {
        let p = params(&[("all", Value::Bool(true)), ("force", Value::Bool(true))]);
        let err = rm(p, &[]).unwrap_err();
        assert!(matches!(err, StagehandError::ExclusiveParameter { name, .. } if name == "all"));
    }

    #[test]
    fn test_rmi_prune_exclusive_violation() {
        let p = params(&[("prune", Value::Bool(true)), ("force", Value::Bool(true))]);
        let err = rmi(p, &[]).unwrap_err();
        assert!(matches!(err, StagehandError::ExclusiveParameter { name, .. } if name == "prune"));
    }

    #[test]
    fn test_tag_requires_image() {
        let err = tag(Params::new(), &["app:v1"]).unwrap_err();
        assert!(matches!(err, StagehandError::MissingParameter { name, .. } if name == "image"));
    }

    #[test]
    fn test_unshare_requires_container() {
        let err = unshare(Params::new(), &["true".to_string()]).unwrap_err();
        assert!(
            matches!(err, StagehandError::MissingParameter { name, .. } if name == "container")
        );
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let p = params(&[("bogus", Value::Bool(true))]);
        let err = containers(p).unwrap_err();
        assert!(matches!(err, StagehandError::UnknownParameter { name, .. } if name == "bogus"));
    }

    #[test]
    fn test_mount_takes_no_parameters() {
        let p = params(&[("format", Value::Str("json".into()))]);
        let err = mount(p, "c").unwrap_err();
        assert!(matches!(err, StagehandError::UnknownParameter { .. }));
    }
}
