//! Schema-driven translation of named parameters into builder arguments.
//!
//! Every wrapped subcommand declares one [`Schema`] naming which parameters
//! it accepts and how each is rendered. Processing follows a fixed order so
//! the resulting argument list is deterministic: extract, literal prefix,
//! exclusive check, flags, boolean-string flags, scalar options, repeated
//! options, list-literal options. Anything left over afterwards is a bug in
//! the caller and fatal.

use crate::builder::Params;
use crate::config::Value;
use crate::error::{Result, StagehandError};

/// Parameter grammar for one wrapped subcommand.
#[derive(Debug, Default, Clone, Copy)]
pub struct Schema {
    /// Removed from the parameter map and handed back to the caller.
    pub extract: &'static [&'static str],
    /// Literal arguments emitted first.
    pub arg_init: &'static [&'static str],
    /// Parameters that must be alone; emitted as `--name`.
    pub exclusive: &'static [&'static str],
    /// Boolean parameters emitted as `--name` when true.
    pub arg_flag: &'static [&'static str],
    /// String parameters restricted to "true"/"false", emitted as `--name value`.
    pub arg_flag_str: &'static [&'static str],
    /// Scalar parameters emitted as `--name value`.
    pub arg_str: &'static [&'static str],
    /// Sequence parameters emitted as repeated `--name value`.
    pub arg_array: &'static [&'static str],
    /// Sequence parameters emitted as one `--name '[ "v1", "v2" ]'`.
    pub arg_list: &'static [&'static str],
}

/// Output of [`translate`].
#[derive(Debug, Default)]
pub struct Translated {
    /// Parameters named by `extract`, removed before argument rendering.
    pub extracted: Params,
    /// The rendered argument tail.
    pub argv: Vec<String>,
}

/// Translate `params` into an argument list per `schema`.
///
/// `callee` labels contract violations. On success the parameter map has
/// been fully consumed.
pub fn translate(callee: &str, schema: &Schema, mut params: Params) -> Result<Translated> {
    let mut out = Translated::default();

    for name in schema.extract {
        if let Some(value) = params.remove(*name) {
            out.extracted.insert(name.to_string(), value);
        }
    }

    for literal in schema.arg_init {
        out.argv.push(literal.to_string());
    }

    for name in schema.exclusive {
        let Some(value) = params.get(*name) else { continue };
        if params.len() > 1 {
            return Err(StagehandError::ExclusiveParameter {
                callee: callee.to_string(),
                name: name.to_string(),
            });
        }
        match value {
            Value::Bool(true) => out.argv.push(format!("--{name}")),
            other => return Err(bad_type(callee, name, "true", other)),
        }
        params.remove(*name);
    }

    for name in schema.arg_flag {
        match params.remove(*name) {
            None => {}
            Some(Value::Bool(true)) => out.argv.push(format!("--{name}")),
            Some(Value::Bool(false)) => {}
            Some(other) => return Err(bad_type(callee, name, "a boolean", &other)),
        }
    }

    for name in schema.arg_flag_str {
        let Some(value) = params.remove(*name) else { continue };
        match value.as_str() {
            Some(s @ ("true" | "false")) => {
                out.argv.push(format!("--{name}"));
                out.argv.push(s.to_string());
            }
            _ => return Err(bad_type(callee, name, "the string \"true\" or \"false\"", &value)),
        }
    }

    for name in schema.arg_str {
        let Some(value) = params.remove(*name) else { continue };
        let rendered = scalar(callee, name, &value)?;
        out.argv.push(format!("--{name}"));
        out.argv.push(rendered);
    }

    for name in schema.arg_array {
        let Some(value) = params.remove(*name) else { continue };
        for item in sequence(callee, name, &value)? {
            out.argv.push(format!("--{name}"));
            out.argv.push(item);
        }
    }

    for name in schema.arg_list {
        let Some(value) = params.remove(*name) else { continue };
        let items = sequence(callee, name, &value)?;
        out.argv.push(format!("--{name}"));
        out.argv.push(list_literal(&items));
    }

    if let Some(name) = params.keys().next() {
        return Err(StagehandError::UnknownParameter {
            callee: callee.to_string(),
            name: name.clone(),
        });
    }

    Ok(out)
}

/// Render a scalar parameter value.
fn scalar(callee: &str, name: &str, value: &Value) -> Result<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(n) => Ok(n.to_string()),
        other => Err(bad_type(callee, name, "a scalar", other)),
    }
}

/// Render a sequence parameter. A single scalar is a one-element sequence.
fn sequence(callee: &str, name: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Seq(items) => {
            items.iter().map(|item| scalar(callee, name, item)).collect()
        }
        scalar_value => Ok(vec![scalar(callee, name, scalar_value)?]),
    }
}

/// The builder's list-literal form: `[ "v1", "v2" ]`.
fn list_literal(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("\"{s}\"")).collect();
    format!("[ {} ]", quoted.join(", "))
}

fn bad_type(callee: &str, name: &str, expected: &'static str, got: &Value) -> StagehandError {
    StagehandError::BadParameterType {
        callee: callee.to_string(),
        name: name.to_string(),
        expected,
        got: got.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, Value)]) -> Params {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_empty_schema_empty_params() {
        let t = translate("t", &Schema::default(), Params::new()).unwrap();
        assert!(t.argv.is_empty());
        assert!(t.extracted.is_empty());
    }

    #[test]
    fn test_processing_order_is_fixed() {
        let schema = Schema {
            arg_init: &["--add-history"],
            arg_flag: &["quiet"],
            arg_flag_str: &["pull"],
            arg_str: &["name"],
            arg_array: &["volume"],
            arg_list: &["entrypoint"],
            ..Schema::default()
        };
        let p = params(&[
            ("entrypoint", Value::seq(["/bin/sh".into(), "-c".into()])),
            ("name", Value::Str("web".into())),
            ("pull", Value::Str("true".into())),
            ("quiet", Value::Bool(true)),
            ("volume", Value::seq(["/a:/a".into(), "/b:/b".into()])),
        ]);

        let t = translate("t", &schema, p).unwrap();
        assert_eq!(
            t.argv,
            vec![
                "--add-history",
                "--quiet",
                "--pull",
                "true",
                "--name",
                "web",
                "--volume",
                "/a:/a",
                "--volume",
                "/b:/b",
                "--entrypoint",
                "[ \"/bin/sh\", \"-c\" ]",
            ]
        );
    }

    #[test]
    fn test_translate_is_deterministic() {
        let schema = Schema { arg_str: &["author", "user"], ..Schema::default() };
        let p = params(&[("user", Value::Str("u".into())), ("author", Value::Str("a".into()))]);
        let one = translate("t", &schema, p.clone()).unwrap();
        let two = translate("t", &schema, p).unwrap();
        assert_eq!(one.argv, two.argv);
        // Schema declaration order, not parameter map order.
        assert_eq!(one.argv, vec!["--author", "a", "--user", "u"]);
    }

    #[test]
    fn test_extract_removes_params() {
        let schema = Schema { extract: &["image"], ..Schema::default() };
        let t = translate("t", &schema, params(&[("image", Value::Str("app:v1".into()))])).unwrap();
        assert!(t.argv.is_empty());
        assert_eq!(t.extracted["image"], Value::Str("app:v1".into()));
    }

    #[test]
    fn test_exclusive_alone_emits_flag() {
        let schema = Schema { exclusive: &["all"], ..Schema::default() };
        let t = translate("rm", &schema, params(&[("all", Value::Bool(true))])).unwrap();
        assert_eq!(t.argv, vec!["--all"]);
    }

    #[test]
    fn test_exclusive_violation_fails_before_emitting() {
        let schema =
            Schema { exclusive: &["all"], arg_flag: &["force"], ..Schema::default() };
        let p = params(&[("all", Value::Bool(true)), ("force", Value::Bool(true))]);
        let err = translate("rm", &schema, p).unwrap_err();
        match err {
            StagehandError::ExclusiveParameter { callee, name } => {
                assert_eq!(callee, "rm");
                assert_eq!(name, "all");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_flag_false_is_omitted() {
        let schema = Schema { arg_flag: &["quiet"], ..Schema::default() };
        let t = translate("t", &schema, params(&[("quiet", Value::Bool(false))])).unwrap();
        assert!(t.argv.is_empty());
    }

    #[test]
    fn test_flag_rejects_non_boolean() {
        let schema = Schema { arg_flag: &["quiet"], ..Schema::default() };
        let err = translate("t", &schema, params(&[("quiet", Value::Str("yes".into()))]))
            .unwrap_err();
        assert!(matches!(err, StagehandError::BadParameterType { .. }));
    }

    #[test]
    fn test_flag_str_rejects_other_values() {
        let schema = Schema { arg_flag_str: &["pull"], ..Schema::default() };
        let err =
            translate("t", &schema, params(&[("pull", Value::Str("always".into()))])).unwrap_err();
        assert!(matches!(err, StagehandError::BadParameterType { .. }));
    }

    #[test]
    fn test_str_rejects_sequence() {
        let schema = Schema { arg_str: &["name"], ..Schema::default() };
        let err = translate("t", &schema, params(&[("name", Value::seq(["a".into()]))]))
            .unwrap_err();
        assert!(matches!(err, StagehandError::BadParameterType { .. }));
    }

    #[test]
    fn test_array_accepts_single_scalar() {
        let schema = Schema { arg_array: &["env"], ..Schema::default() };
        let scalar = translate("t", &schema, params(&[("env", Value::Str("A=1".into()))])).unwrap();
        let seq = translate("t", &schema, params(&[("env", Value::seq(["A=1".into()]))])).unwrap();
        assert_eq!(scalar.argv, seq.argv);
        assert_eq!(scalar.argv, vec!["--env", "A=1"]);
    }

    #[test]
    fn test_array_preserves_element_order() {
        let schema = Schema { arg_array: &["port"], ..Schema::default() };
        let p = params(&[("port", Value::seq(["80".into(), "443".into(), "8080".into()]))]);
        let t = translate("t", &schema, p).unwrap();
        assert_eq!(t.argv, vec!["--port", "80", "--port", "443", "--port", "8080"]);
    }

    #[test]
    fn test_list_literal_form() {
        let schema = Schema { arg_list: &["entrypoint"], ..Schema::default() };
        let p = params(&[("entrypoint", Value::seq(["/app/run".into(), "--serve".into()]))]);
        let t = translate("t", &schema, p).unwrap();
        assert_eq!(t.argv, vec!["--entrypoint", "[ \"/app/run\", \"--serve\" ]"]);
    }

    #[test]
    fn test_leftover_parameter_is_fatal() {
        let err = translate("rm", &Schema::default(), params(&[("bogus", Value::Bool(true))]))
            .unwrap_err();
        match err {
            StagehandError::UnknownParameter { callee, name } => {
                assert_eq!(callee, "rm");
                assert_eq!(name, "bogus");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_integer_scalar_renders() {
        let schema = Schema { arg_str: &["uid"], ..Schema::default() };
        let t = translate("t", &schema, params(&[("uid", Value::Int(1000))])).unwrap();
        assert_eq!(t.argv, vec!["--uid", "1000"]);
    }
}
