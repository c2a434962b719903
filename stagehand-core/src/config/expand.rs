//! Template-style variable expansion for scalar configuration values.
//!
//! Values read from the tree may embed `[% key %]` references to other
//! scalar leaves; references navigate the tree root with dotted paths.
//! Expansion repeats until the value is stable, with a hard cap of
//! [`MAX_PASSES`] passes per value so self-referencing values cannot loop
//! the driver forever. Hitting the cap is fatal.

use crate::config::value::Value;
use crate::error::{Result, StagehandError};
use std::collections::BTreeMap;

/// Per-value pass cap.
pub const MAX_PASSES: usize = 10;

const OPEN: &str = "[%";
const CLOSE: &str = "%]";

/// Expand every `[% … %]` reference in `input` against `root`.
pub fn expand(root: &BTreeMap<String, Value>, input: &str) -> Result<String> {
    if !has_token(input) {
        return Ok(input.to_string());
    }

    let mut current = input.to_string();
    for _ in 0..MAX_PASSES {
        let next = expand_once(root, &current)?;
        let stable = next == current;
        current = next;
        if !has_token(&current) {
            return Ok(current);
        }
        if stable {
            // A complete token survived a pass unchanged: the value expands
            // to itself and will never converge.
            break;
        }
    }

    Err(StagehandError::ExpansionDiverged { passes: MAX_PASSES, value: current })
}

/// One substitution pass over `input`.
fn expand_once(root: &BTreeMap<String, Value>, input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find(OPEN) {
        let Some(len) = rest[start + OPEN.len()..].find(CLOSE) else {
            // Unterminated delimiter, keep it literally.
            break;
        };
        out.push_str(&rest[..start]);
        let reference = rest[start + OPEN.len()..start + OPEN.len() + len].trim();
        out.push_str(&resolve(root, reference)?);
        rest = &rest[start + OPEN.len() + len + CLOSE.len()..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve a dotted reference to a scalar leaf of the tree.
fn resolve(root: &BTreeMap<String, Value>, reference: &str) -> Result<String> {
    let mut map = root;
    let mut keys = reference.split('.').peekable();

    while let Some(key) = keys.next() {
        let bad = || StagehandError::BadExpansionReference { reference: reference.to_string() };
        let node = map.get(key).ok_or_else(bad)?;
        if keys.peek().is_none() {
            return node.scalar_string().ok_or_else(bad);
        }
        map = node.as_map().ok_or_else(bad)?;
    }

    Err(StagehandError::BadExpansionReference { reference: reference.to_string() })
}

fn has_token(s: &str) -> bool {
    match s.find(OPEN) {
        Some(start) => s[start + OPEN.len()..].contains(CLOSE),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_plain_string_untouched() {
        let r = root(&[]);
        assert_eq!(expand(&r, "docker://alpine:3.20").unwrap(), "docker://alpine:3.20");
    }

    #[test]
    fn test_single_reference() {
        let r = root(&[("alpine_version", Value::Str("3.20".into()))]);
        let expanded = expand(&r, "docker://docker.io/alpine:[% alpine_version %]").unwrap();
        assert_eq!(expanded, "docker://docker.io/alpine:3.20");
        assert!(!expanded.contains("[%"));
    }

    #[test]
    fn test_nested_reference() {
        let r = root(&[
            ("registry", Value::Str("docker.io".into())),
            ("image", Value::Str("[% registry %]/alpine".into())),
        ]);
        assert_eq!(expand(&r, "docker://[% image %]:edge").unwrap(), "docker://docker.io/alpine:edge");
    }

    #[test]
    fn test_dotted_path() {
        let r = root(&[("versions", Value::map([("alpine", Value::Str("3.20".into()))]))]);
        assert_eq!(expand(&r, "alpine:[% versions.alpine %]").unwrap(), "alpine:3.20");
    }

    #[test]
    fn test_integer_leaf() {
        let r = root(&[("port", Value::Int(8080))]);
        assert_eq!(expand(&r, "0.0.0.0:[% port %]").unwrap(), "0.0.0.0:8080");
    }

    #[test]
    fn test_unknown_reference_fails() {
        let r = root(&[]);
        let err = expand(&r, "[% nope %]").unwrap_err();
        assert!(matches!(err, StagehandError::BadExpansionReference { .. }));
    }

    #[test]
    fn test_non_scalar_reference_fails() {
        let r = root(&[("stages", Value::map([("a", Value::Bool(true))]))]);
        assert!(expand(&r, "[% stages %]").is_err());
    }

    #[test]
    fn test_self_reference_is_fatal() {
        let r = root(&[("a", Value::Str("[% a %]".into()))]);
        let err = expand(&r, "[% a %]").unwrap_err();
        assert!(matches!(err, StagehandError::ExpansionDiverged { .. }));
    }

    #[test]
    fn test_growing_self_reference_is_fatal() {
        let r = root(&[("a", Value::Str("x[% a %]".into()))]);
        assert!(matches!(
            expand(&r, "[% a %]").unwrap_err(),
            StagehandError::ExpansionDiverged { passes: MAX_PASSES, .. }
        ));
    }

    #[test]
    fn test_unterminated_delimiter_kept() {
        let r = root(&[]);
        assert_eq!(expand(&r, "50[% off").unwrap(), "50[% off");
    }

    #[test]
    fn test_multiple_references_one_value() {
        let r = root(&[
            ("name", Value::Str("hello".into())),
            ("tag", Value::Str("v1".into())),
        ]);
        assert_eq!(expand(&r, "[% name %]:[% tag %]").unwrap(), "hello:v1");
    }
}
