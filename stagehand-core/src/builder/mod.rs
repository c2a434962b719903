//! The builder-subcommand wrapper layer.
//!
//! Translates typed named parameters into buildah command lines through the
//! schema-driven grammar engine. Global subcommands (no container target)
//! live in [`global`]; per-container subcommands are methods on
//! [`crate::stage::Stage`], which supplies the container name itself.
//!
//! Only flags a wrapper's schema declares are reachable; widening a
//! wrapper's surface is an additive schema change.

pub mod global;
pub mod grammar;

mod container;

use crate::config::Value;
use crate::error::Result;
use crate::process;
use std::collections::BTreeMap;

/// The external builder program.
pub const BUILDER_PROGRAM: &str = "buildah";

/// Named parameters for a wrapper call.
pub type Params = BTreeMap<String, Value>;

/// Start a builder argument vector: located program plus subcommand.
pub(crate) fn builder_command(subcommand: &str) -> Result<Vec<String>> {
    let program = process::locate(BUILDER_PROGRAM)?;
    Ok(vec![program.to_string_lossy().into_owned(), subcommand.to_string()])
}

/// Diagnostic label for a builder subcommand invocation.
pub(crate) fn label(subcommand: &str) -> String {
    format!("{BUILDER_PROGRAM} {subcommand}")
}
