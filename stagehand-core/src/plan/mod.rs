//! Stage dependency planner.
//!
//! Builds a topological execution order over the configured stages from
//! their `consumes` and `depends` relations using Kahn's algorithm. Ties
//! break lexicographically so the order is deterministic run to run.

use crate::config::{Config, Value};
use crate::error::{Result, StagehandError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// A dependency-consistent stage execution order.
#[derive(Debug, Clone)]
pub struct BuildOrder {
    order: Vec<String>,
    index: HashMap<String, usize>,
}

impl BuildOrder {
    /// Stage names in execution order.
    pub fn sequence(&self) -> &[String] {
        &self.order
    }

    /// Position of a stage in the order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// Compute the execution order for every configured stage.
///
/// Fails when a stage references an unknown stage or when the relations
/// form a cycle; the cycle report names its members.
pub fn plan(cx: &Config) -> Result<BuildOrder> {
    let stages = cx.stages()?;

    // deps(s) = consumes(s) ∪ depends(s)
    let mut deps: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for (name, stage) in stages {
        if !matches!(stage, Value::Map(_)) {
            return Err(StagehandError::BadConfigShape {
                key: format!("stages.{name}"),
                reason: format!("expected a mapping, got {}", stage.type_name()),
            });
        }
        let mut set = BTreeSet::new();
        set.extend(relation(cx, name, "consumes")?);
        set.extend(relation(cx, name, "depends")?);

        for dep in &set {
            if !stages.contains_key(dep) {
                return Err(StagehandError::UnknownStage {
                    stage: name.clone(),
                    reference: dep.clone(),
                });
            }
        }
        deps.insert(name.as_str(), set);
    }

    // Kahn's algorithm; the ready set is ordered, so equal-depth stages
    // come out lexicographically.
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (&name, set) in &deps {
        indegree.entry(name).or_insert(0);
        for dep in set {
            *indegree.entry(name).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(name);
        }
    }


    let mut ready: BTreeSet<&str> =
        indegree.iter().filter(|(_, d)| **d == 0).map(|(n, _)| *n).collect();
    let mut order = Vec::with_capacity(deps.len());

    while let Some(next) = ready.iter().next().copied() {
        ready.remove(next);
        order.push(next.to_string());
        for &dependent in dependents.get(next).map_or(&[][..], Vec::as_slice) {
            let degree = indegree.get_mut(dependent).expect("dependent was registered");
            *degree -= 1;
            if *degree == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() != deps.len() {
        let done: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let members: Vec<String> = deps
            .keys()
            .copied()
            .filter(|name| !done.contains(name))
            .map(str::to_string)
            .collect();
        return Err(StagehandError::DependencyCycle { members });
    }

    debug!(order = ?order, "stage execution order");
    let index = order.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
    Ok(BuildOrder { order, index })
}

/// One stage's `consumes` or `depends` list, expanded. A single string is
/// accepted as a one-element list.
fn relation(cx: &Config, stage: &str, field: &str) -> Result<Vec<String>> {
    let Some(raw) = cx.try_get(&["stages", stage, field]) else {
        return Ok(Vec::new());
    };
    let key = format!("stages.{stage}.{field}");
    let bad = |got: &Value| StagehandError::BadConfigShape {
        key: key.clone(),
        reason: format!("expected a string or a sequence of strings, got {}", got.type_name()),
    };
    match cx.expand_value(raw)? {
        Value::Str(s) => Ok(vec![s]),
        Value::Seq(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| bad(item)))
            .collect(),
        other => Err(bad(&other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Callback;
    use std::collections::BTreeMap;

    fn stage(entries: &[(&str, Value)]) -> Value {
        let mut map: BTreeMap<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        map.insert("from".to_string(), Value::Str("img".into()));
        map.insert("func_exec".to_string(), Value::Func(Callback::new(|_, _| Ok(()))));
        Value::Map(map)
    }

    fn config(basename: &str, stages: Vec<(&str, Value)>) -> Config {
        let init = BTreeMap::from([
            ("basename".to_string(), Value::Str(basename.to_string())),
            ("stages".to_string(), Value::map(stages)),
        ]);
        Config::new(init, None).unwrap()
    }

    #[test]
    fn test_two_stage_chain() {
        let cx = config(
            "plan-chain",
            vec![
                ("runtime", stage(&[("consumes", "build".into())])),
                ("build", stage(&[])),
            ],
        );
        let order = plan(&cx).unwrap();
        assert_eq!(order.sequence(), ["build", "runtime"]);
        assert!(order.position("build").unwrap() < order.position("runtime").unwrap());
    }

    #[test]
    fn test_deps_precede_dependents() {
        let cx = config(
            "plan-diamond",
            vec![
                ("top", stage(&[("consumes", Value::seq(["left".into(), "right".into()]))])),
                ("left", stage(&[("depends", "base".into())])),
                ("right", stage(&[("consumes", "base".into())])),
                ("base", stage(&[])),
            ],
        );
        let order = plan(&cx).unwrap();
        assert_eq!(order.len(), 4);
        let pos = |n: &str| order.position(n).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("top"));
        assert!(pos("right") < pos("top"));
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let cx = config(
            "plan-ties",
            vec![("zeta", stage(&[])), ("alpha", stage(&[])), ("mid", stage(&[]))],
        );
        let order = plan(&cx).unwrap();
        assert_eq!(order.sequence(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let stages = vec![
            ("a", stage(&[])),
            ("b", stage(&[("depends", "a".into())])),
            ("c", stage(&[("depends", "a".into())])),
        ];
        let one = plan(&config("plan-det", stages.clone())).unwrap();
        let two = plan(&config("plan-det", stages)).unwrap();
        assert_eq!(one.sequence(), two.sequence());
    }

    #[test]
    fn test_cycle_is_fatal_and_names_members() {
        let cx = config(
            "plan-cycle",
            vec![
                ("a", stage(&[("consumes", "b".into())])),
                ("b", stage(&[("consumes", "a".into())])),
            ],
        );
        let err = plan(&cx).unwrap_err();
        match err {
            StagehandError::DependencyCycle { members } => {
                assert!(members.contains(&"a".to_string()));
                assert!(members.contains(&"b".to_string()));
                let message = format!("{}", StagehandError::DependencyCycle { members });
                assert!(message.contains('a') && message.contains('b'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let cx = config("plan-self", vec![("a", stage(&[("depends", "a".into())]))]);
        assert!(matches!(plan(&cx).unwrap_err(), StagehandError::DependencyCycle { .. }));
    }

    #[test]
    fn test_unknown_reference() {
        let cx = config("plan-unknown", vec![("a", stage(&[("consumes", "ghost".into())]))]);
        let err = plan(&cx).unwrap_err();
        match err {
            StagehandError::UnknownStage { stage, reference } => {
                assert_eq!(stage, "a");
                assert_eq!(reference, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_stages_empty_order() {
        let cx = config("plan-empty", vec![]);
        let order = plan(&cx).unwrap();
        assert!(order.is_empty());
    }
}
