//! Cross-workflow dependency graph checks.
//!
//! `depends_on` edges between workflows must stay acyclic. The check runs on
//! the save path: the candidate's declared dependencies replace whatever the
//! stored copy had, and the resulting graph is searched for a path leading
//! back to the candidate.

use std::collections::{HashMap, HashSet};

use devflow_types::workflow::WorkflowDefinition;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

/// Result of a dependency cycle check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleCheck {
    pub has_cycle: bool,
    /// The offending path, starting and ending at the checked workflow.
    pub cycle: Vec<String>,
}

/// Check whether giving workflow `id` the dependencies `depends_on` would
/// close a cycle, given the other stored definitions in `all`.
pub fn detect_cycle(id: &str, depends_on: &[String], all: &[WorkflowDefinition]) -> CycleCheck {
    let mut graph = DiGraph::<String, ()>::new();
    let mut index: HashMap<String, NodeIndex> = HashMap::new();
    let mut node = |graph: &mut DiGraph<String, ()>, name: &str| -> NodeIndex {
        *index
            .entry(name.to_string())
            .or_insert_with(|| graph.add_node(name.to_string()))
    };

    let root = node(&mut graph, id);
    for dep in depends_on {
        let to = node(&mut graph, dep);
        graph.add_edge(root, to, ());
    }
    for def in all.iter().filter(|d| d.id != id) {
        let from = node(&mut graph, &def.id);
        for dep in def.dependency_ids() {
            let to = node(&mut graph, &dep);
            graph.add_edge(from, to, ());
        }
    }

    let closes_cycle = graph
        .neighbors(root)
        .any(|next| has_path_connecting(&graph, next, root, None));
    if !closes_cycle {
        return CycleCheck::default();
    }

    let mut path = vec![id.to_string()];
    let mut seen = HashSet::new();
    if find_path_back(&graph, root, root, &mut seen, &mut path) {
        CycleCheck {
            has_cycle: true,
            cycle: path,
        }
    } else {
        CycleCheck {
            has_cycle: true,
            cycle: vec![id.to_string(), id.to_string()],
        }
    }
}

fn find_path_back(
    graph: &DiGraph<String, ()>,
    current: NodeIndex,
    target: NodeIndex,
    seen: &mut HashSet<NodeIndex>,
    path: &mut Vec<String>,
) -> bool {
    // Walk neighbors in insertion order so the reported cycle is stable.
    let mut neighbors: Vec<NodeIndex> = graph.neighbors(current).collect();
    neighbors.reverse();
    for next in neighbors {
        if next == target {
            path.push(graph[target].clone());
            return true;
        }
        if !seen.insert(next) {
            continue;
        }
        path.push(graph[next].clone());
        if find_path_back(graph, next, target, seen, path) {
            return true;
        }
        path.pop();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use devflow_types::workflow::WorkflowDependency;

    fn wf(id: &str, deps: &[&str]) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: None,
            enabled: true,
            trigger: Default::default(),
            scope: None,
            concurrency: Default::default(),
            depends_on: deps
                .iter()
                .map(|d| WorkflowDependency {
                    workflow: d.to_string(),
                    max_age: None,
                })
                .collect(),
            timeout_secs: None,
            steps: vec![],
            graph: None,
        }
    }

    #[test]
    fn acyclic_chain_passes() {
        let all = vec![wf("b", &["c"]), wf("c", &[])];
        let check = detect_cycle("a", &["b".to_string()], &all);
        assert_eq!(check, CycleCheck::default());
    }

    #[test]
    fn indirect_cycle_is_reported_with_path() {
        let all = vec![wf("b", &["c"]), wf("c", &["a"])];
        let check = detect_cycle("a", &["b".to_string()], &all);
        assert!(check.has_cycle);
        assert_eq!(check.cycle, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let check = detect_cycle("a", &["a".to_string()], &[]);
        assert!(check.has_cycle);
        assert_eq!(check.cycle, vec!["a", "a"]);
    }

    #[test]
    fn stored_copy_of_candidate_is_replaced() {
        // The stored "a" still depends on "b", but the candidate drops it.
        let all = vec![wf("a", &["b"]), wf("b", &["a"])];
        let check = detect_cycle("a", &[], &all);
        assert!(!check.has_cycle);
    }

    #[test]
    fn unrelated_cycle_is_not_blamed_on_candidate() {
        let all = vec![wf("x", &["y"]), wf("y", &["x"])];
        let check = detect_cycle("a", &["x".to_string()], &all);
        assert!(!check.has_cycle);
    }

    #[test]
    fn missing_targets_are_ignored() {
        let check = detect_cycle("a", &["ghost".to_string()], &[]);
        assert!(!check.has_cycle);
    }
}
