//! Step dependency graph.
//!
//! Uses `petgraph` to model `input_from` edges (upstream -> dependent). The
//! scheduler asks it for the transitive dependents to skip after a failure;
//! `flowrun validate` prints its execution waves.

use std::collections::HashMap;

use flowrun_types::workflow::WorkflowDefinition;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;

/// Directed graph of a validated workflow's steps.
#[derive(Debug, Clone)]
pub struct StepGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl StepGraph {
    /// Build the graph. Nodes are added in definition order.
    pub fn build(definition: &WorkflowDefinition) -> Self {
        let mut graph = DiGraph::<String, ()>::new();
        let mut index = HashMap::new();
        for step in &definition.steps {
            let node = graph.add_node(step.id.clone());
            index.insert(step.id.clone(), node);
        }
        for step in &definition.steps {
            if let Some(source) = &step.input_from {
                if let (Some(&from), Some(&to)) = (index.get(source), index.get(&step.id)) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        Self { graph, index }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every step downstream of `step_id` (excluding itself), in definition order.
    pub fn transitive_dependents(&self, step_id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(step_id) else {
            return Vec::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut nodes = Vec::new();
        while let Some(node) = bfs.next(&self.graph) {
            if node != start {
                nodes.push(node);
            }
        }
        nodes.sort();
        nodes.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    /// Group steps into waves by depth: wave 0 holds root steps, wave `n`
    /// holds steps whose upstream is in wave `n - 1`.
    pub fn execution_waves(&self) -> Vec<Vec<&str>> {
        // Node indices follow definition order, and upstream steps always come
        // first, so one pass in index order sees every parent before its child.
        let mut depth: Vec<usize> = vec![0; self.graph.node_count()];
        for node in self.graph.node_indices() {
            if let Some(parent) = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .next()
            {
                depth[node.index()] = depth[parent.index()] + 1;
            }
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<&str>> = vec![Vec::new(); max_depth + 1];
        for node in self.graph.node_indices() {
            waves[depth[node.index()]].push(self.graph[node].as_str());
        }
        if self.is_empty() {
            waves.clear();
        }
        waves
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_types::workflow::{ConfigMap, StepSpec};

    fn step(id: &str, input_from: Option<&str>) -> StepSpec {
        StepSpec {
            id: id.to_string(),
            agent: "echo".to_string(),
            config: ConfigMap::new(),
            input_from: input_from.map(str::to_string),
            outputs: vec![],
            timeout_secs: None,
            retry: None,
        }
    }

    fn workflow(steps: Vec<StepSpec>) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "graph".to_string(),
            version: "1".to_string(),
            description: None,
            steps,
        }
    }

    /// a -> b -> d, a -> c, e independent
    fn diamondish() -> StepGraph {
        StepGraph::build(&workflow(vec![
            step("a", None),
            step("b", Some("a")),
            step("c", Some("a")),
            step("d", Some("b")),
            step("e", None),
        ]))
    }

    #[test]
    fn transitive_dependents_exclude_self() {
        let graph = diamondish();
        assert_eq!(graph.transitive_dependents("a"), vec!["b", "c", "d"]);
        assert_eq!(graph.transitive_dependents("b"), vec!["d"]);
        assert!(graph.transitive_dependents("e").is_empty());
    }

    #[test]
    fn waves_group_by_depth() {
        let graph = diamondish();
        assert_eq!(
            graph.execution_waves(),
            vec![vec!["a", "e"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn empty_graph_has_no_waves() {
        let graph = StepGraph::build(&workflow(vec![]));
        assert!(graph.is_empty());
        assert!(graph.execution_waves().is_empty());
    }
}
