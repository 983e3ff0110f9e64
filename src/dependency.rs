// ABOUTME: Dependency graph construction and validation for workflow tasks
// ABOUTME: Detects missing references and cycles before any task executes

use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};

use crate::error::{Result, WorkflowError};
use crate::task::Task;

/// Directed graph over task names with edges from dependency to dependent.
#[derive(Debug)]
pub(crate) struct DependencyGraph {
    graph: Graph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph, rejecting any dependency name that is not a task.
    pub fn from_tasks(tasks: &IndexMap<String, Task>) -> Result<Self> {
        let mut graph = Graph::new();
        let mut indices = HashMap::new();

        for name in tasks.keys() {
            let index = graph.add_node(name.clone());
            indices.insert(name.clone(), index);
        }

        for (name, task) in tasks {
            let task_index = indices[name];
            for dependency in task.dependencies() {
                match indices.get(dependency) {
                    Some(&dependency_index) => {
                        graph.add_edge(dependency_index, task_index, ());
                    }
                    None => {
                        return Err(WorkflowError::MissingDependency {
                            task: name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { graph, indices })
    }

    /// Topological sort of the whole graph; any cycle aborts validation.
    pub fn check_cycles(&self) -> Result<()> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| WorkflowError::CycleDetected {
                tasks: vec![self.graph[cycle.node_id()].clone()],
            })
    }

    /// Tasks that directly depend on the given task.
    pub fn dependents(&self, task_name: &str) -> Vec<String> {
        match self.indices.get(task_name) {
            Some(&index) => self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .map(|dependent| self.graph[dependent].clone())
                .collect(),
            None => Vec::new(),
        }
    }
}
