//! dag.rs
//! The dependency graph of one template, stored as a petgraph `DiGraph`.
//! Edges point from a dependency to its dependent.

use super::edge::Edge;
use super::node::{Node, NodeId};
use crate::error::EngineError;
use crate::formula::TemplateFormulas;
use crate::store::{ParameterModel, ParameterScope};
use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub(crate) graph: DiGraph<Node, Edge>,
    by_name: HashMap<String, NodeId>,
    main: NodeId,
}

impl DependencyGraph {
    /// Builds the graph from declared dependencies and formula references.
    ///
    /// References to INPUT parameters carry no ordering and are not edges. A
    /// helper naming itself (recursion) is not an edge either, while a
    /// parameter listing itself in `dependsOnParameters` is a cycle.
    pub fn build(model: &ParameterModel<'_>, formulas: &TemplateFormulas) -> Result<Self, EngineError> {
        for spec in model.iter() {
            if let Some(missing) = spec.param.depends_on_parameters.iter().find(|d| !model.contains(d)) {
                return Err(EngineError::UnresolvedDependency {
                    parameter: spec.name().to_string(),
                    missing: missing.clone(),
                });
            }
        }

        let mut dag = Self { graph: DiGraph::new(), by_name: HashMap::new(), main: NodeId::end() };
        let computed: Vec<_> = model.iter().filter(|s| s.param.scope != ParameterScope::Input).collect();
        for spec in &computed {
            let id = dag.graph.add_node(Node::Parameter {
                name: spec.name().to_string(),
                display_order: spec.param.display_order,
                has_formula: spec.param.formula.is_some(),
            });
            dag.by_name.insert(spec.name().to_string(), id);
        }
        dag.main = dag.graph.add_node(Node::Main);

        for spec in &computed {
            let to = dag.by_name[spec.name()];
            for dep in &spec.param.depends_on_parameters {
                if let Some(&from) = dag.by_name.get(dep.as_str()) {
                    dag.link(from, to, Edge::Declared);
                }
            }
            if let Some(compiled) = formulas.parameter(spec.name()) {
                for ident in compiled.free_identifiers.iter().filter(|i| *i != spec.name()) {
                    if let Some(&from) = dag.by_name.get(ident.as_str()) {
                        dag.link(from, to, Edge::Reference);
                    }
                }
            }
        }
        for ident in &formulas.main.free_identifiers {
            if let Some(&from) = dag.by_name.get(ident.as_str()) {
                dag.link(from, dag.main, Edge::Reference);
            }
        }
        Ok(dag)
    }

    fn link(&mut self, from: NodeId, to: NodeId, edge: Edge) {
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, edge);
        }
    }

    pub fn node_count(&self) -> usize { self.graph.node_count() }

    pub fn main(&self) -> NodeId { self.main }

    pub fn node(&self, id: NodeId) -> &Node { &self.graph[id] }

    pub fn node_id(&self, name: &str) -> Option<NodeId> { self.by_name.get(name).copied() }

    /// Nodes this node waits for, with the reason.
    pub fn dependencies(&self, id: NodeId) -> impl Iterator<Item = (NodeId, Edge)> + '_ {
        self.graph.edges_directed(id, Direction::Incoming).map(|e| (e.source(), *e.weight()))
    }

    /// Every node reachable upstream from `start`, excluding `start`.
    pub fn upstream_from(&self, start: NodeId) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for parent in self.graph.neighbors_directed(node, Direction::Incoming) {
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
        visited.remove(&start);
        visited
    }
}
