use crate::error::EngineError;
use crate::graph::{DependencyGraph, Node, NodeId};
use petgraph::algo::tarjan_scc;
use petgraph::Direction;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Performs a Topological Sort using Kahn's algorithm.
///
/// Returns every node of the graph, dependencies before their dependents.
/// Among nodes that are ready at the same time the one with the lowest
/// `(displayOrder, name)` goes first, so the order depends only on the
/// template and never on declaration order. The main formula is always last.
pub fn sort(graph: &DependencyGraph) -> Result<Vec<NodeId>, EngineError> {
    let g = &graph.graph;
    let mut in_degree: Vec<usize> = g
        .node_indices()
        .map(|n| g.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Ready<'_>> = g
        .node_indices()
        .filter(|n| in_degree[n.index()] == 0)
        .map(|id| Ready { id, node: &g[id] })
        .collect();
    let mut order = Vec::with_capacity(g.node_count());

    while let Some(Ready { id, .. }) = ready.pop() {
        order.push(id);
        for child in g.neighbors_directed(id, Direction::Outgoing) {
            let degree = &mut in_degree[child.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Ready { id: child, node: &g[child] });
            }
        }
    }

    if order.len() != g.node_count() {
        return Err(EngineError::DependencyCycle { members: cycle_members(graph) });
    }
    Ok(order)
}

/// A node waiting in the ready queue. `BinaryHeap` is a max-heap, so the
/// ordering is reversed to pop the lowest priority first.
struct Ready<'g> {
    id: NodeId,
    node: &'g Node,
}

impl Ord for Ready<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        other.node.priority(self.node)
    }
}

impl PartialOrd for Ready<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ready<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Ready<'_> {}

/// Names the members of the first cycle, each cycle's members in priority
/// order. A parameter that depends on itself is a cycle of one.
fn cycle_members(graph: &DependencyGraph) -> Vec<String> {
    let g = &graph.graph;
    let mut cycles: Vec<Vec<&Node>> = tarjan_scc(g)
        .into_iter()
        .filter(|scc| scc.len() > 1 || g.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut nodes: Vec<&Node> = scc.into_iter().map(|id| &g[id]).collect();
            nodes.sort_by(|a, b| a.priority(b));
            nodes
        })
        .collect();
    cycles.sort_by(|a, b| a[0].priority(b[0]));
    cycles
        .first()
        .map(|c| c.iter().map(|n| n.name().to_string()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::TemplateFormulas;
    use crate::graph::MAIN_FORMULA;
    use crate::store::{DataType, Parameter, ParameterModel, ParameterScope, Template};
    use rstest::rstest;

    fn helper(name: &str, formula: &str, order: i32) -> Parameter {
        Parameter::new(name, DataType::Number, ParameterScope::Internal)
            .with_formula(formula)
            .ordered(order)
    }

    fn names(t: &Template) -> Result<Vec<String>, EngineError> {
        let model = ParameterModel::load(t)?;
        let formulas = TemplateFormulas::compile(t, None)?;
        let graph = DependencyGraph::build(&model, &formulas)?;
        Ok(sort(&graph)?.into_iter().map(|id| graph.node(id).name().to_string()).collect())
    }

    #[test]
    fn test_sort_diamond_dependency() {
        // Shape: a -> b, a -> c, b + c -> d
        let t = Template::new("t", "diamond", "return { d }")
            .with_parameter(helper("d", "b + c", 1))
            .with_parameter(helper("c", "a * 3", 2))
            .with_parameter(helper("b", "a * 2", 3))
            .with_parameter(helper("a", "1", 4));
        assert_eq!(names(&t).unwrap(), ["a", "c", "b", "d", MAIN_FORMULA]);
    }

    #[rstest]
    #[case(&["x", "y", "z"])]
    #[case(&["z", "y", "x"])]
    #[case(&["y", "z", "x"])]
    fn test_declaration_order_does_not_matter(#[case] declared: &[&str]) {
        let mut t = Template::new("t", "order", "return {}");
        for name in declared {
            t = t.with_parameter(helper(name, "1", 0));
        }
        assert_eq!(names(&t).unwrap(), ["x", "y", "z", MAIN_FORMULA]);
    }

    #[test]
    fn test_cycle_detection_names_members() {
        let t = Template::new("t", "cycle", "return {}")
            .with_parameter(helper("ok", "1", 0))
            .with_parameter(helper("b", "a + 1", 2))
            .with_parameter(helper("a", "b + 1", 1));
        let err = names(&t).unwrap_err();
        assert_eq!(err, EngineError::DependencyCycle { members: vec!["a".into(), "b".into()] });
    }

    #[test]
    fn test_declared_self_dependency_is_a_cycle() {
        let t = Template::new("t", "self", "return {}")
            .with_parameter(helper("a", "1", 0).depends_on(["a"]));
        let err = names(&t).unwrap_err();
        assert_eq!(err, EngineError::DependencyCycle { members: vec!["a".into()] });
    }
}
