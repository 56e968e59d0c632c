//! Defines the `Node` type, a single schedulable step of a template execution.

use petgraph::graph::NodeIndex;
use std::cmp::Ordering;

/// A stable identifier for a node within the dependency graph.
///
/// This is a type alias for `petgraph::graph::NodeIndex` to abstract the
/// underlying graph implementation.
pub type NodeId = NodeIndex;

/// Label used for the main formula in plans, traces and error messages.
pub const MAIN_FORMULA: &str = "<main>";

/// The primary enum representing a node in the dependency graph.
///
/// INPUT parameters are not nodes: their values come from the caller and are
/// ready before anything is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// An INTERNAL or OUTPUT parameter.
    Parameter {
        name: String,
        display_order: i32,
        /// Whether the parameter carries its own (helper) formula. Parameters
        /// without one are filled from the main formula's returned object.
        has_formula: bool,
    },
    /// The template's main formula, always scheduled last.
    Main,
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Parameter { name, .. } => name,
            Node::Main => MAIN_FORMULA,
        }
    }

    pub fn has_formula(&self) -> bool {
        match self {
            Node::Parameter { has_formula, .. } => *has_formula,
            Node::Main => true,
        }
    }

    /// Scheduling priority among nodes that are ready at the same time:
    /// `displayOrder` ascending, then name. The main formula sorts after all.
    pub fn priority(&self, other: &Node) -> Ordering {
        match (self, other) {
            (Node::Main, Node::Main) => Ordering::Equal,
            (Node::Main, _) => Ordering::Greater,
            (_, Node::Main) => Ordering::Less,
            (
                Node::Parameter { name: a, display_order: oa, .. },
                Node::Parameter { name: b, display_order: ob, .. },
            ) => oa.cmp(ob).then_with(|| a.cmp(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, order: i32) -> Node {
        Node::Parameter { name: name.into(), display_order: order, has_formula: false }
    }

    #[test]
    fn test_priority_by_display_order_then_name() {
        assert_eq!(param("z", 1).priority(&param("a", 2)), Ordering::Less);
        assert_eq!(param("b", 1).priority(&param("a", 1)), Ordering::Greater);
        assert_eq!(Node::Main.priority(&param("a", i32::MAX)), Ordering::Greater);
    }
}
