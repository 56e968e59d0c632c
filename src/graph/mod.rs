//! Defines the core data structures for the dependency graph.
pub mod dag;
pub mod edge;
pub mod node;

// Re-export key types for convenient access
pub use dag::DependencyGraph;
pub use edge::Edge;
pub use node::{Node, NodeId, MAIN_FORMULA};
