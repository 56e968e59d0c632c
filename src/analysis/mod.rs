//! Static analysis of a template: evaluation order and name resolution.
pub mod link;
pub mod topology;

pub use link::check_bindings;
pub use topology::sort;
