//! Defines the `Edge` type, representing a dependency between two nodes.

/// Describes why one node must be evaluated before another.
///
/// Both kinds order evaluation identically; the distinction is kept for the
/// audit trace and for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// Listed in the dependent parameter's `dependsOnParameters`.
    Declared,
    /// Found among the free identifiers of the dependent's formula.
    /// Example: `pendienteMaxima` referencing `longitudHorizontal`.
    Reference,
}
