//! Constraint rules. Each rule inspects one value and reports at most one violation.
pub(crate) mod enumeration;
pub(crate) mod numeric;
pub(crate) mod pattern;
