//! Errors returned by `CalculationEngine::execute`.
use crate::compute::EvalError;
use crate::store::DataType;
use crate::validation::ValidationError;
use thiserror::Error;

/// Coarse classification for callers that map errors to transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The template itself is malformed.
    Definition,
    /// The caller's inputs were rejected.
    Input,
    /// A formula failed to compile, link or run.
    Evaluation,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Parameter '{name}' is declared more than once")]
    DuplicateParameterName { name: String },
    #[error("Input parameter '{name}' must not declare a formula")]
    InputWithFormula { name: String },
    #[error("Invalid constraint on '{parameter}': {reason}")]
    InvalidConstraint { parameter: String, reason: String },
    #[error("Dependency cycle among parameters {members:?}")]
    DependencyCycle { members: Vec<String> },
    #[error("Parameter '{parameter}' depends on undeclared '{missing}'")]
    UnresolvedDependency { parameter: String, missing: String },
    #[error("{} invalid input(s): {}", .0.len(), join_errors(.0))]
    InvalidInputs(Vec<ValidationError>),
    #[error("Formula '{formula}' failed: {source}")]
    Evaluation {
        formula: String,
        #[source]
        source: EvalError,
    },
    #[error("Output '{parameter}' was not produced")]
    MissingOutput { parameter: String },
    #[error("Output '{parameter}' expected {expected}, found {found}")]
    OutputTypeMismatch { parameter: String, expected: DataType, found: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl EngineError {
    pub fn evaluation(formula: impl Into<String>, source: EvalError) -> Self {
        Self::Evaluation { formula: formula.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::DuplicateParameterName { .. }
            | EngineError::InputWithFormula { .. }
            | EngineError::InvalidConstraint { .. }
            | EngineError::DependencyCycle { .. }
            | EngineError::UnresolvedDependency { .. } => ErrorKind::Definition,
            EngineError::InvalidInputs(_) => ErrorKind::Input,
            EngineError::Evaluation { .. }
            | EngineError::MissingOutput { .. }
            | EngineError::OutputTypeMismatch { .. } => ErrorKind::Evaluation,
        }
    }

    /// The underlying formula error, if this is an evaluation failure.
    pub fn eval_error(&self) -> Option<&EvalError> {
        match self {
            EngineError::Evaluation { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
