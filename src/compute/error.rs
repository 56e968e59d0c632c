use thiserror::Error;

/// Failure while compiling or running a single formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Syntax error at {line}:{column}: {message}")]
    Syntax { message: String, line: usize, column: usize },
    #[error("Unbound identifier '{name}'")]
    UnboundIdentifier { name: String },
    #[error("Runtime error: {message}")]
    Runtime { message: String },
    #[error("Iteration limit of {limit} exceeded")]
    IterationLimitExceeded { limit: u64 },
}

impl EvalError {
    pub fn syntax(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Syntax { message: message.into(), line, column }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into() }
    }

    pub fn unbound(name: impl Into<String>) -> Self {
        Self::UnboundIdentifier { name: name.into() }
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;
