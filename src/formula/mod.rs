//! The formula language: tokenizer, parser, syntax tree, and the compile step
//! that extracts each formula's free identifiers for dependency analysis.
pub mod ast;
pub mod cache;
pub mod compile;
pub mod lexer;
pub mod parser;
pub mod template;

pub use cache::{FormulaCache, FormulaKey, FormulaSlot};
pub use compile::{compile, CompiledFormula};
pub use parser::parse_program;
pub use template::TemplateFormulas;
