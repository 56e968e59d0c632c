//! Link step: every free identifier of every formula must resolve before
//! anything is evaluated.
use crate::compute::{builtins, EvalError};
use crate::error::EngineError;
use crate::formula::TemplateFormulas;
use crate::store::{ParameterModel, ParameterScope};

/// Checks that each identifier a formula reads is an INPUT parameter, a
/// parameter with its own formula, or a library name.
///
/// OUTPUT and INTERNAL parameters without a formula only exist once the main
/// formula has returned, so no formula can read them.
pub fn check_bindings(model: &ParameterModel<'_>, formulas: &TemplateFormulas) -> Result<(), EngineError> {
    for (label, compiled) in formulas.iter() {
        for ident in &compiled.free_identifiers {
            let bound = match model.get(ident) {
                Some(spec) => spec.param.scope == ParameterScope::Input || spec.param.formula.is_some(),
                None => builtins::is_global(ident),
            };
            if !bound {
                return Err(EngineError::evaluation(label, EvalError::unbound(ident.as_str())));
            }
        }
    }
    Ok(())
}
