//! Compiles every formula a template carries, through the cache when one is given.
use super::cache::{FormulaCache, FormulaKey, FormulaSlot};
use super::compile::{compile, CompiledFormula};
use crate::error::EngineError;
use crate::graph::MAIN_FORMULA;
use crate::store::Template;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct TemplateFormulas {
    pub main: Arc<CompiledFormula>,
    /// Helper formulas of non-INPUT parameters, in declaration order.
    pub parameters: Vec<(String, Arc<CompiledFormula>)>,
}

impl TemplateFormulas {
    pub fn compile(template: &Template, cache: Option<&FormulaCache>) -> Result<Self, EngineError> {
        let build = |slot: FormulaSlot, source: &str, label: &str| {
            let compiled = match cache {
                Some(cache) => cache.get_or_compile(FormulaKey::new(&template.id, template.version, slot), source),
                None => compile(source).map(Arc::new),
            };
            compiled.map_err(|e| EngineError::evaluation(label, e))
        };

        let mut parameters = Vec::new();
        for param in &template.parameters {
            if let Some(source) = &param.formula {
                let compiled = build(FormulaSlot::Parameter(param.id.clone()), source, &param.name)?;
                parameters.push((param.name.clone(), compiled));
            }
        }
        let main = build(FormulaSlot::Main, &template.formula, MAIN_FORMULA)?;
        Ok(Self { main, parameters })
    }

    pub fn parameter(&self, name: &str) -> Option<&Arc<CompiledFormula>> {
        self.parameters.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Every formula with its label, helpers first and the main formula last.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CompiledFormula)> {
        self.parameters
            .iter()
            .map(|(n, f)| (n.as_str(), f.as_ref()))
            .chain(std::iter::once((MAIN_FORMULA, self.main.as_ref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::EvalError;
    use crate::store::{DataType, Parameter, ParameterScope};

    fn template() -> Template {
        Template::new("t", "helpers", "return { y: doble(x) }")
            .with_parameter(Parameter::new("x", DataType::Number, ParameterScope::Input))
            .with_parameter(
                Parameter::new("doble", DataType::Number, ParameterScope::Internal).with_formula("v => v * 2"),
            )
    }

    #[test]
    fn test_compiles_helpers_and_main() {
        let formulas = TemplateFormulas::compile(&template(), None).unwrap();
        assert_eq!(formulas.parameters.len(), 1);
        assert!(formulas.main.references("doble"));
        let labels: Vec<_> = formulas.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["doble", MAIN_FORMULA]);
    }

    #[test]
    fn test_syntax_error_names_the_formula() {
        let t = Template::new("t", "bad", "return { y: (x }")
            .with_parameter(Parameter::new("x", DataType::Number, ParameterScope::Input));
        let err = TemplateFormulas::compile(&t, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Evaluation { ref formula, source: EvalError::Syntax { .. } } if formula == MAIN_FORMULA
        ));
    }

    #[test]
    fn test_cache_is_keyed_by_parameter_id() {
        let cache = FormulaCache::new();
        TemplateFormulas::compile(&template(), Some(&cache)).unwrap();
        TemplateFormulas::compile(&template(), Some(&cache)).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
