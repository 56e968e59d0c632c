//! The Parameter Model: an immutable, name-indexed view over a template.
use super::types::{Parameter, ParameterScope, Template};
use crate::error::EngineError;
use regex::Regex;
use std::collections::HashMap;

/// A parameter whose textual constraints have been parsed once.
#[derive(Debug, Clone)]
pub struct ParameterSpec<'a> {
    pub param: &'a Parameter,
    /// Anchored form of `regexPattern`.
    pub pattern: Option<Regex>,
    pub allowed_values: Option<Vec<String>>,
}

impl<'a> ParameterSpec<'a> {
    pub fn name(&self) -> &'a str {
        &self.param.name
    }
}

#[derive(Debug, Clone)]
pub struct ParameterModel<'a> {
    pub template: &'a Template,
    specs: Vec<ParameterSpec<'a>>,
    by_name: HashMap<&'a str, usize>,
}

impl<'a> ParameterModel<'a> {
    /// Indexes the template's parameters, rejecting authoring defects.
    pub fn load(template: &'a Template) -> Result<Self, EngineError> {
        let mut specs = Vec::with_capacity(template.parameters.len());
        let mut by_name = HashMap::with_capacity(template.parameters.len());

        for param in &template.parameters {
            if by_name.insert(param.name.as_str(), specs.len()).is_some() {
                return Err(EngineError::DuplicateParameterName { name: param.name.clone() });
            }
            if param.scope == ParameterScope::Input && param.formula.is_some() {
                return Err(EngineError::InputWithFormula { name: param.name.clone() });
            }
            if let (Some(min), Some(max)) = (param.min_value, param.max_value) {
                if min > max {
                    return Err(EngineError::InvalidConstraint {
                        parameter: param.name.clone(),
                        reason: format!("minValue {} exceeds maxValue {}", min, max),
                    });
                }
            }

            let pattern = match &param.regex_pattern {
                Some(p) => Some(Regex::new(&format!("^(?:{})$", p)).map_err(|e| {
                    EngineError::InvalidConstraint {
                        parameter: param.name.clone(),
                        reason: format!("invalid regexPattern: {}", e),
                    }
                })?),
                None => None,
            };
            let allowed_values = match &param.allowed_values {
                Some(raw) => Some(parse_allowed_values(raw).map_err(|reason| {
                    EngineError::InvalidConstraint { parameter: param.name.clone(), reason }
                })?),
                None => None,
            };

            specs.push(ParameterSpec { param, pattern, allowed_values });
        }

        Ok(Self { template, specs, by_name })
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec<'a>> {
        self.by_name.get(name).map(|&i| &self.specs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn spec(&self, index: usize) -> &ParameterSpec<'a> {
        &self.specs[index]
    }

    /// Parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec<'a>> {
        self.specs.iter()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &ParameterSpec<'a>> {
        self.specs.iter().filter(|s| s.param.scope == ParameterScope::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &ParameterSpec<'a>> {
        self.specs.iter().filter(|s| s.param.scope == ParameterScope::Output)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Accepts a JSON array of scalars, falling back to a comma-separated list.
fn parse_allowed_values(raw: &str) -> Result<Vec<String>, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        let items: Vec<serde_json::Value> = serde_json::from_str(trimmed)
            .map_err(|e| format!("invalid allowedValues list: {}", e))?;
        return items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s),
                serde_json::Value::Number(n) => Ok(n.to_string()),
                serde_json::Value::Bool(b) => Ok(b.to_string()),
                other => Err(format!("unsupported allowedValues entry {}", other)),
            })
            .collect();
    }
    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
