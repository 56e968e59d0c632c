//! The payload returned by a successful execution.
use crate::store::TypedValue;
use crate::validation::{ConstraintViolation, ParameterStatus};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub template_id: String,
    pub template_version: u32,
    /// OUTPUT parameters by name.
    pub outputs: BTreeMap<String, TypedValue>,
    /// Values that computed successfully but break their declared limits.
    pub compliance_findings: Vec<ConstraintViolation>,
    /// Status of every INPUT and OUTPUT parameter.
    pub validation: BTreeMap<String, ParameterStatus>,
    /// Non-INPUT parameters in the order they were resolved.
    pub evaluation_order: Vec<String>,
}

impl CalculationResult {
    pub fn output(&self, name: &str) -> Option<&TypedValue> {
        self.outputs.get(name)
    }

    pub fn is_compliant(&self) -> bool {
        self.compliance_findings.is_empty()
    }

    /// Findings raised against one parameter.
    pub fn findings_for<'a>(&'a self, parameter: &'a str) -> impl Iterator<Item = &'a ConstraintViolation> + 'a {
        self.compliance_findings.iter().filter(move |f| f.parameter == parameter)
    }
}
