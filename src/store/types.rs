//! Template and parameter records as supplied by the storage layer.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Number,
    Boolean,
    Date,
    Enum,
    Object,
    Array,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Enum => "enum",
            DataType::Object => "object",
            DataType::Array => "array",
        };
        f.write_str(name)
    }
}

/// Where a parameter's value comes from and whether it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterScope {
    /// Supplied by the caller (or by `defaultValue`).
    Input,
    /// Computed helper, never reported.
    Internal,
    /// Computed and reported in the result.
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub id: String,
    /// The binding visible inside formulas.
    pub name: String,
    pub data_type: DataType,
    pub scope: ParameterScope,
    #[serde(default)]
    pub is_required: bool,
    /// Stored as text; coerced to `data_type` on use.
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub regex_pattern: Option<String>,
    /// Serialized list, e.g. `["A","B"]` or `A,B`.
    #[serde(default)]
    pub allowed_values: Option<String>,
    #[serde(default)]
    pub unit_of_measure: Option<String>,
    #[serde(default)]
    pub depends_on_parameters: Vec<String>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub display_order: i32,
    /// Input limits are reported as compliance findings instead of rejecting the value.
    #[serde(default)]
    pub is_advisory: bool,
}

impl Parameter {
    /// A bare parameter with no constraints, mostly useful for building templates in code.
    pub fn new(name: impl Into<String>, data_type: DataType, scope: ParameterScope) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            data_type,
            scope,
            is_required: false,
            default_value: None,
            min_value: None,
            max_value: None,
            regex_pattern: None,
            allowed_values: None,
            unit_of_measure: None,
            depends_on_parameters: Vec::new(),
            formula: None,
            display_order: 0,
            is_advisory: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.regex_pattern = Some(pattern.into());
        self
    }

    pub fn with_allowed_values(mut self, list: impl Into<String>) -> Self {
        self.allowed_values = Some(list.into());
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit_of_measure = Some(unit.into());
        self
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on_parameters = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn ordered(mut self, display_order: i32) -> Self {
        self.display_order = display_order;
        self
    }

    pub fn advisory(mut self) -> Self {
        self.is_advisory = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.scope == ParameterScope::Input
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// The main formula; its returned object populates the OUTPUT parameters.
    pub formula: String,
    /// Domain/profession tags. Routing only.
    #[serde(default)]
    pub classification: Vec<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

fn default_version() -> u32 {
    1
}

impl Template {
    pub fn new(id: impl Into<String>, name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            formula: formula.into(),
            classification: Vec::new(),
            version: default_version(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_deserializes_from_storage_record() {
        let json = r#"{
            "id": "p-17",
            "name": "anchoRampa",
            "dataType": "number",
            "scope": "INPUT",
            "isRequired": true,
            "minValue": 1200,
            "unitOfMeasure": "mm",
            "displayOrder": 4
        }"#;
        let p: Parameter = serde_json::from_str(json).unwrap();
        assert_eq!(p.name, "anchoRampa");
        assert_eq!(p.data_type, DataType::Number);
        assert_eq!(p.scope, ParameterScope::Input);
        assert_eq!(p.min_value, Some(1200.0));
        assert!(p.depends_on_parameters.is_empty());
        assert!(!p.is_advisory);
    }

    #[test]
    fn test_template_defaults_version() {
        let json = r#"{"id": "t1", "name": "Area", "formula": "return { area: a * b }"}"#;
        let t: Template = serde_json::from_str(json).unwrap();
        assert_eq!(t.version, 1);
        assert!(t.parameters.is_empty());
    }
}
