//! A synchronous, single-threaded calculation engine.
use super::result::CalculationResult;
use crate::analysis::{check_bindings, topology};
use crate::compute::{evaluate, EvalError, Scope, Value};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::formula::{FormulaCache, TemplateFormulas};
use crate::graph::{DependencyGraph, Node, MAIN_FORMULA};
use crate::store::{DataType, ParameterModel, Template};
use crate::validation::{validate_input, validate_output, ConstraintViolation, ParameterStatus};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, debug_span, warn};

/// Raw caller values by parameter name.
pub type InputValues = HashMap<String, serde_json::Value>;

/// Stages of a single execution. Any stage may end in `Failed`.
///
/// Definition checks need no input values, so `Resolving` runs first and a
/// broken template is reported as such whatever the caller sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    Validating,
    Evaluating,
    ValidatingOutputs,
    Done,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct CalculationEngine {
    config: EngineConfig,
    cache: Arc<FormulaCache>,
}

impl CalculationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config, cache: Arc::default() }
    }

    /// Shares a compiled-formula cache with other engines.
    pub fn with_cache(mut self, cache: Arc<FormulaCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<FormulaCache> {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs one calculation. Hard failures return no partial outputs.
    pub fn execute(&self, template: &Template, inputs: &InputValues) -> Result<CalculationResult, EngineError> {
        let span = debug_span!("execute", template = %template.id, version = template.version);
        let _enter = span.enter();

        let result = self.run(template, inputs);
        match &result {
            Ok(r) => debug!(
                phase = ?Phase::Done,
                outputs = r.outputs.len(),
                findings = r.compliance_findings.len(),
                "calculation finished"
            ),
            Err(e) => debug!(phase = ?Phase::Failed, kind = ?e.kind(), error = %e, "calculation failed"),
        }
        result
    }

    /// Runs independent scenarios of the same template in parallel.
    /// Results keep the order of `scenarios`.
    pub fn execute_batch(
        &self,
        template: &Template,
        scenarios: &[InputValues],
    ) -> Vec<Result<CalculationResult, EngineError>> {
        scenarios.par_iter().map(|inputs| self.execute(template, inputs)).collect()
    }

    fn run(&self, template: &Template, inputs: &InputValues) -> Result<CalculationResult, EngineError> {
        debug!(phase = ?Phase::Resolving, "resolving dependencies");
        let model = ParameterModel::load(template)?;
        let cache = self.config.cache_formulas.then(|| self.cache.as_ref());
        let formulas = TemplateFormulas::compile(template, cache)?;
        let graph = DependencyGraph::build(&model, &formulas)?;
        let order = topology::sort(&graph)?;
        check_bindings(&model, &formulas)?;

        debug!(phase = ?Phase::Validating, "validating inputs");
        let mut validation = BTreeMap::new();
        let mut findings = Vec::new();
        let mut scope = self.bind_inputs(&model, inputs, &mut validation, &mut findings)?;

        debug!(phase = ?Phase::Evaluating, nodes = order.len(), "evaluating formulas");
        let limits = self.config.limits();
        let mut evaluation_order = Vec::new();
        let mut returned = Value::Null;
        for id in order {
            match graph.node(id) {
                Node::Parameter { name, has_formula, .. } => {
                    evaluation_order.push(name.clone());
                    if !*has_formula {
                        continue;
                    }
                    if let Some(compiled) = formulas.parameter(name) {
                        let value = evaluate(&compiled.program, &scope, limits)
                            .map_err(|e| EngineError::evaluation(name.as_str(), e))?;
                        scope.insert(name.clone(), value);
                    }
                }
                Node::Main => {
                    returned = evaluate(&formulas.main.program, &scope, limits)
                        .map_err(|e| EngineError::evaluation(MAIN_FORMULA, e))?;
                }
            }
        }
        let returned = returned_outputs(&model, returned)?;

        debug!(phase = ?Phase::ValidatingOutputs, "validating outputs");
        let mut outputs = BTreeMap::new();
        for spec in model.outputs() {
            let name = spec.name();
            let value = returned.get(name).or_else(|| scope.get(name));
            let checked = validate_output(spec, value)?;
            validation.insert(name.to_string(), checked.status);
            findings.extend(checked.findings);
            if checked.status != ParameterStatus::Omitted {
                outputs.insert(name.to_string(), checked.value);
            }
        }

        for finding in &findings {
            warn!(parameter = %finding.parameter, constraint = %finding.constraint, observed = %finding.observed, "compliance finding");
        }

        Ok(CalculationResult {
            template_id: template.id.clone(),
            template_version: template.version,
            outputs,
            compliance_findings: findings,
            validation,
            evaluation_order,
        })
    }

    /// Validates every INPUT parameter, reporting all failures together.
    fn bind_inputs(
        &self,
        model: &ParameterModel<'_>,
        inputs: &InputValues,
        validation: &mut BTreeMap<String, ParameterStatus>,
        findings: &mut Vec<ConstraintViolation>,
    ) -> Result<Scope, EngineError> {
        for key in inputs.keys().filter(|k| model.get(k).map_or(true, |s| !s.param.is_input())) {
            debug!(key = %key, "ignoring value for unknown input");
        }

        let mut scope = Scope::new();
        let mut errors = Vec::new();
        for spec in model.inputs() {
            match validate_input(spec, inputs.get(spec.name())) {
                Ok(checked) => {
                    scope.insert(spec.name().to_string(), Value::from_typed(&checked.value));
                    validation.insert(spec.name().to_string(), checked.status);
                    findings.extend(checked.findings);
                }
                Err(mut e) => errors.append(&mut e),
            }
        }
        if !errors.is_empty() {
            return Err(EngineError::InvalidInputs(errors));
        }
        Ok(scope)
    }
}

/// Reads the main formula's completion value as named outputs.
///
/// An object supplies outputs by key and `null` supplies none. Any other
/// value is accepted only when exactly one OUTPUT is declared, as that
/// output's value; so is an object lacking the key of a lone object-typed
/// OUTPUT.
fn returned_outputs(model: &ParameterModel<'_>, returned: Value) -> Result<BTreeMap<String, Value>, EngineError> {
    let mut outputs = model.outputs();
    let lone = match (outputs.next(), outputs.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    };

    match returned {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => match lone {
            Some(only) if only.param.data_type == DataType::Object && !map.contains_key(only.name()) => {
                Ok(BTreeMap::from([(only.name().to_string(), Value::Object(map))]))
            }
            _ => {
                for key in map.keys().filter(|k| model.get(k).is_none()) {
                    debug!(key = %key, "main formula returned an undeclared key");
                }
                Ok(map.as_ref().clone())
            }
        },
        other => match lone {
            Some(only) => Ok(BTreeMap::from([(only.name().to_string(), other)])),
            None => Err(EngineError::evaluation(
                MAIN_FORMULA,
                EvalError::runtime(format!("expected an object of outputs, got {}", other.type_name())),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computation::fixtures;
    use crate::store::{Parameter, ParameterScope, TypedValue};
    use crate::validation::{Constraint, ValidationError};
    use rstest::rstest;
    use serde_json::json;
    use tracing_test::traced_test;

    fn inputs(pairs: &[(&str, serde_json::Value)]) -> InputValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn ramp_inputs(ancho: f64) -> InputValues {
        inputs(&[
            ("alturaRampa", json!(300)),
            ("longitudHorizontal", json!(3600)),
            ("pendienteTransversal", json!(1)),
            ("anchoRampa", json!(ancho)),
        ])
    }

    fn number(result: &CalculationResult, name: &str) -> f64 {
        result.output(name).and_then(TypedValue::as_number).unwrap()
    }

    fn boolean(result: &CalculationResult, name: &str) -> bool {
        result.output(name).and_then(TypedValue::as_bool).unwrap()
    }

    #[test]
    fn test_ramp_compliant() {
        let r = CalculationEngine::new().execute(&fixtures::ramp(), &ramp_inputs(1200.0)).unwrap();
        assert!((number(&r, "pendientePorcentaje") - 8.333_333_333).abs() < 1e-6);
        assert_eq!(number(&r, "pendienteMaxima"), 12.0);
        assert!(boolean(&r, "cumplePendiente"));
        assert!(boolean(&r, "cumpleAnchoMinimo"));
        assert!(boolean(&r, "cumplimientoTotal"));
        assert!(r.is_compliant());
        assert_eq!(r.template_version, 3);
        assert_eq!(r.validation["anchoRampa"], ParameterStatus::Valid);
    }

    #[test]
    fn test_ramp_narrow_width_is_a_finding() {
        let r = CalculationEngine::new().execute(&fixtures::ramp(), &ramp_inputs(900.0)).unwrap();
        assert!(!boolean(&r, "cumpleAnchoMinimo"));
        assert!(!boolean(&r, "cumplimientoTotal"));
        let findings: Vec<_> = r.findings_for("anchoRampa").collect();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].constraint, Constraint::MinValue(1200.0));
        assert_eq!(findings[0].observed, TypedValue::Number(900.0));
        assert_eq!(r.validation["anchoRampa"], ParameterStatus::NonCompliant);
    }

    #[test]
    fn test_dead_loads() {
        let values = inputs(&[
            ("longitud", json!(10)),
            ("ancho", json!(10)),
            ("cargaElementosEstructurales", json!(3.0)),
            ("cargaAcabados", json!(1.5)),
            ("cargaParedes", json!(2.0)),
            ("cargaInstalaciones", json!(0.5)),
        ]);
        let r = CalculationEngine::new().execute(&fixtures::dead_loads(), &values).unwrap();
        assert_eq!(number(&r, "area"), 100.0);
        assert_eq!(number(&r, "cargaMuertaTotal"), 700.0);
        assert_eq!(number(&r, "cargaMuertaUnitaria"), 7.0);
        assert_eq!(r.evaluation_order, ["area", "cargaMuertaTotal", "cargaMuertaUnitaria"]);
    }

    #[test]
    fn test_helper_reads_template_inputs() {
        let values = inputs(&[
            ("Z", json!(0.4)),
            ("S", json!(1)),
            ("R", json!(1)),
            ("Tp", json!(0.6)),
            ("TL", json!(2.0)),
            ("periodos", json!([0.2, 1.0, 3.0])),
        ]);
        let r = CalculationEngine::new().execute(&fixtures::spectral(), &values).unwrap();
        let TypedValue::Sequence(items) = r.output("aceleraciones").unwrap() else {
            panic!("expected a sequence");
        };
        let got: Vec<f64> = items.iter().filter_map(TypedValue::as_number).collect();
        for (g, want) in got.iter().zip([1.0, 0.6, 0.4 / 3.0]) {
            assert!((g - want).abs() < 1e-9, "{} != {}", g, want);
        }
        assert!((number(&r, "maxima") - 1.0).abs() < 1e-9);
        assert_eq!(r.validation["U"], ParameterStatus::Valid);
    }

    #[test]
    fn test_deterministic() {
        let engine = CalculationEngine::new();
        let t = fixtures::ramp();
        let a = engine.execute(&t, &ramp_inputs(900.0)).unwrap();
        let b = engine.execute(&t, &ramp_inputs(900.0)).unwrap();
        assert_eq!(serde_json::to_string(&a.outputs).unwrap(), serde_json::to_string(&b.outputs).unwrap());
    }

    #[test]
    fn test_declaration_order_does_not_change_result() {
        let mut reversed = fixtures::dead_loads();
        reversed.parameters.reverse();
        let values = inputs(&[
            ("longitud", json!(4)),
            ("ancho", json!(2.5)),
            ("cargaElementosEstructurales", json!(2)),
            ("cargaAcabados", json!(1)),
            ("cargaParedes", json!(1)),
            ("cargaInstalaciones", json!(0)),
        ]);
        let engine = CalculationEngine::new();
        let a = engine.execute(&fixtures::dead_loads(), &values).unwrap();
        let b = engine.execute(&reversed, &values).unwrap();
        assert_eq!(a.outputs, b.outputs);
        assert_eq!(a.evaluation_order, b.evaluation_order);
    }

    #[test]
    fn test_helper_chain_sees_earlier_values() {
        let t = Template::new("t", "chain", "return { total: c }")
            .with_parameter(Parameter::new("x", DataType::Number, ParameterScope::Input).required())
            .with_parameter(Parameter::new("c", DataType::Number, ParameterScope::Internal).with_formula("b * 10"))
            .with_parameter(Parameter::new("b", DataType::Number, ParameterScope::Internal).with_formula("a + 1"))
            .with_parameter(Parameter::new("a", DataType::Number, ParameterScope::Internal).with_formula("x * 2"))
            .with_parameter(Parameter::new("total", DataType::Number, ParameterScope::Output));
        let r = CalculationEngine::new().execute(&t, &inputs(&[("x", json!(3))])).unwrap();
        assert_eq!(r.output("total"), Some(&TypedValue::Number(70.0)));
        assert_eq!(r.evaluation_order, ["a", "b", "c", "total"]);
    }

    #[test]
    fn test_cycle_is_rejected_before_evaluation() {
        // `a` would divide by zero if it were ever evaluated.
        let t = Template::new("t", "cycle", "return {}")
            .with_parameter(Parameter::new("a", DataType::Number, ParameterScope::Internal).with_formula("b / 0"))
            .with_parameter(Parameter::new("b", DataType::Number, ParameterScope::Internal).with_formula("a + 1"));
        let err = CalculationEngine::new().execute(&t, &InputValues::new()).unwrap_err();
        assert_eq!(err, EngineError::DependencyCycle { members: vec!["a".into(), "b".into()] });
    }

    #[test]
    fn test_definition_errors_win_over_bad_inputs() {
        let required = || Parameter::new("x", DataType::Number, ParameterScope::Input).required();
        let cyclic = Template::new("t", "cycle", "return {}")
            .with_parameter(required())
            .with_parameter(Parameter::new("a", DataType::Number, ParameterScope::Internal).with_formula("b + x"))
            .with_parameter(Parameter::new("b", DataType::Number, ParameterScope::Internal).with_formula("a + 1"));
        let err = CalculationEngine::new().execute(&cyclic, &InputValues::new()).unwrap_err();
        assert_eq!(err, EngineError::DependencyCycle { members: vec!["a".into(), "b".into()] });

        let unbound = Template::new("t", "unbound", "return { y: x + falta }")
            .with_parameter(required())
            .with_parameter(Parameter::new("y", DataType::Number, ParameterScope::Output));
        let err = CalculationEngine::new().execute(&unbound, &InputValues::new()).unwrap_err();
        assert_eq!(err, EngineError::evaluation(MAIN_FORMULA, EvalError::unbound("falta")));
    }

    #[test]
    fn test_helper_exports_function_using_local_helper() {
        let t = Template::new("t", "local", "return { r: h(x) }")
            .with_parameter(Parameter::new("x", DataType::Number, ParameterScope::Input).required())
            .with_parameter(
                Parameter::new("h", DataType::Number, ParameterScope::Internal)
                    .with_formula("const doble = v => v * 2; function h(y) { return doble(y) + 1 }"),
            )
            .with_parameter(Parameter::new("r", DataType::Number, ParameterScope::Output));
        let r = CalculationEngine::new().execute(&t, &inputs(&[("x", json!(3))])).unwrap();
        assert_eq!(r.output("r"), Some(&TypedValue::Number(7.0)));
    }

    #[test]
    fn test_input_arrays_can_be_sorted_and_iterated() {
        let t = Template::new(
            "t",
            "derivas",
            r#"
            const orden = desplazamientos.sort((a, b) => a - b);
            let volumen = 0;
            for (const { longitud, espesor } of muros) {
                volumen += longitud * espesor;
            }
            return { minimo: orden[0], volumen };
            "#,
        )
        .with_parameter(Parameter::new("desplazamientos", DataType::Array, ParameterScope::Input).required())
        .with_parameter(Parameter::new("muros", DataType::Array, ParameterScope::Input).required())
        .with_parameter(Parameter::new("minimo", DataType::Number, ParameterScope::Output))
        .with_parameter(Parameter::new("volumen", DataType::Number, ParameterScope::Output));
        let values = inputs(&[
            ("desplazamientos", json!([3, 1, 2])),
            ("muros", json!([{ "longitud": 4, "espesor": 0.25 }, { "longitud": 2, "espesor": 0.5 }])),
        ]);
        let r = CalculationEngine::new().execute(&t, &values).unwrap();
        assert_eq!(r.output("minimo"), Some(&TypedValue::Number(1.0)));
        assert_eq!(r.output("volumen"), Some(&TypedValue::Number(2.0)));
    }

    #[test]
    fn test_invalid_inputs_are_aggregated() {
        let mut values = ramp_inputs(1200.0);
        values.remove("alturaRampa");
        values.insert("pendienteTransversal".into(), json!(5));
        let err = CalculationEngine::new().execute(&fixtures::ramp(), &values).unwrap_err();
        let EngineError::InvalidInputs(errors) = err else {
            panic!("expected invalid inputs, got {:?}", err);
        };
        assert_eq!(errors.len(), 2);
        assert!(errors.contains(&ValidationError::MissingRequiredInput { parameter: "alturaRampa".into() }));
        assert!(errors.iter().any(|e| e.parameter() == "pendienteTransversal"));
    }

    #[rstest]
    #[case(-1.0, false)]
    #[case(0.0, true)]
    #[case(100.0, true)]
    #[case(101.0, false)]
    fn test_input_bounds_inclusive(#[case] value: f64, #[case] accepted: bool) {
        let t = Template::new("t", "bounds", "return { y: pct }")
            .with_parameter(Parameter::new("pct", DataType::Number, ParameterScope::Input).with_range(Some(0.0), Some(100.0)))
            .with_parameter(Parameter::new("y", DataType::Number, ParameterScope::Output));
        let result = CalculationEngine::new().execute(&t, &inputs(&[("pct", json!(value))]));
        assert_eq!(result.is_ok(), accepted);
        if let Err(EngineError::InvalidInputs(errors)) = result {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].parameter(), "pct");
        }
    }

    #[test]
    fn test_unbounded_loop_hits_iteration_limit() {
        let config = EngineConfig { max_iterations: 1_000, ..EngineConfig::default() };
        let t = Template::new("t", "loop", "let i = 0; while (true) { i++ } return {}");
        let err = CalculationEngine::with_config(config).execute(&t, &InputValues::new()).unwrap_err();
        assert_eq!(
            err,
            EngineError::evaluation(MAIN_FORMULA, EvalError::IterationLimitExceeded { limit: 1_000 })
        );
    }

    #[test]
    fn test_output_failures() {
        let single = |formula: &str, data_type: DataType| {
            Template::new("t", "out", formula)
                .with_parameter(Parameter::new("r", data_type, ParameterScope::Output).required())
        };
        let engine = CalculationEngine::new();
        let none = InputValues::new();

        let r = engine.execute(&single("return 4 * 2", DataType::Number), &none).unwrap();
        assert_eq!(r.output("r"), Some(&TypedValue::Number(8.0)));

        let err = engine.execute(&single("return {}", DataType::Number), &none).unwrap_err();
        assert_eq!(err, EngineError::MissingOutput { parameter: "r".into() });

        let err = engine.execute(&single("return { r: 'ocho' }", DataType::Number), &none).unwrap_err();
        assert!(matches!(err, EngineError::OutputTypeMismatch { .. }));

        let err = engine.execute(&single("return { r: 1 / 0 }", DataType::Number), &none).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Evaluation);
    }

    #[test]
    fn test_scalar_return_needs_single_output() {
        let t = Template::new("t", "two", "42")
            .with_parameter(Parameter::new("a", DataType::Number, ParameterScope::Output))
            .with_parameter(Parameter::new("b", DataType::Number, ParameterScope::Output));
        let err = CalculationEngine::new().execute(&t, &InputValues::new()).unwrap_err();
        assert!(matches!(err, EngineError::Evaluation { ref formula, .. } if formula == MAIN_FORMULA));
    }

    #[test]
    fn test_unbound_identifier_fails_before_helpers_run() {
        let t = Template::new("t", "unbound", "return { y: falta }")
            .with_parameter(Parameter::new("h", DataType::Number, ParameterScope::Internal).with_formula("1 / 0"))
            .with_parameter(Parameter::new("y", DataType::Number, ParameterScope::Output));
        let err = CalculationEngine::new().execute(&t, &InputValues::new()).unwrap_err();
        assert_eq!(err, EngineError::evaluation(MAIN_FORMULA, EvalError::unbound("falta")));
    }

    #[test]
    fn test_cache_is_reused_across_executions() {
        let engine = CalculationEngine::new();
        let t = fixtures::ramp();
        engine.execute(&t, &ramp_inputs(1200.0)).unwrap();
        // Main formula plus one helper.
        assert_eq!(engine.cache().len(), 2);
        engine.execute(&t, &ramp_inputs(1000.0)).unwrap();
        assert_eq!(engine.cache().len(), 2);

        let uncached = CalculationEngine::with_config(EngineConfig { cache_formulas: false, ..EngineConfig::default() });
        uncached.execute(&t, &ramp_inputs(1200.0)).unwrap();
        assert!(uncached.cache().is_empty());
    }

    #[test]
    fn test_shared_cache() {
        let cache = Arc::new(FormulaCache::new());
        let a = CalculationEngine::new().with_cache(Arc::clone(&cache));
        let b = CalculationEngine::new().with_cache(Arc::clone(&cache));
        a.execute(&fixtures::ramp(), &ramp_inputs(1200.0)).unwrap();
        b.execute(&fixtures::ramp(), &ramp_inputs(1200.0)).unwrap();
        assert_eq!(cache.len(), 2);
        cache.invalidate_template("tpl-rampas");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_batch_matches_sequential() {
        let engine = CalculationEngine::new();
        let t = fixtures::ramp();
        let scenarios: Vec<_> = [800.0, 1000.0, 1200.0, 1500.0].into_iter().map(ramp_inputs).collect();
        let batch = engine.execute_batch(&t, &scenarios);
        let sequential: Vec<_> = scenarios.iter().map(|s| engine.execute(&t, s)).collect();
        assert_eq!(batch, sequential);
    }

    #[test]
    fn test_unknown_inputs_are_ignored() {
        let mut values = ramp_inputs(1200.0);
        values.insert("colorFavorito".into(), json!("azul"));
        values.insert("pendientePorcentaje".into(), json!(1));
        let r = CalculationEngine::new().execute(&fixtures::ramp(), &values).unwrap();
        assert!((number(&r, "pendientePorcentaje") - 8.333_333_333).abs() < 1e-6);
    }

    #[test]
    #[traced_test]
    fn test_findings_are_logged() {
        CalculationEngine::new().execute(&fixtures::ramp(), &ramp_inputs(900.0)).unwrap();
        assert!(logs_contain("compliance finding"));
        assert!(logs_contain("anchoRampa"));
    }
}
