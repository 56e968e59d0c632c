use crate::computation::CalculationResult;
use crate::error::EngineError;
use crate::formula::TemplateFormulas;
use crate::graph::{DependencyGraph, Edge, NodeId};
use crate::store::{ParameterModel, Template};
use std::collections::HashMap;
use std::fmt::Write;

/// Renders the dependency tree behind a result, rooted at the main formula,
/// followed by its compliance findings.
pub fn trace_execution(template: &Template, result: &CalculationResult) -> Result<String, EngineError> {
    let model = ParameterModel::load(template)?;
    let formulas = TemplateFormulas::compile(template, None)?;
    let graph = DependencyGraph::build(&model, &formulas)?;
    Ok(format_trace(&graph, &formulas, &model, result))
}

pub fn format_trace(
    graph: &DependencyGraph,
    formulas: &TemplateFormulas,
    model: &ParameterModel<'_>,
    result: &CalculationResult,
) -> String {
    let mut tracer = Tracer { graph, formulas, model, result, visited_at_level: HashMap::new(), output: String::new() };

    let _ = writeln!(
        tracer.output,
        "AUDIT TRACE for '{}' (v{}):",
        model.template.name, result.template_version
    );
    let _ = writeln!(tracer.output, "--------------------------------------------------");
    tracer.trace_node(graph.main(), 1, "", None);

    if !result.compliance_findings.is_empty() {
        let _ = writeln!(tracer.output, "Compliance findings:");
        for finding in &result.compliance_findings {
            let _ = writeln!(tracer.output, "  ! {}", finding);
        }
    }
    tracer.output
}

struct Tracer<'a> {
    graph: &'a DependencyGraph,
    formulas: &'a TemplateFormulas,
    model: &'a ParameterModel<'a>,
    result: &'a CalculationResult,
    visited_at_level: HashMap<NodeId, usize>,
    output: String,
}

impl<'a> Tracer<'a> {
    fn trace_node(&mut self, node_id: NodeId, level: usize, prefix: &str, edge: Option<Edge>) {
        let node = self.graph.node(node_id);
        let via = match edge {
            Some(Edge::Declared) => " (declared)",
            _ => "",
        };
        if let Some(&first_seen) = self.visited_at_level.get(&node_id) {
            let _ = writeln!(self.output, "{}{}{} -> (Ref to L{})", prefix, node.name(), via, first_seen);
            return;
        }
        self.visited_at_level.insert(node_id, level);

        let value = self.format_value(node.name());
        let kind = if node.has_formula() { "formula" } else { "returned" };
        let _ = writeln!(self.output, "{}[L{}] {}{} {}{}", prefix, level, node.name(), value, kind, via);

        let mut children: Vec<(NodeId, Edge)> = self.graph.dependencies(node_id).collect();
        children.sort_by(|a, b| self.graph.node(a.0).priority(self.graph.node(b.0)));
        let inputs = self.inputs_read(node_id);

        let stem = self.build_child_stem(prefix);
        let total = children.len() + inputs.len();
        for (i, (child, edge)) in children.into_iter().enumerate() {
            let connector = if i + 1 == total { "`--" } else { "|--" };
            self.trace_node(child, level + 1, &format!("{}{}", stem, connector), Some(edge));
        }
        for (i, name) in inputs.iter().enumerate() {
            let connector = if i + 1 == inputs.len() { "`--" } else { "|--" };
            let status = self.result.validation.get(*name).map(|s| format!(" {:?}", s)).unwrap_or_default();
            let _ = writeln!(self.output, "{}{} {} input{}", stem, connector, name, status);
        }
    }

    /// INPUT parameters named by the node's own formula.
    fn inputs_read(&self, node_id: NodeId) -> Vec<&'a str> {
        let node = self.graph.node(node_id);
        let compiled = if node_id == self.graph.main() {
            Some(&self.formulas.main)
        } else {
            self.formulas.parameter(node.name())
        };
        let Some(compiled) = compiled else {
            return Vec::new();
        };
        let model = self.model;
        compiled
            .free_identifiers
            .iter()
            .filter_map(|ident| model.get(ident))
            .filter(|spec| spec.param.is_input())
            .map(|spec| spec.name())
            .collect()
    }

    fn format_value(&self, name: &str) -> String {
        match self.result.output(name) {
            Some(v) => format!(" = {}", v),
            None => String::new(),
        }
    }

    fn build_child_stem(&self, current_prefix: &str) -> String {
        current_prefix.replace("`--", "   ").replace("|--", "|  ")
    }
}
