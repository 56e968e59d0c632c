//! Memoized compilation of formula text, shared across executions.
use super::compile::{compile, CompiledFormula};
use crate::compute::error::EvalResult;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Which formula of a template a cache entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormulaSlot {
    Main,
    Parameter(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormulaKey {
    pub template_id: String,
    pub version: u32,
    pub slot: FormulaSlot,
}

impl FormulaKey {
    pub fn new(template_id: &str, version: u32, slot: FormulaSlot) -> Self {
        Self { template_id: template_id.to_string(), version, slot }
    }
}

#[derive(Debug, Default)]
pub struct FormulaCache {
    entries: DashMap<FormulaKey, Arc<CompiledFormula>>,
}

impl FormulaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached compilation, compiling on a miss. Syntax errors are
    /// not cached. Compiling version N of a template drops its entries for
    /// older versions.
    pub fn get_or_compile(&self, key: FormulaKey, source: &str) -> EvalResult<Arc<CompiledFormula>> {
        if let Some(hit) = self.entries.get(&key) {
            // A template edited without a version bump must not run stale code.
            if hit.source == source {
                return Ok(Arc::clone(hit.value()));
            }
        }
        let compiled = Arc::new(compile(source)?);
        debug!(template = %key.template_id, version = key.version, slot = ?key.slot, "compiled formula");
        self.entries.retain(|k, _| k.template_id != key.template_id || k.version >= key.version);
        self.entries.insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Drops every entry of a template, all versions.
    pub fn invalidate_template(&self, template_id: &str) {
        self.entries.retain(|key, _| key.template_id != template_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
