//! Binary Rewriter
//!
//! Turns a compiled module into its shadow module: every function carrying
//! the marker attribute is cloned into a hidden implementation and its
//! original body is replaced with a dispatch stub. The dataflow pass then
//! patches callers that consume the now-deferred results.
//!
//! # Pipeline
//!
//! ```text
//! scan      every TypeDef/FunctionDef, collect marked functions
//! clone     f -> f__impl, body copied before anything is mutated
//! stub      f's body packs its args and Submit/Defer's f__impl
//! patch     Unwrap inserted before consumers of deferred results
//! ```
//!
//! The rewrite works on a copy of the module and only replaces the caller's
//! module once every step has succeeded.

mod clone;
mod dataflow;
mod error;
mod insert;
mod stub;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::{debug, info, trace};

use crate::backend::bytecode::{FunctionDef, Module, SymbolRef};

pub use dataflow::{DataflowPass, PatchOutcome, PatchStats, PatchStrategy};
pub use error::{RewriteError, RewriteResult};

/// Rewriter configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewriteConfig {
    /// Attribute name marking a function for deferred dispatch
    pub marker: String,
    /// Appended to a function's name to name its hidden implementation
    pub clone_suffix: String,
    /// Fail instead of warn when a deferred value is live at a branch
    pub strict_branches: bool,
    pub patch_strategy: PatchStrategy,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            marker: "Pure".to_string(),
            clone_suffix: "__impl".to_string(),
            strict_branches: false,
            patch_strategy: PatchStrategy::default(),
        }
    }
}

/// Summary of a successful rewrite
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Functions whose bodies were replaced with stubs
    pub rewritten: Vec<SymbolRef>,
    /// Hidden implementations, in the same order as `rewritten`
    pub clones: Vec<SymbolRef>,
    pub patches: PatchStats,
}

/// A marked function and where it lives
struct Watched {
    type_index: usize,
    function_index: usize,
    symbol: SymbolRef,
    clone: SymbolRef,
}

#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    config: RewriteConfig,
}

impl Rewriter {
    pub fn new(config: RewriteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrite `module` into a shadow module
    ///
    /// On error `module` is left untouched.
    pub fn rewrite(&self, module: &mut Module) -> RewriteResult<RewriteReport> {
        if module.shadow {
            return Err(RewriteError::AlreadyRewritten);
        }

        let mut work = module.clone();
        let watched = self.scan(&work)?;

        // Clone every marked function before any body is replaced
        let mut clones_by_type: HashMap<usize, Vec<FunctionDef>> = HashMap::new();
        for w in &watched {
            let original = &work.types[w.type_index].functions[w.function_index];
            let hidden = clone::clone_function(original, w.clone.function.to_string());
            clones_by_type.entry(w.type_index).or_default().push(hidden);
        }

        let mut report = RewriteReport::default();
        for w in &watched {
            let clone_symbol = work
                .intern_symbol(w.clone.clone())
                .ok_or_else(|| RewriteError::SymbolTableFull(w.clone.clone()))?;

            let function = &mut work.types[w.type_index].functions[w.function_index];
            function.body = stub::build_stub(&function.params, &function.return_type, clone_symbol)
                .map_err(|source| RewriteError::MalformedBody {
                    function: w.symbol.clone(),
                    source,
                })?;
            if !function.return_type.is_void() {
                function.return_type = function.return_type.clone().deferred();
            }

            debug!(
                target: "shadowcall::rewrite",
                function = %w.symbol,
                hidden = %w.clone,
                returns = %function.return_type,
                "replaced body with dispatch stub"
            );
            report.rewritten.push(w.symbol.clone());
            report.clones.push(w.clone.clone());
        }

        for (type_index, clones) in clones_by_type {
            work.types[type_index].functions.extend(clones);
        }

        report.patches = self.patch(&mut work, &watched)?;
        work.shadow = true;
        *module = work;

        info!(
            target: "shadowcall::rewrite",
            rewritten = report.rewritten.len(),
            unwraps = report.patches.unwraps_inserted,
            locals_retyped = report.patches.locals_retyped,
            branch_warnings = report.patches.branch_warnings,
            "rewrite complete"
        );
        Ok(report)
    }

    /// Collect marked functions and reject the ones that cannot be rewritten
    fn scan(&self, module: &Module) -> RewriteResult<Vec<Watched>> {
        let mut watched = Vec::new();
        for (type_index, ty) in module.types.iter().enumerate() {
            let mut clone_names: HashSet<String> = HashSet::new();
            for (function_index, function) in ty.functions.iter().enumerate() {
                if !function.has_attribute(&self.config.marker) {
                    continue;
                }

                let symbol = SymbolRef::new(ty.name.as_str(), function.name.as_str());
                let clone_name = format!("{}{}", function.name, self.config.clone_suffix);
                let clone = SymbolRef::new(ty.name.as_str(), clone_name.as_str());

                if ty.function(&clone_name).is_some() || !clone_names.insert(clone_name) {
                    return Err(RewriteError::CloneNameCollision { original: symbol, clone });
                }
                if function.params.len() > u8::MAX as usize {
                    return Err(RewriteError::TooManyParameters {
                        count: function.params.len(),
                        function: symbol,
                    });
                }
                if function.return_type.is_deferred() {
                    return Err(RewriteError::UnsupportedReturnType(symbol));
                }

                trace!(target: "shadowcall::rewrite", function = %symbol, "watching");
                watched.push(Watched {
                    type_index,
                    function_index,
                    symbol,
                    clone,
                });
            }
        }
        Ok(watched)
    }

    /// Run the dataflow pass over every function except the new stubs
    fn patch(&self, module: &mut Module, watched: &[Watched]) -> RewriteResult<PatchStats> {
        let watched_symbols: HashSet<u16> = watched
            .iter()
            .filter_map(|w| module.symbol_index(&w.symbol))
            .collect();
        let stubs: HashSet<(usize, usize)> = watched
            .iter()
            .map(|w| (w.type_index, w.function_index))
            .collect();

        let pass = DataflowPass::new(
            watched_symbols,
            self.config.patch_strategy,
            self.config.strict_branches,
        );

        let mut stats = PatchStats::default();
        for (type_index, ty) in module.types.iter_mut().enumerate() {
            let type_name = ty.name.clone();
            for (function_index, function) in ty.functions.iter_mut().enumerate() {
                if stubs.contains(&(type_index, function_index)) {
                    continue;
                }
                let symbol = SymbolRef::new(type_name.as_str(), function.name.as_str());
                let outcome = pass.run(&symbol, &mut function.body)?;
                stats.record(&outcome);
            }
        }
        Ok(stats)
    }
}
