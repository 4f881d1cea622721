//! Linked programs
//!
//! Linking resolves every symbol table entry to a concrete function once,
//! up front. The VM and the dispatch runtime only ever see `FunctionId`s.

use std::fmt;

use thiserror::Error;

use super::module::{FunctionDef, Module, SymbolRef};

/// Position of a function inside a linked module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId {
    pub type_index: u32,
    pub function_index: u32,
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}.{}", self.type_index, self.function_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("unresolved symbol #{index}: {symbol}")]
    UnresolvedSymbol { index: usize, symbol: SymbolRef },
    #[error("entry point {0} not found")]
    MissingEntry(SymbolRef),
    #[error("{0} has no entry point")]
    NoEntry(&'static str),
}

/// A module whose symbols have been resolved
#[derive(Debug)]
pub struct Program {
    module: Module,
    /// symbol index -> function
    resolved: Vec<FunctionId>,
    entry: Option<FunctionId>,
}

impl Program {
    /// Resolve every symbol of `module`
    pub fn link(module: Module) -> Result<Program, LinkError> {
        let resolved = module
            .symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| {
                locate(&module, symbol).ok_or_else(|| LinkError::UnresolvedSymbol {
                    index,
                    symbol: symbol.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let entry = match &module.entry {
            Some(symbol) => {
                Some(locate(&module, symbol).ok_or_else(|| LinkError::MissingEntry(symbol.clone()))?)
            }
            None => None,
        };

        Ok(Program { module, resolved, entry })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Function targeted by symbol table entry `index`
    #[inline]
    pub fn resolve_symbol(&self, index: u16) -> Option<FunctionId> {
        self.resolved.get(index as usize).copied()
    }

    /// Look a function up by type and name
    pub fn lookup(&self, symbol: &SymbolRef) -> Option<FunctionId> {
        locate(&self.module, symbol)
    }

    #[inline]
    pub fn entry(&self) -> Option<FunctionId> {
        self.entry
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionDef> {
        self.module
            .types
            .get(id.type_index as usize)?
            .functions
            .get(id.function_index as usize)
    }

    /// Declaring type name and function name of `id`
    pub fn symbol_of(&self, id: FunctionId) -> Option<SymbolRef> {
        let ty = self.module.types.get(id.type_index as usize)?;
        let func = ty.functions.get(id.function_index as usize)?;
        Some(SymbolRef::new(ty.name.as_str(), func.name.as_str()))
    }
}

fn locate(module: &Module, symbol: &SymbolRef) -> Option<FunctionId> {
    module.types.iter().enumerate().find_map(|(ti, ty)| {
        if ty.name != *symbol.type_name {
            return None;
        }
        ty.functions
            .iter()
            .position(|f| f.name == *symbol.function)
            .map(|fi| FunctionId {
                type_index: ti as u32,
                function_index: fi as u32,
            })
    })
}
