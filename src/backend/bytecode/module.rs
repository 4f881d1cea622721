//! Compiled modules: types, functions and the symbol table.

use std::fmt;
use std::sync::Arc;

use crate::backend::models::TypeRef;

use super::body::FunctionBody;

/// Reference to a function by declaring type and name
///
/// Entries of the module symbol table; `Call`, `Submit` and `Defer`
/// immediates index into that table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolRef {
    pub type_name: Arc<str>,
    pub function: Arc<str>,
}

impl SymbolRef {
    pub fn new(type_name: impl Into<Arc<str>>, function: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            function: function.into(),
        }
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.type_name, self.function)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Zero-argument marker attached to a function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: name.into(), ty }
    }
}

/// A function definition
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub visibility: Visibility,
    pub is_static: bool,
    pub params: Vec<Param>,
    pub return_type: TypeRef,
    pub attributes: Vec<Attribute>,
    pub body: FunctionBody,
}

impl FunctionDef {
    /// A public static function without attributes
    pub fn new(
        name: impl Into<String>,
        params: Vec<Param>,
        return_type: TypeRef,
        body: FunctionBody,
    ) -> Self {
        Self {
            name: name.into(),
            visibility: Visibility::Public,
            is_static: true,
            params,
            return_type,
            attributes: Vec::new(),
            body,
        }
    }

    /// Attach a marker attribute
    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name));
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A type definition owning an ordered list of functions
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub functions: Vec<FunctionDef>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, function: FunctionDef) -> Self {
        self.functions.push(function);
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut FunctionDef> {
        self.functions.iter_mut().find(|f| f.name == name)
    }
}

/// A compiled module
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    /// Set once the module has been rewritten
    pub shadow: bool,
    pub symbols: Vec<SymbolRef>,
    pub entry: Option<SymbolRef>,
    pub types: Vec<TypeDef>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, ty: TypeDef) -> Self {
        self.types.push(ty);
        self
    }

    pub fn with_entry(mut self, entry: SymbolRef) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Index of `symbol` in the symbol table
    pub fn symbol_index(&self, symbol: &SymbolRef) -> Option<u16> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .and_then(|i| u16::try_from(i).ok())
    }

    /// Intern `symbol`, returning its table index
    ///
    /// Returns `None` when the table already holds `u16::MAX + 1` entries.
    pub fn intern_symbol(&mut self, symbol: SymbolRef) -> Option<u16> {
        if let Some(index) = self.symbol_index(&symbol) {
            return Some(index);
        }
        let index = u16::try_from(self.symbols.len()).ok()?;
        self.symbols.push(symbol);
        Some(index)
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn find_type_mut(&mut self, name: &str) -> Option<&mut TypeDef> {
        self.types.iter_mut().find(|t| t.name == name)
    }

    pub fn find_function(&self, symbol: &SymbolRef) -> Option<&FunctionDef> {
        self.find_type(&symbol.type_name)?.function(&symbol.function)
    }

    /// Iterate over every function together with its symbol
    pub fn functions(&self) -> impl Iterator<Item = (SymbolRef, &FunctionDef)> {
        self.types.iter().flat_map(|t| {
            t.functions
                .iter()
                .map(move |f| (SymbolRef::new(t.name.as_str(), f.name.as_str()), f))
        })
    }

    /// Disassemble every function in the module
    pub fn disassemble(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "module shadow={} symbols={} entry={}\n",
            self.shadow,
            self.symbols.len(),
            self.entry.as_ref().map_or_else(|| "-".to_string(), |e| e.to_string())
        ));
        for ty in &self.types {
            for func in &ty.functions {
                let params: Vec<String> =
                    func.params.iter().map(|p| format!("{}: {}", p.name, p.ty)).collect();
                let attrs: String = func.attributes.iter().map(|a| format!("[{}] ", a.name)).collect();
                output.push_str(&format!(
                    "\n=== {}{}::{}({}) -> {} ===\n",
                    attrs,
                    ty.name,
                    func.name,
                    params.join(", "),
                    func.return_type
                ));
                output.push_str(&func.body.disassemble(&self.symbols));
            }
        }
        output
    }
}
