//! Shared fixtures for the integration tests
//!
//! Every fixture module has a single type, `demo.Program`, whose functions
//! take and return integers unless stated otherwise.

#![allow(dead_code)]

use std::sync::Arc;

use shadowcall::backend::bytecode::{
    BodyBuilder, FunctionDef, Module, Opcode, Param, Program, SymbolRef, TypeDef, Vm,
};
use shadowcall::backend::{DispatchRuntime, FutureRegistry, RegistryStats, RuntimeConfig, TypeRef, Value};

pub const TYPE: &str = "demo.Program";

pub fn sym(name: &str) -> SymbolRef {
    SymbolRef::new(TYPE, name)
}

/// Builds a one-type module function by function
pub struct ProgramBuilder {
    module: Module,
    ty: TypeDef,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            module: Module::new(),
            ty: TypeDef::new(TYPE),
        }
    }

    /// Symbol index of `name`, interned on first use
    pub fn symbol(&mut self, name: &str) -> u16 {
        self.module.intern_symbol(sym(name)).expect("symbol table has room")
    }

    /// Add an `Int -> Int` function of `arity` parameters
    pub fn int_fn(
        mut self,
        name: &str,
        arity: usize,
        marker: Option<&str>,
        body: impl FnOnce(&mut Self, &mut BodyBuilder),
    ) -> Self {
        let mut b = BodyBuilder::new();
        body(&mut self, &mut b);
        let params = (0..arity).map(|i| Param::new(format!("p{}", i), TypeRef::Int)).collect();
        let mut function = FunctionDef::new(name, params, TypeRef::Int, b.build().expect("valid body"));
        if let Some(marker) = marker {
            function = function.with_attribute(marker);
        }
        self.ty.functions.push(function);
        self
    }

    pub fn function(mut self, function: FunctionDef) -> Self {
        self.ty.functions.push(function);
        self
    }

    /// Add the `main` entry point
    pub fn main(self, body: impl FnOnce(&mut Self, &mut BodyBuilder)) -> Module {
        let mut this = self.int_fn("main", 0, None, body);
        let ty = std::mem::replace(&mut this.ty, TypeDef::new(TYPE));
        this.module.with_type(ty).with_entry(sym("main"))
    }

    /// Emit `name(args...)` with integer literal arguments
    pub fn call(&mut self, b: &mut BodyBuilder, name: &str, args: &[i64]) {
        let index = self.symbol(name);
        for &arg in args {
            b.emit_int(arg);
        }
        b.emit_call(index, args.len() as u8);
    }
}

/// `p0 * 2`
pub fn doubling(_: &mut ProgramBuilder, b: &mut BodyBuilder) {
    b.emit_byte(Opcode::LoadArg, 0);
    b.emit_int(2);
    b.emit(Opcode::Mul);
    b.emit(Opcode::Return);
}

/// `p0 + p1`
pub fn adding(_: &mut ProgramBuilder, b: &mut BodyBuilder) {
    b.emit_byte(Opcode::LoadArg, 0);
    b.emit_byte(Opcode::LoadArg, 1);
    b.emit(Opcode::Add);
    b.emit(Opcode::Return);
}

/// `Method1..3(x) = 2x`, `main = Method1(1) + Method2(2) + Method3(3)`
pub fn three_methods(marker: Option<&str>) -> Module {
    ProgramBuilder::new()
        .int_fn("Method1", 1, marker, doubling)
        .int_fn("Method2", 1, marker, doubling)
        .int_fn("Method3", 1, marker, doubling)
        .main(|p, b| {
            p.call(b, "Method1", &[1]);
            p.call(b, "Method2", &[2]);
            b.emit(Opcode::Add);
            p.call(b, "Method3", &[3]);
            b.emit(Opcode::Add);
            b.emit(Opcode::Return);
        })
}

pub fn link(module: Module) -> Arc<Program> {
    Arc::new(Program::link(module).expect("module links"))
}

pub fn runtime(module: Module, config: RuntimeConfig) -> Arc<DispatchRuntime> {
    DispatchRuntime::new(link(module), Arc::new(FutureRegistry::new()), config).expect("runtime")
}

/// Run the entry point of an unrewritten module
pub fn run_plain(module: Module) -> Value {
    Vm::new(link(module)).run_entry().expect("runs")
}

/// Run the entry point through a runtime, resolving a deferred result,
/// and clear the registry afterwards
pub fn run_shadow(module: Module) -> (Value, RegistryStats) {
    let runtime = runtime(module, RuntimeConfig::default());
    let value = Vm::new(Arc::clone(runtime.program()))
        .with_runtime(Arc::clone(&runtime))
        .run_entry()
        .expect("runs");
    let value = match value {
        Value::Deferred(d) => d.value().expect("resolves"),
        v => v,
    };
    let stats = runtime.registry().stats();
    runtime.registry().clear();
    (value, stats)
}
