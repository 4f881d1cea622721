// Backend for shadowcall
//
// - `models`: runtime values and type references
// - `bytecode`: compiled modules, artifact encoding, linking and the VM
// - `rewrite`: clone/stub rewriting of marked functions and the dataflow patch pass
// - `dispatch`: call fingerprints, the future registry, deferred values and the runtime

pub mod bytecode;
pub mod dispatch;
pub mod models;
pub mod rewrite;

pub use bytecode::{FunctionId, Module, Program, SymbolRef, Vm, VmConfig, VmError};
pub use dispatch::{
    CallFingerprint, DeferredValue, DispatchError, DispatchRuntime, FromValue, FutureRegistry,
    RegistryStats, RuntimeConfig,
};
pub use models::*;
pub use rewrite::{RewriteConfig, RewriteError, RewriteReport, Rewriter};
