/// Shadowcall - deferred dispatch by bytecode rewriting
///
/// Functions marked with a zero-argument attribute (`Pure` by default) are
/// rewritten so that calling them submits the work to a thread pool and
/// returns a deferred value immediately. The result is computed once per
/// distinct call and resolved on first use.
///
/// # Architecture
///
/// 1. **Rewriting** (`backend::rewrite`)
///    - Clones each marked function into a hidden implementation
///    - Replaces the original body with a stub that packs the arguments and
///      hands them to the dispatch runtime
///    - Patches callers so deferred results are unwrapped before use
///
/// 2. **Dispatch** (`backend::dispatch`)
///    - Structural call fingerprints (scope, function, argument snapshot)
///    - A future registry owned per program run
///    - `DeferredValue<T>` handles resolved through the runtime
///
/// 3. **Execution** (`backend::bytecode`, `loader`)
///    - Artifact encoding, linking and the stack VM
///    - Bootstrap: rewrite an artifact into its `.shadow` copy, then run it
///      in a fresh runtime
///
/// # Example
///
/// ```rust
/// use shadowcall::backend::bytecode::{BodyBuilder, FunctionDef, Module, Opcode, Param, TypeDef};
/// use shadowcall::backend::{Rewriter, TypeRef};
///
/// let mut body = BodyBuilder::new();
/// body.emit_byte(Opcode::LoadArg, 0);
/// body.emit_byte(Opcode::LoadArg, 0);
/// body.emit(Opcode::Mul);
/// body.emit(Opcode::Return);
///
/// let square = FunctionDef::new(
///     "square",
///     vec![Param::new("x", TypeRef::Int)],
///     TypeRef::Int,
///     body.build().unwrap(),
/// )
/// .with_attribute("Pure");
///
/// let mut module = Module::new().with_type(TypeDef::new("demo.Program").with_function(square));
/// let report = Rewriter::default().rewrite(&mut module).unwrap();
/// assert_eq!(report.clones[0].to_string(), "demo.Program::square__impl");
/// ```

pub mod backend;
pub mod config;
pub mod loader;

pub use backend::{
    CallFingerprint, DeferredValue, DispatchRuntime, FutureRegistry, Module, Program, RewriteConfig,
    Rewriter, RuntimeConfig, Value, Vm,
};
pub use config::{Config, ConfigError};
pub use loader::{Bootstrap, InProcessLauncher, LoaderError, ModuleLauncher};
