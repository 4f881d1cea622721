//! Loader / Bootstrap
//!
//! Rewrites a module artifact into its shadow copy next to the original and
//! runs the shadow module's entry point in a fresh runtime, so the rewriter
//! never sees its own output.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::bytecode::{EncodingError, LinkError, Module, Program, Vm, VmConfig, VmError};
use crate::backend::dispatch::{DispatchError, DispatchRuntime, FutureRegistry, RuntimeConfig};
use crate::backend::models::Value;
use crate::backend::rewrite::{RewriteConfig, RewriteError, Rewriter};
use crate::config::Config;

/// Suffix appended to an artifact's file name to name its shadow copy
pub const SHADOW_SUFFIX: &str = ".shadow";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),
    #[error("link failed: {0}")]
    Link(#[from] LinkError),
    #[error("execution failed: {0}")]
    Vm(#[from] VmError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// `prog.shc` -> `prog.shc.shadow`
pub fn shadow_path(path: impl AsRef<Path>) -> PathBuf {
    let mut name: OsString = path.as_ref().as_os_str().to_owned();
    name.push(SHADOW_SUFFIX);
    PathBuf::from(name)
}

pub fn is_shadow_path(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(SHADOW_SUFFIX))
}

/// Rewrite the artifact at `path` and write the shadow copy alongside it
///
/// Nothing is written when reading or rewriting fails.
pub fn rewrite_file(path: impl AsRef<Path>, config: &RewriteConfig) -> LoaderResult<PathBuf> {
    let path = path.as_ref();
    rewrite_file_to(path, shadow_path(path), config)
}

/// Rewrite the artifact at `input` into `output`
pub fn rewrite_file_to(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &RewriteConfig,
) -> LoaderResult<PathBuf> {
    let mut module = Module::read_from(input.as_ref())?;
    let report = Rewriter::new(config.clone()).rewrite(&mut module)?;
    module.write_to(output.as_ref())?;
    info!(
        target: "shadowcall::loader",
        input = %input.as_ref().display(),
        output = %output.as_ref().display(),
        rewritten = report.rewritten.len(),
        "wrote shadow module"
    );
    Ok(output.as_ref().to_path_buf())
}

/// Runs a module artifact's entry point
pub trait ModuleLauncher {
    fn launch(&self, path: &Path) -> LoaderResult<Value>;
}

/// Launches modules in this process, each with its own registry and runtime
#[derive(Debug, Clone, Default)]
pub struct InProcessLauncher {
    runtime: RuntimeConfig,
    vm: VmConfig,
}

impl InProcessLauncher {
    pub fn new(runtime: RuntimeConfig, vm: VmConfig) -> Self {
        Self { runtime, vm }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.runtime.clone(), config.vm.clone())
    }

    /// Run an already-loaded module
    ///
    /// A deferred entry-point result is resolved before returning.
    pub fn run_module(&self, module: Module) -> LoaderResult<Value> {
        let program = Arc::new(Program::link(module)?);
        let registry = Arc::new(FutureRegistry::new());
        let runtime = DispatchRuntime::new(Arc::clone(&program), Arc::clone(&registry), self.runtime.clone())?;

        let result = Vm::with_config(program, self.vm.clone())
            .with_runtime(Arc::clone(&runtime))
            .run_entry()
            .map_err(LoaderError::from)
            .and_then(|value| match value {
                Value::Deferred(deferred) => Ok(deferred.value()?),
                value => Ok(value),
            });

        let stats = registry.stats();
        debug!(
            target: "shadowcall::loader",
            submitted = stats.submitted,
            reused = stats.reused,
            faulted = stats.faulted,
            "run finished"
        );
        // Deferred values held by the registry point back at the runtime
        registry.clear();
        result
    }
}

impl ModuleLauncher for InProcessLauncher {
    fn launch(&self, path: &Path) -> LoaderResult<Value> {
        let module = Module::read_from(path)?;
        info!(target: "shadowcall::loader", path = %path.display(), shadow = module.shadow, "launching");
        self.run_module(module)
    }
}

/// Rewrite-then-launch entry point
#[derive(Debug, Clone, Default)]
pub struct Bootstrap<L = InProcessLauncher> {
    rewrite: RewriteConfig,
    launcher: L,
}

impl Bootstrap<InProcessLauncher> {
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.rewrite.clone(), InProcessLauncher::from_config(config))
    }
}

impl<L: ModuleLauncher> Bootstrap<L> {
    pub fn new(rewrite: RewriteConfig, launcher: L) -> Self {
        Self { rewrite, launcher }
    }

    /// Launch `path` directly if it is already a shadow module, otherwise
    /// rewrite it first and launch the shadow copy
    pub fn run(&self, path: impl AsRef<Path>) -> LoaderResult<Value> {
        let path = path.as_ref();
        if Module::read_from(path)?.shadow {
            return self.launcher.launch(path);
        }
        let shadow = rewrite_file(path, &self.rewrite)?;
        self.launcher.launch(&shadow)
    }
}
