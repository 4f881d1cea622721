//! Dispatch runtime
//!
//! Turns `Submit` into a registry entry plus a pool task, and `resolve` into
//! a blocking wait on that entry. Hidden implementations are addressed by
//! the `FunctionId` the linker resolved, never by name.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::backend::bytecode::{FunctionId, Program, SymbolRef, Vm, VmConfig};
use crate::backend::models::Value;

use super::deferred::{DeferredValue, Resolver};
use super::error::{DispatchError, DispatchResult};
use super::fingerprint::CallFingerprint;
use super::pending::{Job, PendingComputation};
use super::registry::FutureRegistry;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Size of a dedicated worker pool; `None` uses rayon's global pool and
    /// `Some(0)` sizes the pool to the CPU count
    pub worker_threads: Option<usize>,
    /// Upper bound on how long `resolve` blocks
    #[serde(rename = "resolve_timeout_ms", with = "millis")]
    pub resolve_timeout: Option<Duration>,
    /// Call depth limit for VMs running hidden implementations, counted
    /// from the hidden implementation's own frame. Independent of the
    /// submitting VM's `VmConfig::max_call_depth`
    pub max_call_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            resolve_timeout: None,
            max_call_depth: VmConfig::default().max_call_depth,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

pub struct DispatchRuntime {
    program: Arc<Program>,
    registry: Arc<FutureRegistry>,
    config: RuntimeConfig,
    pool: Option<rayon::ThreadPool>,
    this: Weak<DispatchRuntime>,
}

impl std::fmt::Debug for DispatchRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRuntime")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("dedicated_pool", &self.pool.as_ref().map(|p| p.current_num_threads()))
            .finish()
    }
}

impl DispatchRuntime {
    pub fn new(
        program: Arc<Program>,
        registry: Arc<FutureRegistry>,
        config: RuntimeConfig,
    ) -> DispatchResult<Arc<Self>> {
        let pool = match config.worker_threads {
            Some(n) => {
                let threads = if n == 0 { num_cpus::get() } else { n };
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("shadowcall-worker-{}", i))
                    .build()
                    .map_err(|e| DispatchError::ThreadPool(e.to_string()))?;
                debug!(target: "shadowcall::dispatch", threads, "built dedicated worker pool");
                Some(pool)
            }
            None => None,
        };

        Ok(Arc::new_cyclic(|this| Self {
            program,
            registry,
            config,
            pool,
            this: this.clone(),
        }))
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn registry(&self) -> &Arc<FutureRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a call to `target` and start it on the worker pool
    ///
    /// Never blocks. An equal call already registered is reused.
    pub fn submit(&self, target: FunctionId, args: Vec<Value>) -> DispatchResult<CallFingerprint> {
        let symbol = self.symbol_of(target)?;
        let fingerprint = CallFingerprint::for_symbol(&symbol, &args);

        let (pending, created) = self.registry.get_or_insert_with(fingerprint.clone(), || {
            PendingComputation::new(fingerprint.clone(), self.job(target, fingerprint.to_string(), args))
        });

        if created {
            debug!(target: "shadowcall::dispatch", call = %fingerprint, "submitted");
            let registry = Arc::clone(&self.registry);
            let task = move || {
                if let Some(ok) = pending.run() {
                    registry.record_outcome(ok);
                }
            };
            match &self.pool {
                Some(pool) => pool.spawn(task),
                None => rayon::spawn(task),
            }
        } else {
            trace!(target: "shadowcall::dispatch", call = %fingerprint, "reused registry entry");
        }

        Ok(fingerprint)
    }

    /// Submit by symbol instead of linked id
    pub fn submit_symbol(&self, symbol: &SymbolRef, args: Vec<Value>) -> DispatchResult<CallFingerprint> {
        let target = self
            .program
            .lookup(symbol)
            .ok_or_else(|| DispatchError::NotSubmitted(symbol.to_string()))?;
        self.submit(target, args)
    }

    /// Block until the call is terminal and return its value or fault
    ///
    /// A computation no worker has picked up yet runs on the calling thread.
    pub fn resolve(&self, fingerprint: &CallFingerprint) -> DispatchResult<Value> {
        let pending = self
            .registry
            .get(fingerprint)
            .ok_or_else(|| DispatchError::NotSubmitted(fingerprint.to_string()))?;

        if let Some(ok) = pending.run() {
            trace!(target: "shadowcall::dispatch", call = %fingerprint, "ran inline on resolving thread");
            self.registry.record_outcome(ok);
        }
        pending.wait(self.config.resolve_timeout)
    }

    /// Build the deferred handle for a call to `target`
    pub fn defer(&self, target: FunctionId, args: Vec<Value>) -> DispatchResult<DeferredValue> {
        let symbol = self.symbol_of(target)?;
        let fingerprint = CallFingerprint::for_symbol(&symbol, &args);
        let resolver: Arc<dyn Resolver> = self
            .this
            .upgrade()
            .ok_or_else(|| DispatchError::NotSubmitted(fingerprint.to_string()))?;
        Ok(DeferredValue::new(fingerprint, args, resolver))
    }

    fn symbol_of(&self, target: FunctionId) -> DispatchResult<SymbolRef> {
        self.program
            .symbol_of(target)
            .ok_or(DispatchError::UnknownTarget(target))
    }

    /// Invocation of the hidden implementation, run by whoever claims it
    fn job(&self, target: FunctionId, call: String, args: Vec<Value>) -> Job {
        let runtime = self.this.clone();
        let program = Arc::clone(&self.program);
        let vm_config = VmConfig {
            max_call_depth: self.config.max_call_depth,
            ..VmConfig::default()
        };
        Box::new(move || {
            let runtime = runtime.upgrade().ok_or_else(|| DispatchError::Faulted {
                call: call.clone(),
                reason: "dispatch runtime dropped".to_string(),
            })?;
            // Results of other dispatched calls passed straight through as arguments
            let args = args
                .into_iter()
                .map(|arg| match arg {
                    Value::Deferred(deferred) => deferred.value(),
                    arg => Ok(arg),
                })
                .collect::<DispatchResult<Vec<Value>>>()
                .map_err(|e| DispatchError::Faulted {
                    call: call.clone(),
                    reason: format!("argument failed: {}", e),
                })?;
            let mut vm = Vm::with_config(program, vm_config).with_runtime(runtime);
            vm.invoke(target, args).map_err(|e| DispatchError::Faulted {
                call,
                reason: e.to_string(),
            })
        })
    }
}

impl Resolver for DispatchRuntime {
    fn resolve(&self, fingerprint: &CallFingerprint) -> DispatchResult<Value> {
        DispatchRuntime::resolve(self, fingerprint)
    }
}
