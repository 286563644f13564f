//! Sandboxed script execution.
//!
//! Every run gets a fresh engine and scope. The engine starts from
//! `Engine::new_raw()` and only receives the packages listed in
//! [`allowed_packages`], so nothing can reach the filesystem, the network,
//! the process or the module loader. `input` and `params` are pushed as
//! constants and the value of the script's last expression is the output.
//!
//! Runs are wall-clock bounded. When the deadline passes the caller gets
//! [`ExecutionError::Timeout`] straight away and the evaluation is told to
//! stop through the engine's progress hook, which fires on every operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use rhai::module_resolvers::DummyModuleResolver;
use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, BasicStringPackage, BasicTimePackage,
    CorePackage, LogicPackage, MoreStringPackage, Package,
};
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, EvalAltResult, Module, Scope, AST};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::CompiledPlugin;
use crate::error::ExecutionError;

/// Resource limits applied to every sandboxed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Maximum operations per run, 0 = unlimited (default: 0, the timeout bounds runs)
    #[serde(default)]
    pub max_operations: u64,

    /// Maximum function call depth (default: 64)
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,

    /// Maximum expression nesting at global level (default: 64)
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Maximum expression nesting inside functions (default: 32)
    #[serde(default = "default_max_function_expr_depth")]
    pub max_function_expr_depth: usize,

    /// Maximum string length in bytes (default: 10MB)
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum array length (default: 1M elements)
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,

    /// Maximum object map size (default: 100k entries)
    #[serde(default = "default_max_map_size")]
    pub max_map_size: usize,
}

fn default_max_call_levels() -> usize {
    64
}
fn default_max_expr_depth() -> usize {
    64
}
fn default_max_function_expr_depth() -> usize {
    32
}
fn default_max_string_size() -> usize {
    10 * 1024 * 1024
} // 10MB
fn default_max_array_size() -> usize {
    1_000_000
}
fn default_max_map_size() -> usize {
    100_000
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: default_max_call_levels(),
            max_expr_depth: default_max_expr_depth(),
            max_function_expr_depth: default_max_function_expr_depth(),
            max_string_size: default_max_string_size(),
            max_array_size: default_max_array_size(),
            max_map_size: default_max_map_size(),
        }
    }
}

/// The pure packages a sandbox is allowed to see.
///
/// Built once; modules are immutable function tables so sharing them
/// between runs shares no script state.
fn allowed_packages() -> &'static [Arc<Module>] {
    static PACKAGES: OnceLock<Vec<Arc<Module>>> = OnceLock::new();
    PACKAGES.get_or_init(|| {
        vec![
            CorePackage::new().as_shared_module(),
            LogicPackage::new().as_shared_module(),
            BasicStringPackage::new().as_shared_module(),
            MoreStringPackage::new().as_shared_module(),
            BasicArrayPackage::new().as_shared_module(),
            BasicMapPackage::new().as_shared_module(),
            BasicMathPackage::new().as_shared_module(),
            BasicTimePackage::new().as_shared_module(),
        ]
    })
}

/// Build a locked-down engine.
///
/// Used both for compiling (the registry) and, with a progress hook added,
/// for every run.
pub fn build_engine(limits: &SandboxLimits) -> Engine {
    let mut engine = Engine::new_raw();

    for package in allowed_packages() {
        engine.register_global_module(Arc::clone(package));
    }

    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.on_print(|text| debug!(target: "scriptflow::script", "{}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: "scriptflow::script", source = ?source, %pos, "{}", text)
    });

    engine
        .set_max_operations(limits.max_operations)
        .set_max_call_levels(limits.max_call_levels)
        .set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_array_size)
        .set_max_map_size(limits.max_map_size);

    engine
}

/// Runs compiled plugins in isolated, time-bounded sandboxes
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    limits: SandboxLimits,
    default_timeout: Duration,
}

impl SandboxExecutor {
    pub fn new(limits: SandboxLimits, default_timeout: Duration) -> Self {
        Self {
            limits,
            default_timeout,
        }
    }

    /// Timeout used by [`SandboxExecutor::run_default`]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run with the configured default timeout
    pub async fn run_default(
        &self,
        plugin: Arc<CompiledPlugin>,
        input: Value,
        params: Value,
    ) -> Result<Value, ExecutionError> {
        self.run(plugin, input, params, self.default_timeout).await
    }

    /// Run one compiled plugin against one input and params pair.
    ///
    /// Returns no earlier than the script finishes or `timeout` elapses,
    /// whichever comes first.
    pub async fn run(
        &self,
        plugin: Arc<CompiledPlugin>,
        input: Value,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ExecutionError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&cancelled);
        let limits = self.limits.clone();
        let name = plugin.name.clone();
        let started = Instant::now();

        let worker = tokio::task::spawn_blocking(move || {
            evaluate(&plugin.ast, &limits, stop, input, params)
        });

        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(result)) => {
                debug!(
                    plugin = %name,
                    duration_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "Script finished"
                );
                result
            }
            Ok(Err(join_err)) => {
                warn!(plugin = %name, error = %join_err, "Script worker aborted");
                Err(ExecutionError::Runtime(format!(
                    "script worker aborted: {}",
                    join_err
                )))
            }
            Err(_) => {
                cancelled.store(true, Ordering::SeqCst);
                warn!(
                    plugin = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Script timed out, terminating"
                );
                Err(ExecutionError::Timeout(timeout))
            }
        }
    }
}

/// Evaluate on the current (blocking) thread in a fresh engine and scope
fn evaluate(
    ast: &AST,
    limits: &SandboxLimits,
    cancelled: Arc<AtomicBool>,
    input: Value,
    params: Value,
) -> Result<Value, ExecutionError> {
    let mut engine = build_engine(limits);
    engine.on_progress(move |_ops| {
        if cancelled.load(Ordering::Relaxed) {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let mut scope = Scope::new();
    scope.push_constant_dynamic("input", to_dynamic(&input).map_err(script_error)?);
    scope.push_constant_dynamic("params", to_dynamic(&params).map_err(script_error)?);

    let output = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(script_error)?;

    from_dynamic::<Value>(&output).map_err(|err| {
        ExecutionError::Runtime(format!("script result is not JSON-representable: {}", err))
    })
}

fn script_error(err: Box<EvalAltResult>) -> ExecutionError {
    match *err {
        EvalAltResult::ErrorTerminated(..) => {
            ExecutionError::Runtime("script terminated".to_string())
        }
        other => ExecutionError::Runtime(other.to_string()),
    }
}
