//! Script context backed by a V8 isolate.
//!
//! Hosts the server bundle and exposes only the globals component code needs:
//! - console.log/info/debug/warn/error (captured, forwarded to the log)
//! - atob, btoa
//! - crypto.randomUUID, crypto.getRandomValues, crypto.subtle.digest
//! - Module loading from the server build directory only
//! - No fs, net, env, or other system access

use crate::config::BridgeConfig;
use crate::entry::Entry;
use crate::loader::BundleLoader;
use crate::manifest::Manifest;
use crate::ops::{ssr_bridge_runtime, ConsoleOutput};
use crate::script::{RenderOutput, ScriptContext};
use anyhow::{anyhow, Result};
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Deserialize;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MIB: usize = 1024 * 1024;

/// Failure of a script call
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The server bundle's render function threw
    #[error("{message}")]
    Thrown {
        message: String,
        stack: Option<String>,
        /// Verdict of the bundle's `isRenderError` export
        render_error: bool,
    },

    /// Engine failure (including heap exhaustion) or a malformed reply
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

/// Reply of `__ssr_bridge__.render` in bootstrap.js
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Outcome {
    ok: bool,
    #[serde(default)]
    head: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    render_error: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    stack: Option<String>,
}

impl Outcome {
    fn into_result(self) -> Result<RenderOutput, ScriptError> {
        if self.ok {
            Ok(RenderOutput {
                head: self.head,
                body: self.body,
            })
        } else {
            Err(ScriptError::Thrown {
                message: self.message,
                stack: self.stack,
                render_error: self.render_error,
            })
        }
    }
}

/// Terminates a script call that runs the isolate out of heap, so the call
/// fails with an error instead of V8 aborting the process.
struct HeapGuard {
    limit: usize,
    exhausted: Arc<AtomicBool>,
}

impl HeapGuard {
    fn install(runtime: &mut JsRuntime, limit: usize) -> Self {
        let guard = Self {
            limit,
            exhausted: Arc::new(AtomicBool::new(false)),
        };
        guard.arm(runtime);
        guard
    }

    fn arm(&self, runtime: &mut JsRuntime) {
        let isolate = runtime.v8_isolate().thread_safe_handle();
        let exhausted = self.exhausted.clone();

        runtime.add_near_heap_limit_callback(move |current, initial| {
            tracing::warn!(
                current_mb = current / MIB,
                initial_mb = initial / MIB,
                "Script heap limit reached, terminating render"
            );
            exhausted.store(true, Ordering::SeqCst);
            isolate.terminate_execution();
            // Headroom for V8 to unwind the terminated call
            current + current / 2
        });
    }

    /// Returns true if the last call was terminated for exhausting the heap,
    /// after making the isolate usable again under the original limit.
    fn recover(&self, runtime: &mut JsRuntime) -> bool {
        if !self.exhausted.swap(false, Ordering::SeqCst) {
            return false;
        }

        let isolate = runtime.v8_isolate();
        isolate.cancel_terminate_execution();
        isolate.low_memory_notification();
        runtime.remove_near_heap_limit_callback(self.limit);
        self.arm(runtime);
        true
    }

    fn exceeded(&self) -> ScriptError {
        ScriptError::Engine(anyhow!(
            "Render exceeded the script heap limit ({} MiB)",
            self.limit / MIB
        ))
    }
}

/// Create a JS runtime that can only load modules through `loader`
pub fn create_runtime(loader: BundleLoader, max_heap_size: Option<usize>) -> JsRuntime {
    let create_params =
        max_heap_size.map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

    let mut runtime = JsRuntime::new(RuntimeOptions {
        module_loader: Some(Rc::new(loader)),
        extensions: vec![ssr_bridge_runtime::init_ops_and_esm()],
        create_params,
        ..Default::default()
    });

    runtime.op_state().borrow_mut().put(ConsoleOutput::default());

    runtime
}

/// Evaluate `code`, drive the event loop and return the string the resulting
/// promise (or plain value) settles to.
async fn eval_string(runtime: &mut JsRuntime, code: String) -> Result<String> {
    let global = runtime.execute_script("<ssr-bridge>", code)?;

    runtime.run_event_loop(PollEventLoopOptions::default()).await?;

    let scope = &mut runtime.handle_scope();
    let local = v8::Local::new(scope, &global);

    let value = match v8::Local::<v8::Promise>::try_from(local) {
        Ok(promise) => match promise.state() {
            v8::PromiseState::Fulfilled => promise.result(scope),
            v8::PromiseState::Rejected => {
                let exception = promise.result(scope);
                return Err(anyhow!(
                    "Script call threw: {}",
                    exception.to_rust_string_lossy(scope)
                ));
            }
            v8::PromiseState::Pending => {
                return Err(anyhow!("Script call returned unresolved promise"))
            }
        },
        Err(_) => local,
    };

    if !value.is_string() {
        return Err(anyhow!("Script call must produce a string"));
    }
    Ok(value.to_rust_string_lossy(scope))
}

fn take_console(runtime: &mut JsRuntime) -> ConsoleOutput {
    let state = runtime.op_state();
    let mut state = state.borrow_mut();
    let output = state
        .try_borrow_mut::<ConsoleOutput>()
        .map(std::mem::take)
        .unwrap_or_default();
    output
}

/// The server bundle loaded into a V8 isolate
pub struct DenoContext {
    runtime: JsRuntime,
    manifest: Manifest,
    heap: Option<HeapGuard>,
}

impl DenoContext {
    /// Load the server bundle described by `config` and read its manifest
    pub async fn load(config: &BridgeConfig) -> Result<Self> {
        let loader = BundleLoader::new(&config.server_dir)?;
        let renderfile = loader.module_url(&config.renderfile_path())?;
        let exports = match config.exports_path() {
            Some(path) if path.exists() => Some(loader.module_url(&path)?),
            Some(path) => {
                tracing::debug!(
                    path = %path.display(),
                    "No exports module; render errors stay unclassified"
                );
                None
            }
            None => None,
        };

        let mut runtime = create_runtime(loader, config.max_heap_size);
        let heap = config
            .max_heap_size
            .map(|limit| HeapGuard::install(&mut runtime, limit));

        let code = format!(
            "globalThis.__ssr_bridge__.init({}, {})",
            serde_json::to_string(renderfile.as_str())?,
            serde_json::to_string(&exports.as_ref().map(|url| url.as_str()))?,
        );
        let result = eval_string(&mut runtime, code).await;
        take_console(&mut runtime).emit();

        if let Some(heap) = &heap {
            if heap.recover(&mut runtime) {
                return Err(anyhow!(
                    "Failed to load server bundle '{}': {}",
                    renderfile,
                    heap.exceeded()
                ));
            }
        }

        let manifest_json = result
            .map_err(|e| anyhow!("Failed to load server bundle '{}': {}", renderfile, e))?;
        let manifest = Manifest::from_json(&manifest_json)?;

        tracing::info!(
            renderfile = %renderfile,
            components = manifest.len(),
            "Loaded server bundle"
        );

        Ok(Self {
            runtime,
            manifest,
            heap,
        })
    }
}

impl ScriptContext for DenoContext {
    type Error = ScriptError;

    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn render(&mut self, entries: &[Entry]) -> Result<RenderOutput, ScriptError> {
        // Entries travel as a JSON string and are rebuilt with JSON.parse, so
        // a `__proto__` prop stays an ordinary own property.
        let entries_json = serde_json::to_string(entries)
            .and_then(|json| serde_json::to_string(&json))
            .map_err(|e| anyhow!("Failed to encode entries: {}", e))?;
        let code = format!("globalThis.__ssr_bridge__.render({})", entries_json);

        let result = eval_string(&mut self.runtime, code).await;
        take_console(&mut self.runtime).emit();

        if let Some(heap) = &self.heap {
            if heap.recover(&mut self.runtime) {
                return Err(heap.exceeded());
            }
        }

        let outcome: Outcome = serde_json::from_str(&result?)
            .map_err(|e| anyhow!("Malformed render result: {}", e))?;
        outcome.into_result()
    }

    fn is_render_error(&self, error: &ScriptError) -> bool {
        matches!(error, ScriptError::Thrown { render_error: true, .. })
    }
}
