//! Bridge entry point.
//!
//! `serve` moves through three states: idle, running (blocked inside the
//! native run loop with the handler published), and terminated (handler
//! withdrawn). The handler is withdrawn on every exit path, including a
//! panic out of the native runtime. If the native runtime cannot start,
//! the same handler is served on the same address by the managed fallback
//! server instead.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::diagnostics::{self, DiagnosticSink, DEFAULT_TAG};
use crate::error::{BridgeError, BridgeResult};
use crate::ffi::{find_library, DetachedRuntime, DynamicRuntime, HandleRegistry, NativeRuntime};
use crate::http::{Fallback, Handler, HyperFallback, Router};

/// Serve `handler` on `addr`, configured from `unit-bridge.toml`.
///
/// With no handler an empty [`Router`] is served, which answers 404.
/// Blocks for as long as the native runtime (or the fallback server) serves.
pub fn serve(addr: &str, handler: Option<Arc<dyn Handler>>) -> BridgeResult<()> {
    let config = BridgeConfig::load_from_cwd()?;
    Bridge::from_config(&config).serve(addr, handler)
}

/// Connects handlers to a native runtime
pub struct Bridge {
    runtime: Arc<dyn NativeRuntime>,
    registry: Arc<HandleRegistry>,
    fallback: Arc<dyn Fallback>,
    fallback_enabled: bool,
    tag: String,
}

impl Bridge {
    /// Bridge to `runtime` using the process-wide registry and the hyper fallback
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self {
            runtime,
            registry: HandleRegistry::global(),
            fallback: Arc::new(HyperFallback::new()),
            fallback_enabled: true,
            tag: DEFAULT_TAG.to_string(),
        }
    }

    /// Build a bridge from configuration.
    ///
    /// A configured library that fails to load is logged and treated like a
    /// runtime that cannot start, so serving continues on the fallback path.
    pub fn from_config(config: &BridgeConfig) -> Self {
        let runtime: Arc<dyn NativeRuntime> = match &config.native.library {
            Some(library) => match load_runtime(config, library) {
                Ok(runtime) => Arc::new(runtime),
                Err(e) => {
                    tracing::warn!("{}; continuing without native runtime", e);
                    Arc::new(DetachedRuntime)
                }
            },
            None => Arc::new(DetachedRuntime),
        };

        let mut fallback = HyperFallback::new();
        if let Some(threads) = config.fallback.worker_threads {
            fallback = fallback.worker_threads(threads);
        }

        Self::new(runtime)
            .with_fallback(fallback)
            .fallback_enabled(config.fallback.enabled)
            .with_tag(config.diagnostics.tag.clone())
    }

    /// Publish handlers in `registry` instead of the process-wide one.
    ///
    /// The exported native entry point only sees the process-wide registry, so
    /// a private registry suits runtimes that dispatch through
    /// [`dispatch`](crate::dispatch::dispatch) themselves.
    pub fn with_registry(mut self, registry: Arc<HandleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fallback(mut self, fallback: impl Fallback + 'static) -> Self {
        self.fallback = Arc::new(fallback);
        self
    }

    /// Whether a native start failure falls back to the managed server
    pub fn fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Tag for messages sent to the native logger
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Serve `handler` through the native runtime, falling back to the managed
    /// server on `addr` if the runtime reports it could not start.
    pub fn serve(&self, addr: &str, handler: Option<Arc<dyn Handler>>) -> BridgeResult<()> {
        let handler = handler.unwrap_or_else(|| Arc::new(Router::new()));

        let status = self.run_native(Arc::clone(&handler));
        if status == 0 {
            return Ok(());
        }

        if !self.fallback_enabled {
            return Err(BridgeError::NativeStart(status));
        }

        tracing::warn!(status, addr, "native runtime did not start; serving with fallback");
        self.fallback.listen_and_serve(addr, handler)
    }

    fn run_native(&self, handler: Arc<dyn Handler>) -> i32 {
        let _sink = ScopedSink::install(
            DiagnosticSink::new(Arc::clone(&self.runtime)).with_tag(self.tag.clone()),
        );
        // published before the token is handed over; withdrawn when dropped
        let guard = self.registry.register_scoped(handler);
        tracing::debug!(handle = %guard.handle(), "entering native runtime");

        let status = self.runtime.run(guard.handle());

        tracing::debug!(handle = %guard.handle(), status, "native runtime returned");
        status
    }
}

fn load_runtime(config: &BridgeConfig, library: &str) -> BridgeResult<DynamicRuntime> {
    let path = find_library(library).unwrap_or_else(|| PathBuf::from(library));
    DynamicRuntime::load_with_symbols(
        path,
        &config.native.run_symbol,
        &config.native.warn_symbol,
    )
}

/// Diagnostic sink installed for one native run; restores the previous sink
struct ScopedSink {
    previous: Option<DiagnosticSink>,
}

impl ScopedSink {
    fn install(sink: DiagnosticSink) -> Self {
        Self {
            previous: diagnostics::install(sink),
        }
    }
}

impl Drop for ScopedSink {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                diagnostics::install(previous);
            }
            None => {
                diagnostics::uninstall();
            }
        }
    }
}
