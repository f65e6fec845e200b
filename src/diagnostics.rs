//! Diagnostic sink into the native runtime's log.
//!
//! Messages are tagged so native log readers can tell which side wrote them.
//! Logging is fire-and-forget: nothing the native logger does can fail or
//! unwind into the caller.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::ffi::{BufDesc, NativeRuntime};

/// Tag prefixed to every message
pub const DEFAULT_TAG: &str = "[rust] ";

/// Tagged writer into a native runtime's logger
#[derive(Clone)]
pub struct DiagnosticSink {
    runtime: Arc<dyn NativeRuntime>,
    tag: String,
}

impl DiagnosticSink {
    pub fn new(runtime: Arc<dyn NativeRuntime>) -> Self {
        Self {
            runtime,
            tag: DEFAULT_TAG.to_string(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Send one message to the native logger
    pub fn warn(&self, message: &str) {
        self.warn_fmt(format_args!("{}", message));
    }

    pub fn warn_fmt(&self, args: fmt::Arguments<'_>) {
        let line = format!("{}{}", self.tag, args);
        let runtime = &self.runtime;
        let logged = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime.log(BufDesc::from_str(&line));
        }));
        if logged.is_err() {
            tracing::debug!("native logger panicked; message dropped");
        }
    }
}

impl fmt::Debug for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticSink")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

static INSTALLED: Lazy<RwLock<Option<DiagnosticSink>>> = Lazy::new(|| RwLock::new(None));

/// Route process-wide diagnostics to `sink`, returning the sink it replaces
pub fn install(sink: DiagnosticSink) -> Option<DiagnosticSink> {
    INSTALLED.write().replace(sink)
}

/// Stop routing diagnostics to the native logger
pub fn uninstall() -> Option<DiagnosticSink> {
    INSTALLED.write().take()
}

/// Currently installed sink, if any
pub fn installed() -> Option<DiagnosticSink> {
    INSTALLED.read().clone()
}

/// Log through the installed sink, or `tracing` when none is installed
pub fn warn(message: &str) {
    warn_fmt(format_args!("{}", message));
}

pub fn warn_fmt(args: fmt::Arguments<'_>) {
    // cloned out so the native call happens without the lock held
    match installed() {
        Some(sink) => sink.warn_fmt(args),
        None => tracing::warn!("{}{}", DEFAULT_TAG, args),
    }
}

/// Format and log a diagnostic through the installed sink.
///
/// ```
/// unit_bridge::bridge_warn!("handler for {} panicked", "/upload");
/// ```
#[macro_export]
macro_rules! bridge_warn {
    ($($arg:tt)*) => {
        $crate::diagnostics::warn_fmt(format_args!($($arg)*))
    };
}
