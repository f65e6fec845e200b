//! Native Runtime Loader
//!
//! Binds the two entry points the bridge consumes from the native
//! application-server library:
//!
//! ```c
//! int  nxt_rust_run(uintptr_t handle);
//! void nxt_rust_warn(uintptr_t addr, uint32_t len);
//! ```

use std::ffi::{c_int, CString};
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use super::registry::Handle;
use super::types::BufDesc;
use crate::error::{BridgeError, BridgeResult};

/// Default symbol for the native run loop
pub const DEFAULT_RUN_SYMBOL: &str = "nxt_rust_run";
/// Default symbol for the native logger
pub const DEFAULT_WARN_SYMBOL: &str = "nxt_rust_warn";

/// Status reported when no native runtime is available
pub const DETACHED_STATUS: i32 = 1;

/// The native side of the bridge.
pub trait NativeRuntime: Send + Sync {
    /// Serve with the handler registered under `handle`.
    ///
    /// Blocks until native serving stops. Returns 0 after a normal run, and a
    /// nonzero status if the runtime could not start.
    fn run(&self, handle: Handle) -> i32;

    /// Hand a diagnostic message to the native logger.
    ///
    /// The descriptor is valid only for the duration of the call.
    fn log(&self, message: BufDesc<'_>);
}

type RunFn = unsafe extern "C" fn(handle: usize) -> c_int;
type WarnFn = unsafe extern "C" fn(addr: usize, len: u32);

/// Native runtime resolved from a shared library at startup
pub struct DynamicRuntime {
    path: PathBuf,
    run: RunFn,
    warn: WarnFn,
    // keeps the code behind `run` and `warn` mapped
    _library: Library,
}

impl DynamicRuntime {
    /// Load a runtime library with the default symbol names
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::load_with_symbols(path, DEFAULT_RUN_SYMBOL, DEFAULT_WARN_SYMBOL)
    }

    /// Load a runtime library, resolving the given entry points
    pub fn load_with_symbols(
        path: impl AsRef<Path>,
        run_symbol: &str,
        warn_symbol: &str,
    ) -> BridgeResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading a library runs its initializers; the configured
        // library is trusted to be the application-server runtime.
        let library = unsafe {
            Library::new(&path).map_err(|e| {
                BridgeError::NativeLoad(format!("'{}': {}", path.display(), e))
            })?
        };

        // Safety: the symbol types match the C declarations above.
        let run = unsafe { *resolve::<RunFn>(&library, &path, run_symbol)? };
        let warn = unsafe { *resolve::<WarnFn>(&library, &path, warn_symbol)? };

        tracing::debug!(
            library = %path.display(),
            run_symbol,
            warn_symbol,
            "native runtime loaded"
        );

        Ok(Self {
            path,
            run,
            warn,
            _library: library,
        })
    }

    /// Path the runtime was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe fn resolve<'l, T>(
    library: &'l Library,
    path: &Path,
    name: &str,
) -> BridgeResult<Symbol<'l, T>> {
    let c_name = CString::new(name)
        .map_err(|_| BridgeError::SymbolNotFound(format!("invalid symbol name: {}", name)))?;
    library.get(c_name.as_bytes_with_nul()).map_err(|e| {
        BridgeError::SymbolNotFound(format!(
            "'{}' in '{}': {}",
            name,
            path.display(),
            e
        ))
    })
}

impl NativeRuntime for DynamicRuntime {
    fn run(&self, handle: Handle) -> i32 {
        // Safety: `run` was resolved from the still-loaded library.
        unsafe { (self.run)(handle.get()) }
    }

    fn log(&self, message: BufDesc<'_>) {
        // the native length is 32 bits; longer messages are cut
        let len = u32::try_from(message.len()).unwrap_or(u32::MAX);
        // Safety: the descriptor borrows live memory for the whole call.
        unsafe { (self.warn)(message.addr(), len) }
    }
}

/// Stand-in used when no native library is configured.
///
/// Every run reports `DETACHED_STATUS`, which sends the bridge down its
/// fallback path; log messages go to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedRuntime;

impl NativeRuntime for DetachedRuntime {
    fn run(&self, handle: Handle) -> i32 {
        tracing::debug!(%handle, "no native runtime attached");
        DETACHED_STATUS
    }

    fn log(&self, message: BufDesc<'_>) {
        tracing::warn!("{}", String::from_utf8_lossy(message.as_bytes()));
    }
}

/// Resolve a configured library name to a file.
///
/// Accepts an existing path, or a bare name searched for as a platform
/// library filename in the current directory and the loader search paths.
pub fn find_library(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.exists() {
        return Some(path.to_path_buf());
    }

    let lib_name = library_filename(name);
    search_paths()
        .into_iter()
        .map(|dir| dir.join(&lib_name))
        .find(|candidate| candidate.exists())
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
            paths.extend(ld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));
        paths.push(PathBuf::from("/usr/lib64"));
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(dyld_path) = std::env::var("DYLD_LIBRARY_PATH") {
            paths.extend(dyld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));
    }

    paths
}

/// Construct the platform-specific library filename
fn library_filename(name: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        if name.starts_with("lib") && name.contains(".so") {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }

    #[cfg(target_os = "macos")]
    {
        if name.starts_with("lib") && name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        name.to_string()
    }
}
