//! FFI Module
//!
//! The seam between Rust handlers and the native application-server runtime.
//!
//! # Architecture
//!
//! ```text
//! serve(addr, handler)
//!       │
//!       ▼
//! HandleRegistry::register ──► Handle (token, never 0)
//!       │
//!       ▼
//! NativeRuntime::run(handle)          nxt_rust_run(uintptr_t)
//!       │
//!       ▼   per request, on native worker threads
//! nxt_rust_request_handler(handle, RequestDesc, ctx, write)
//!       │
//!       ▼
//! HandleRegistry::resolve ──► Handler::handle ──► write(status, headers, body)
//! ```
//!
//! Buffers cross the boundary as [`BufDesc`] `(address, length)` pairs and are
//! never copied by the bridge itself.

mod loader;
mod registry;
mod types;

pub use loader::{
    find_library, DetachedRuntime, DynamicRuntime, NativeRuntime, DEFAULT_RUN_SYMBOL,
    DEFAULT_WARN_SYMBOL, DETACHED_STATUS,
};
pub use registry::{Handle, HandleGuard, HandleRegistry};
pub use types::{bytes_from_raw, BufDesc, HeaderDesc, RequestDesc, ResponseParts, ResponseWriter};
