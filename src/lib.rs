//! unit-bridge - Rust handlers inside a native application server
//!
//! Lets a Rust HTTP handler be driven by a native (C) application-server
//! runtime loaded into the same process. Handlers never cross the boundary
//! themselves: they are published in a registry and the native side holds
//! only an opaque integer token. Byte buffers cross as `(address, length)`
//! descriptors, without copies.
//!
//! # Features
//!
//! - **Buffer descriptors**: zero-copy `(addr, len)` views tied to the lifetime
//!   of the bytes they describe
//! - **Handle registry**: thread-safe token table, tokens never reused
//! - **Entry point**: [`serve`] blocks inside the native run loop, falling
//!   back to a managed hyper server when no native runtime can start
//! - **Diagnostics**: tagged warnings forwarded to the native logger
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use http::StatusCode;
//! use unit_bridge::{handler_fn, serve, text_response, Router};
//!
//! let router = Router::new().route(
//!     "/",
//!     handler_fn(|_req| text_response(StatusCode::OK, "hello\n")),
//! );
//! serve("127.0.0.1:8080", Some(Arc::new(router))).unwrap();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Rust handler   │  Handler / Router
//! └────────┬────────┘
//!          │ register
//!          ▼
//! ┌─────────────────┐
//! │ HandleRegistry  │  Handle ──► Arc<dyn Handler>
//! └────────┬────────┘
//!          │ token
//!     ┌────┴─────────────┐
//!     ▼                  ▼
//! ┌──────────────┐  ┌──────────────┐
//! │ nxt_rust_run │  │ HyperFallback│  when the native runtime cannot start
//! └──────┬───────┘  └──────────────┘
//!        │ nxt_rust_request_handler(token, request, ctx, write)
//!        ▼
//!    dispatch ──► Handler::handle ──► write(status, headers, body)
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod ffi;
pub mod http;

pub use bridge::{serve, Bridge};
pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use diagnostics::DiagnosticSink;
pub use dispatch::{
    dispatch, nxt_rust_request_handler, DISPATCH_BAD_REQUEST, DISPATCH_NOT_FOUND, DISPATCH_OK,
    DISPATCH_PANIC,
};
pub use error::{BridgeError, BridgeResult};
pub use ffi::{
    BufDesc, DetachedRuntime, DynamicRuntime, Handle, HandleGuard, HandleRegistry, HeaderDesc,
    NativeRuntime, RequestDesc, ResponseParts,
};
pub use crate::http::{
    handler_fn, text_response, Fallback, Handler, HandlerFn, HyperFallback, RemoteAddr, Router,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serializes tests that install a process-wide diagnostic sink
#[cfg(test)]
pub(crate) static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
