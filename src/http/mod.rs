//! HTTP Surface
//!
//! Request handlers and the managed fallback server. Requests and responses
//! are the `http` crate types with fully buffered `Bytes` bodies, the same
//! shape whether a request arrived through the native runtime or through the
//! fallback listener.

mod fallback;
mod router;

use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Request, Response, StatusCode};

pub use fallback::{Fallback, HyperFallback};
pub use router::Router;

/// Request-handling capability published to the native runtime.
///
/// Handlers are called concurrently from native worker threads.
pub trait Handler: Send + Sync {
    fn handle(&self, request: Request<Bytes>) -> Response<Bytes>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        (**self).handle(request)
    }
}

/// Handler backed by a closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync,
{
    fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        (self.f)(request)
    }
}

/// Wrap a closure as a [`Handler`]
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Response<Bytes> + Send + Sync,
{
    HandlerFn { f }
}

/// Peer address attached to request extensions when known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr(pub String);

/// Plain-text response
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
