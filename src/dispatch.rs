//! Native request dispatch.
//!
//! The native runtime calls [`nxt_rust_request_handler`] once per request with
//! the token it was given at startup. The token is resolved against the
//! process-wide [`HandleRegistry`], the request descriptors are turned into an
//! `http::Request`, and the handler's response is handed back through the
//! native writer callback while its buffers are still borrowed.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode, Uri, Version};

use crate::bridge_warn;
use crate::ffi::{
    BufDesc, HandleRegistry, HeaderDesc, RequestDesc, ResponseParts, ResponseWriter,
};
use crate::http::{text_response, RemoteAddr};

/// Response written normally
pub const DISPATCH_OK: i32 = 0;
/// Token does not name a registered handler
pub const DISPATCH_NOT_FOUND: i32 = -1;
/// Request descriptors could not be decoded, or no writer was supplied
pub const DISPATCH_BAD_REQUEST: i32 = -2;
/// Handler panicked; a 500 response was written in its place
pub const DISPATCH_PANIC: i32 = -3;

/// Entry point exported to the native runtime.
///
/// ```c
/// typedef int (*nxt_rust_write_t)(void *ctx, uint16_t status,
///     const nxt_rust_header_t *headers, size_t header_count, nxt_rust_buf_t body);
///
/// int nxt_rust_request_handler(uintptr_t handle, const nxt_rust_request_t *req,
///     void *ctx, nxt_rust_write_t write);
/// ```
///
/// # Safety
///
/// `request` must be null or point to a request descriptor whose buffers stay
/// valid until this call returns. `write` receives `ctx` unchanged and must
/// finish with the response buffers before returning.
#[no_mangle]
pub unsafe extern "C" fn nxt_rust_request_handler(
    handle: usize,
    request: *const RequestDesc<'_>,
    ctx: *mut c_void,
    write: Option<ResponseWriter>,
) -> i32 {
    let Some(write) = write else {
        bridge_warn!("request for handle {} arrived without a writer", handle);
        return DISPATCH_BAD_REQUEST;
    };
    // Safety: caller passes null or a valid descriptor for the call.
    let Some(request) = (unsafe { request.as_ref() }) else {
        bridge_warn!("null request for handle {}", handle);
        return DISPATCH_BAD_REQUEST;
    };

    let registry = HandleRegistry::global();
    let dispatched = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatch(&registry, handle, request, |parts| {
            let headers = if parts.headers.is_empty() {
                std::ptr::null()
            } else {
                parts.headers.as_ptr()
            };
            // Safety: the descriptors borrow the response for this call only.
            unsafe { write(ctx, parts.status, headers, parts.headers.len(), parts.body) }
        })
    }));
    // nothing may unwind into native frames
    dispatched.unwrap_or(DISPATCH_PANIC)
}

/// Resolve `handle`, run its handler on `request`, and pass the response to
/// `write`.
///
/// Returns one of the `DISPATCH_*` codes, or the writer's own nonzero status.
/// Nothing is written when the handle is unknown or the request is malformed.
pub fn dispatch<W>(
    registry: &HandleRegistry,
    handle: usize,
    request: &RequestDesc<'_>,
    write: W,
) -> i32
where
    W: FnOnce(ResponseParts<'_>) -> i32,
{
    let handler = match registry.resolve_raw(handle) {
        Ok(handler) => handler,
        Err(e) => {
            bridge_warn!("{}", e);
            return DISPATCH_NOT_FOUND;
        }
    };

    let request = match decode_request(request) {
        Ok(request) => request,
        Err(reason) => {
            bridge_warn!("rejected request for handle {}: {}", handle, reason);
            return DISPATCH_BAD_REQUEST;
        }
    };

    // the registry lock is already released; the handler may re-enter it
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request)));
    let (response, code) = match outcome {
        Ok(response) => (response, DISPATCH_OK),
        Err(payload) => {
            bridge_warn!(
                "handler {} panicked: {}",
                handle,
                panic_message(&*payload)
            );
            (
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 internal server error\n"),
                DISPATCH_PANIC,
            )
        }
    };

    match write_response(response, write) {
        0 => code,
        rc => rc,
    }
}

fn decode_request(desc: &RequestDesc<'_>) -> Result<Request<Bytes>, String> {
    let method = Method::from_bytes(desc.method().as_bytes())
        .map_err(|_| format!("invalid method {:?}", lossy(desc.method())))?;
    let uri = Uri::try_from(desc.target().as_bytes())
        .map_err(|e| format!("invalid target: {}", e))?;

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .version(decode_version(desc.version()))
        .body(Bytes::copy_from_slice(desc.body().as_bytes()))
        .map_err(|e| e.to_string())?;

    let headers = request.headers_mut();
    for header in desc.headers() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| format!("invalid header name {:?}", lossy(header.name)))?;
        let value = HeaderValue::from_bytes(header.value.as_bytes())
            .map_err(|_| format!("invalid value for header {}", name))?;
        headers.append(name, value);
    }

    if !desc.remote().is_empty() {
        let remote = lossy(desc.remote()).into_owned();
        request.extensions_mut().insert(RemoteAddr(remote));
    }

    Ok(request)
}

fn lossy(buf: BufDesc<'_>) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(buf.as_bytes())
}

fn decode_version(version: BufDesc<'_>) -> Version {
    match version.as_bytes() {
        b"HTTP/0.9" => Version::HTTP_09,
        b"HTTP/1.0" => Version::HTTP_10,
        b"HTTP/2" | b"HTTP/2.0" => Version::HTTP_2,
        b"HTTP/3" | b"HTTP/3.0" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

fn write_response<W>(response: Response<Bytes>, write: W) -> i32
where
    W: FnOnce(ResponseParts<'_>) -> i32,
{
    let (parts, body) = response.into_parts();
    let headers: Vec<HeaderDesc<'_>> = parts
        .headers
        .iter()
        .map(|(name, value)| HeaderDesc::new(name.as_str().as_bytes(), value.as_bytes()))
        .collect();

    write(ResponseParts {
        status: parts.status.as_u16(),
        headers: &headers,
        body: BufDesc::from_bytes(&body),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
