//! Managed fallback server.
//!
//! Used when the native runtime cannot start: serves the same handler over
//! plain HTTP/1.1 with hyper, one tokio task per connection. Handlers are
//! synchronous, so each request runs on the blocking pool.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use super::{text_response, Handler, RemoteAddr};
use crate::error::{BridgeError, BridgeResult};

/// Managed server the bridge falls back to.
pub trait Fallback: Send + Sync {
    /// Bind `addr` and serve `handler` until serving fails.
    ///
    /// A bind failure is returned as [`BridgeError::Bind`].
    fn listen_and_serve(&self, addr: &str, handler: Arc<dyn Handler>) -> BridgeResult<()>;
}

impl<F: Fallback + ?Sized> Fallback for Arc<F> {
    fn listen_and_serve(&self, addr: &str, handler: Arc<dyn Handler>) -> BridgeResult<()> {
        (**self).listen_and_serve(addr, handler)
    }
}

/// hyper-based fallback server
#[derive(Debug, Default, Clone)]
pub struct HyperFallback {
    worker_threads: Option<usize>,
}

impl HyperFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the number of runtime worker threads (defaults to one per core)
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    /// Serve on an already-bound listener
    pub fn serve_listener(
        &self,
        listener: std::net::TcpListener,
        handler: Arc<dyn Handler>,
    ) -> BridgeResult<()> {
        listener
            .set_nonblocking(true)
            .map_err(|e| BridgeError::Serve(format!("Failed to configure listener: {}", e)))?;
        self.runtime()?.block_on(async move {
            let listener = TcpListener::from_std(listener)
                .map_err(|e| BridgeError::Serve(format!("Failed to adopt listener: {}", e)))?;
            accept_loop(listener, handler).await
        })
    }

    fn runtime(&self) -> BridgeResult<tokio::runtime::Runtime> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = self.worker_threads {
            builder.worker_threads(threads);
        }
        builder
            .thread_name("unit-bridge-fallback")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Serve(format!("Failed to start runtime: {}", e)))
    }
}

impl Fallback for HyperFallback {
    fn listen_and_serve(&self, addr: &str, handler: Arc<dyn Handler>) -> BridgeResult<()> {
        self.runtime()?.block_on(async move {
            let listener = TcpListener::bind(addr).await.map_err(|source| BridgeError::Bind {
                addr: addr.to_string(),
                source,
            })?;
            accept_loop(listener, handler).await
        })
    }
}

async fn accept_loop(listener: TcpListener, handler: Arc<dyn Handler>) -> BridgeResult<()> {
    let local = listener
        .local_addr()
        .map_err(|e| BridgeError::Serve(format!("Failed to get local address: {}", e)))?;
    tracing::info!("fallback HTTP server listening on {}", local);

    let mut backoff = None;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => {
                backoff = None;
                accepted
            }
            Err(e) if is_transient_accept_error(&e) => {
                let delay = next_backoff(backoff);
                backoff = Some(delay);
                tracing::warn!("Accept error: {}; retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
                continue;
            }
            Err(e) => {
                return Err(BridgeError::Serve(format!(
                    "Failed to accept connection: {}",
                    e
                )))
            }
        };

        let io = TokioIo::new(stream);
        let handler = Arc::clone(&handler);
        let remote = peer.to_string();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let handler = Arc::clone(&handler);
                let remote = remote.clone();
                async move { handle_request(handler, remote, req).await }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("Error serving connection: {}", err);
            }
        });
    }
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Per-process and system-wide descriptor limits, same values on Linux and BSDs
#[cfg(unix)]
const EMFILE: i32 = 24;
#[cfg(unix)]
const ENFILE: i32 = 23;

/// Accept failures that leave the listener usable
fn is_transient_accept_error(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => true,
        #[cfg(unix)]
        _ => matches!(e.raw_os_error(), Some(EMFILE) | Some(ENFILE)),
        #[cfg(not(unix))]
        _ => false,
    }
}

/// Doubles from 5ms, capped at 1s
fn next_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => ACCEPT_BACKOFF_MIN,
        Some(delay) => (delay * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

async fn handle_request(
    handler: Arc<dyn Handler>,
    remote: String,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (mut parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!("Failed to read request body: {}", e);
            return Ok(text_response(StatusCode::BAD_REQUEST, "400 bad request\n").map(Full::new));
        }
    };
    parts.extensions.insert(RemoteAddr(remote));
    let request = Request::from_parts(parts, body);

    match tokio::task::spawn_blocking(move || handler.handle(request)).await {
        Ok(response) => Ok(response.map(Full::new)),
        Err(e) => {
            tracing::error!("Handler failed: {}", e);
            Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 internal server error\n")
                .map(Full::new))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler_fn;

    #[test]
    fn test_bind_failure_is_reported() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = occupied.local_addr().unwrap().to_string();

        let handler: Arc<dyn Handler> =
            Arc::new(handler_fn(|_req| text_response(StatusCode::OK, "unused")));
        let result = HyperFallback::new()
            .worker_threads(1)
            .listen_and_serve(&addr, handler);

        match result {
            Err(BridgeError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected bind error, got {:?}", other),
        }
    }

    #[test]
    fn test_transient_accept_errors() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert!(is_transient_accept_error(&io::Error::from(kind)), "{:?}", kind);
        }
        #[cfg(unix)]
        {
            assert!(is_transient_accept_error(&io::Error::from_raw_os_error(EMFILE)));
            assert!(is_transient_accept_error(&io::Error::from_raw_os_error(ENFILE)));
        }
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
        assert!(!is_transient_accept_error(&io::Error::from(
            io::ErrorKind::InvalidInput
        )));
    }

    #[test]
    fn test_accept_backoff_is_capped() {
        let mut delay = next_backoff(None);
        assert_eq!(delay, Duration::from_millis(5));
        delay = next_backoff(Some(delay));
        assert_eq!(delay, Duration::from_millis(10));
        for _ in 0..20 {
            delay = next_backoff(Some(delay));
        }
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_address_is_bind_error() {
        let handler: Arc<dyn Handler> =
            Arc::new(handler_fn(|_req| text_response(StatusCode::OK, "unused")));
        let result = HyperFallback::new().listen_and_serve("not an address", handler);
        assert!(matches!(result, Err(BridgeError::Bind { .. })));
    }
}
