//! Path router used as the default handler.

use std::sync::Arc;

use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderValue, Request, Response, StatusCode};

use super::{text_response, Handler};

/// Routes requests by path.
///
/// A pattern ending in `/` matches every path under it; any other pattern
/// matches only that exact path. The longest matching pattern wins, so `"/"`
/// acts as a catch-all. Unmatched requests get a 404.
///
/// A request for `/dir` when only the subtree `/dir/` is registered is
/// answered with a 301 to `/dir/`, query string kept, ahead of any other
/// match such as the catch-all.
#[derive(Default, Clone)]
pub struct Router {
    routes: Vec<(String, Arc<dyn Handler>)>,
}

impl Router {
    /// An empty router; answers every request with 404
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route, replacing any handler already bound to `pattern`
    pub fn route(mut self, pattern: impl Into<String>, handler: impl Handler + 'static) -> Self {
        let pattern = pattern.into();
        let handler: Arc<dyn Handler> = Arc::new(handler);
        match self.routes.iter_mut().find(|(p, _)| *p == pattern) {
            Some(entry) => entry.1 = handler,
            None => self.routes.push((pattern, handler)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn has_pattern(&self, pattern: &str) -> bool {
        self.routes.iter().any(|(p, _)| p == pattern)
    }

    /// Location to redirect a bare subtree path to, if any
    fn subtree_redirect(&self, request: &Request<Bytes>) -> Option<String> {
        let path = request.uri().path();
        if path.ends_with('/') || self.has_pattern(path) {
            return None;
        }
        let subtree = format!("{}/", path);
        if !self.has_pattern(&subtree) {
            return None;
        }
        Some(match request.uri().query() {
            Some(query) => format!("{}?{}", subtree, query),
            None => subtree,
        })
    }

    fn lookup(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        self.routes
            .iter()
            .filter(|(pattern, _)| matches(pattern, path))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, handler)| handler)
    }
}

fn matches(pattern: &str, path: &str) -> bool {
    if pattern.ends_with('/') {
        path.starts_with(pattern)
    } else {
        path == pattern
    }
}

impl Handler for Router {
    fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        if let Some(location) = self.subtree_redirect(&request) {
            let mut response =
                text_response(StatusCode::MOVED_PERMANENTLY, "Moved Permanently\n");
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers_mut().insert(LOCATION, value);
            }
            return response;
        }
        match self.lookup(request.uri().path()) {
            Some(handler) => handler.handle(request),
            None => text_response(StatusCode::NOT_FOUND, "404 page not found\n"),
        }
    }
}
