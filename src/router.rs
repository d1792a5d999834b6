//! Request routing over an immutable table of path bindings.
//!
//! The table is assembled once at startup through [`RouterBuilder`] and
//! shared read-only with every connection, so dispatch itself needs no
//! synchronization. Patterns are either exact paths (`/events`) or prefixes
//! ending in `/` that match the whole subtree below them; the most specific
//! (longest) matching pattern wins.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body::Body;
use tower::{BoxError, Service};
use tracing::debug;

use crate::assets::StaticFile;
use crate::body::{text_response, ResponseBody};
use crate::error::Error;
use crate::proxy::ReverseProxy;
use crate::sse::ReloadEvents;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum RoutePattern {
    Exact(String),
    Prefix(String),
}

impl RoutePattern {
    pub(crate) fn parse(raw: &str) -> Result<Self, Error> {
        if !raw.starts_with('/') {
            return Err(Error::InvalidRoutePattern {
                pattern: raw.to_owned(),
            });
        }
        if raw.ends_with('/') {
            Ok(RoutePattern::Prefix(raw.to_owned()))
        } else {
            Ok(RoutePattern::Exact(raw.to_owned()))
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(pattern) => path == pattern,
            // A prefix also answers for the path without its trailing slash,
            // so "/api/" covers a request for "/api".
            RoutePattern::Prefix(pattern) => {
                path.starts_with(pattern.as_str()) || pattern[..pattern.len() - 1] == *path
            }
        }
    }

    fn specificity(&self) -> usize {
        self.as_str().len()
    }

    fn as_str(&self) -> &str {
        match self {
            RoutePattern::Exact(pattern) | RoutePattern::Prefix(pattern) => pattern,
        }
    }
}

/// One registered way of answering requests.
pub(crate) enum RouteHandler {
    Asset(StaticFile),
    Events(ReloadEvents),
    Proxy(Arc<ReverseProxy>),
}

impl RouteHandler {
    async fn respond<B>(&self, request: Request<B>, peer: Option<SocketAddr>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match self {
            RouteHandler::Asset(file) => file.respond().await,
            RouteHandler::Events(events) => events.respond(),
            RouteHandler::Proxy(proxy) => proxy.forward(request, peer).await,
        }
    }
}

struct RouteBinding {
    pattern: RoutePattern,
    handler: RouteHandler,
}

/// Collects route bindings and rejects duplicates before the table is
/// frozen.
pub(crate) struct RouterBuilder {
    routes: Vec<RouteBinding>,
}

impl RouterBuilder {
    pub(crate) fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Bind a handler to a pattern. Registering the identical pattern twice
    /// is a configuration error, never a silent override.
    pub(crate) fn bind(&mut self, pattern: &str, handler: RouteHandler) -> Result<&mut Self, Error> {
        let pattern = RoutePattern::parse(pattern)?;
        if self
            .routes
            .iter()
            .any(|binding| binding.pattern.as_str() == pattern.as_str())
        {
            return Err(Error::RouteConflict {
                pattern: pattern.as_str().to_owned(),
            });
        }

        self.routes.push(RouteBinding { pattern, handler });
        Ok(self)
    }

    pub(crate) fn build(self) -> Router {
        Router {
            table: Arc::new(RouteTable {
                routes: self.routes,
            }),
            peer: None,
        }
    }
}

struct RouteTable {
    routes: Vec<RouteBinding>,
}

impl RouteTable {
    fn best_match(&self, path: &str) -> Option<&RouteBinding> {
        self.routes
            .iter()
            .filter(|binding| binding.pattern.matches(path))
            .max_by_key(|binding| binding.pattern.specificity())
    }

    async fn dispatch<B>(&self, request: Request<B>, peer: Option<SocketAddr>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match self.best_match(request.uri().path()) {
            Some(binding) => {
                debug!(
                    method = %request.method(),
                    path = request.uri().path(),
                    route = binding.pattern.as_str(),
                    "dispatch"
                );
                binding.handler.respond(request, peer).await
            }
            None => text_response(StatusCode::NOT_FOUND, "not found"),
        }
    }
}

/// The routing service handed to each accepted connection.
///
/// Cloning is cheap; all clones share one frozen table. Dispatch never
/// blocks the router itself: a handler that suspends (the live-reload
/// stream) only parks its own connection's task.
#[derive(Clone)]
pub(crate) struct Router {
    table: Arc<RouteTable>,
    peer: Option<SocketAddr>,
}

impl Router {
    /// A clone of this router that attributes requests to `peer`.
    pub(crate) fn for_peer(&self, peer: SocketAddr) -> Self {
        Self {
            table: Arc::clone(&self.table),
            peer: Some(peer),
        }
    }
}

impl<B> Service<Request<B>> for Router
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let table = Arc::clone(&self.table);
        let peer = self.peer;
        Box::pin(async move { Ok(table.dispatch(request, peer).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reload::RebuildNotifier;
    use http_body_util::{BodyExt, Empty};

    fn events_handler() -> RouteHandler {
        RouteHandler::Events(ReloadEvents::new(RebuildNotifier::new()))
    }

    fn request(path: &str) -> Request<Empty<Bytes>> {
        Request::builder().uri(path).body(Empty::new()).unwrap()
    }

    #[test]
    fn parses_exact_and_prefix_patterns() {
        assert_eq!(
            RoutePattern::parse("/events").unwrap(),
            RoutePattern::Exact(String::from("/events"))
        );
        assert_eq!(
            RoutePattern::parse("/api/").unwrap(),
            RoutePattern::Prefix(String::from("/api/"))
        );
        assert!(matches!(
            RoutePattern::parse("events"),
            Err(Error::InvalidRoutePattern { .. })
        ));
    }

    #[test]
    fn prefix_patterns_match_their_subtree() {
        let pattern = RoutePattern::parse("/api/").unwrap();
        assert!(pattern.matches("/api/"));
        assert!(pattern.matches("/api/widgets"));
        assert!(pattern.matches("/api"));
        assert!(!pattern.matches("/apiary"));

        let root = RoutePattern::parse("/").unwrap();
        assert!(root.matches("/"));
        assert!(root.matches("/anything/else"));
    }

    #[test]
    fn exact_patterns_do_not_match_suffixes() {
        let pattern = RoutePattern::parse("/events").unwrap();
        assert!(pattern.matches("/events"));
        assert!(!pattern.matches("/events/other"));
        assert!(!pattern.matches("/event"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = RouterBuilder::new();
        builder.bind("/events", events_handler()).unwrap();

        let result = builder.bind("/events", events_handler());
        assert!(matches!(
            result,
            Err(Error::RouteConflict { pattern }) if pattern == "/events"
        ));
    }

    #[tokio::test]
    async fn most_specific_pattern_wins() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("index.html");
        std::fs::write(&html, "shell").unwrap();

        let mut builder = RouterBuilder::new();
        builder
            .bind("/", RouteHandler::Asset(StaticFile::new(html)))
            .unwrap();
        builder.bind("/events", events_handler()).unwrap();

        let mut router = builder.build();

        // The exact binding beats the catch-all prefix.
        let response = router.call(request("/events")).await.unwrap();
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        // Anything else falls through to the root binding.
        let response = router.call(request("/client/side/route")).await.unwrap();
        let collected = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(collected, "shell");
    }

    #[tokio::test]
    async fn unmatched_paths_are_not_found() {
        let mut builder = RouterBuilder::new();
        builder.bind("/events", events_handler()).unwrap();
        let mut router = builder.build();

        let response = router.call(request("/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
