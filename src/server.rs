//! Server lifecycle: wiring, the accept loop and shutdown.

use std::sync::Arc;
use std::time::Duration;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::assets::StaticFile;
use crate::bundler;
use crate::config::Configuration;
use crate::error::Error;
use crate::proxy::ReverseProxy;
use crate::reload::RebuildNotifier;
use crate::router::{Router, RouteHandler, RouterBuilder};
use crate::sse::ReloadEvents;

/// Route of the live-reload stream.
const EVENTS_ROUTE: &str = "/events";

/// How long shutdown waits for open connections before abandoning them.
/// Idle live-reload streams never finish on their own, so the drain cannot
/// be unbounded.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(3);

/// The development server.
///
/// Construction freezes the routing table from the configuration; [`listen`]
/// then binds the listener, starts the bundler in watch mode and serves
/// until the process is told to stop.
///
/// [`listen`]: DevServer::listen
pub struct DevServer {
    configuration: Configuration,
    router: Router,
    notifier: RebuildNotifier,
}

impl DevServer {
    /// Wire the routing table from the configuration.
    ///
    /// Fails on invalid proxy targets and on any duplicate route
    /// registration, including a proxy route colliding with one of the
    /// built-in bindings.
    pub fn new(configuration: Configuration) -> Result<Self, Error> {
        configuration.validate()?;

        let notifier = RebuildNotifier::new();
        let server = &configuration.server;

        let mut routes = RouterBuilder::new();
        routes.bind(
            "/",
            RouteHandler::Asset(StaticFile::new(server.html_path())),
        )?;
        routes.bind(
            &server.js_route(),
            RouteHandler::Asset(StaticFile::new(server.js_path())),
        )?;
        routes.bind(
            &server.css_route(),
            RouteHandler::Asset(StaticFile::new(server.css_path())),
        )?;
        routes.bind(
            EVENTS_ROUTE,
            RouteHandler::Events(ReloadEvents::new(notifier.clone())),
        )?;

        for target in &configuration.proxies {
            let proxy = Arc::new(ReverseProxy::new(target)?);
            for route in &target.routes {
                routes.bind(route, RouteHandler::Proxy(Arc::clone(&proxy)))?;
            }
        }

        Ok(Self {
            router: routes.build(),
            notifier,
            configuration,
        })
    }

    /// A handle for signaling rebuilds to connected clients.
    ///
    /// The server signals itself through the bundler boundary; this accessor
    /// exists for embedding and tests.
    pub fn notifier(&self) -> RebuildNotifier {
        self.notifier.clone()
    }

    /// Bind the configured address, start the bundler and serve until
    /// shutdown.
    pub async fn listen(self) -> Result<(), Error> {
        let addr = self.configuration.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        let outcomes = bundler::spawn_watch(&self.configuration.server)?;
        tokio::spawn(bundler::forward_events(outcomes, self.notifier.clone()));

        if let Ok(local) = listener.local_addr() {
            info!("listening on http://{local}");
        }
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    ///
    /// Does not start the bundler; callers that want rebuild signals feed
    /// the [`notifier`] themselves. Returns after a shutdown signal once
    /// open connections have drained or the drain timeout has passed.
    ///
    /// [`notifier`]: DevServer::notifier
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        let connections = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let mut shutdown = std::pin::pin!(shutdown_signal());

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            warn!(%error, "failed to accept connection");
                            continue;
                        }
                    };

                    let service = TowerToHyperService::new(self.router.for_peer(peer));
                    let connection = connections
                        .serve_connection(TokioIo::new(stream), service)
                        .into_owned();
                    let connection = graceful.watch(connection);
                    tokio::spawn(async move {
                        if let Err(error) = connection.await {
                            debug!(%error, "connection ended with error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
            }
        }

        drop(listener);
        tokio::select! {
            _ = graceful.shutdown() => {}
            _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
                debug!("drain timed out with connections still open");
            }
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to listen for shutdown signal");
        // Without a working signal handler the server runs until killed.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyTarget, ServerConfig};

    fn configuration(proxies: Vec<ProxyTarget>) -> Configuration {
        Configuration {
            server: ServerConfig {
                host: String::from("127.0.0.1"),
                port: 0,
                source_dir: std::path::PathBuf::from("web/src"),
                build_dir: std::path::PathBuf::from("web/dist"),
                html_entry: String::from("index.html"),
                js_entry: String::from("index.jsx"),
                js_target: String::from("bundle.js"),
                css_target: String::from("bundle.css"),
                jsx_factory: None,
                jsx_fragment: None,
            },
            proxies,
        }
    }

    fn proxy(routes: &[&str]) -> ProxyTarget {
        ProxyTarget {
            protocol: String::from("http"),
            host: String::from("localhost"),
            port: 9000,
            path: String::new(),
            routes: routes.iter().map(|route| String::from(*route)).collect(),
        }
    }

    #[test]
    fn builds_router_from_configuration() {
        let server = DevServer::new(configuration(vec![proxy(&["/api/"])]));
        assert!(server.is_ok());
    }

    #[test]
    fn rejects_proxies_with_identical_routes() {
        let result = DevServer::new(configuration(vec![
            proxy(&["/api/"]),
            proxy(&["/api/"]),
        ]));
        assert!(matches!(
            result,
            Err(Error::RouteConflict { pattern }) if pattern == "/api/"
        ));
    }

    #[test]
    fn rejects_proxy_routes_shadowing_builtin_bindings() {
        let result = DevServer::new(configuration(vec![proxy(&["/events"])]));
        assert!(matches!(result, Err(Error::RouteConflict { .. })));
    }

    #[test]
    fn rejects_invalid_proxy_targets() {
        let mut target = proxy(&["/api/"]);
        target.protocol = String::from("https");

        let result = DevServer::new(configuration(vec![target]));
        assert!(matches!(
            result,
            Err(Error::UnsupportedProxyProtocol { .. })
        ));
    }
}
