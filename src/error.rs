//! Error type shared by configuration loading and server startup.

use std::io;
use std::path::PathBuf;

/// Errors that abort server startup.
///
/// Everything here is fatal: configuration problems, an unusable listener
/// address, or a bundler that cannot be spawned. Failures that occur while
/// serving (an unreachable proxy upstream, a missing asset file) are never
/// surfaced through this type; they are confined to the response of the
/// request that hit them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration file does not use the expected `.toml` extension.
    #[error("configuration file {path:?} must have a .toml extension")]
    ConfigExtension {
        /// Path that was passed on the command line.
        path: PathBuf,
    },

    /// The configuration file could not be read.
    #[error("failed to read configuration file {path:?}")]
    ConfigRead {
        /// Path that was passed on the command line.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The configuration file is not valid TOML for [`Configuration`].
    ///
    /// [`Configuration`]: crate::Configuration
    #[error("failed to parse configuration file {path:?}")]
    ConfigParse {
        /// Path that was passed on the command line.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },

    /// A proxy target was configured without any routes.
    #[error("proxy target {host}:{port} declares no routes")]
    EmptyProxyRoutes {
        /// Upstream host.
        host: String,
        /// Upstream port.
        port: u16,
    },

    /// A proxy target uses a protocol other than plain HTTP.
    #[error("proxy target {host}:{port} uses unsupported protocol {protocol:?}, only \"http\" upstreams are supported")]
    UnsupportedProxyProtocol {
        /// Configured protocol value.
        protocol: String,
        /// Upstream host.
        host: String,
        /// Upstream port.
        port: u16,
    },

    /// A proxy target's host/port pair does not form a valid authority.
    #[error("invalid proxy target address {authority:?}")]
    InvalidProxyTarget {
        /// The `host:port` string that failed to parse.
        authority: String,
        /// Underlying URI error.
        source: http::uri::InvalidUri,
    },

    /// A route pattern does not start with `/`.
    #[error("route pattern {pattern:?} must start with '/'")]
    InvalidRoutePattern {
        /// The offending pattern.
        pattern: String,
    },

    /// The same route pattern was registered twice.
    #[error("route {pattern:?} is registered twice")]
    RouteConflict {
        /// The pattern that was already bound.
        pattern: String,
    },

    /// The listener could not be bound.
    #[error("failed to bind {addr}")]
    Bind {
        /// The `host:port` address from the configuration.
        addr: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The bundler process could not be started.
    #[error("failed to spawn bundler command {command:?}")]
    BundlerSpawn {
        /// The program name that was invoked.
        command: String,
        /// Underlying I/O error.
        source: io::Error,
    },
}
