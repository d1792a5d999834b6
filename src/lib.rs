//! A live-reloading development server for single-page apps.
//!
//! `hotserve` fronts a SPA development loop with a single HTTP entry point:
//! it serves the HTML shell and the built JS/CSS bundles straight from disk,
//! forwards configured routes to backend services, and keeps a Server-Sent
//! Events stream open on `/events` through which connected browser tabs are
//! told to reload whenever the bundler finishes a build.
//!
//! # Example
//!
//! ```no_run
//! use hotserve::{Configuration, DevServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let configuration = Configuration::load("config/development.toml".as_ref())?;
//!     DevServer::new(configuration)?.listen().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Routes
//!
//! - `GET /` serves the configured HTML entry file, and doubles as the
//!   fallback for client-side routes.
//! - `GET /<js_target>` and `GET /<css_target>` serve the built bundles,
//!   re-read from disk on every request.
//! - `GET /events` opens the live-reload stream; one
//!   `event: reload` frame is pushed per finished build, whether or not the
//!   build succeeded.
//! - Every configured proxy route is forwarded to its upstream with the
//!   response streamed back.
//!
//! # Rebuild notifications
//!
//! The bundler runs as a child process in watch mode. Its diagnostics are
//! logged for the operator; connected clients only ever learn "something was
//! rebuilt". Signals are not replayed: a tab that connects after a rebuild
//! missed nothing — its next page load already sees the new artifacts.

#![warn(clippy::all, missing_docs, nonstandard_style, future_incompatible)]
#![forbid(unsafe_code)]

mod assets;
mod body;
pub mod bundler;
mod config;
mod error;
mod proxy;
mod reload;
mod router;
mod server;
mod sse;

pub use crate::config::{Configuration, ProxyTarget, ServerConfig};
pub use crate::error::Error;
pub use crate::reload::RebuildNotifier;
pub use crate::server::DevServer;
