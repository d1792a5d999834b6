//! Server configuration.
//!
//! The configuration is a TOML document with a `[server]` table and zero or
//! more `[[proxies]]` entries. It is loaded once at startup and never
//! mutated afterwards; every component reads from the same immutable copy.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Error;

/// Top-level configuration: the server itself plus its proxy targets.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Listener address, directories and entry-point names.
    pub server: ServerConfig,
    /// Upstream services selected routes are forwarded to.
    #[serde(default)]
    pub proxies: Vec<ProxyTarget>,
}

/// Core server settings: where to listen, where sources and build artifacts
/// live, and which files make up the application shell.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the application sources.
    pub source_dir: PathBuf,
    /// Directory the bundler writes build artifacts into.
    pub build_dir: PathBuf,
    /// HTML shell inside `source_dir`, served at `/`.
    pub html_entry: String,
    /// Bundler entry point inside `source_dir`.
    pub js_entry: String,
    /// Bundled JavaScript file name inside `build_dir`, served at `/<js_target>`.
    pub js_target: String,
    /// Bundled stylesheet file name inside `build_dir`, served at `/<css_target>`.
    pub css_target: String,
    /// Factory function the bundler compiles JSX-like elements to.
    #[serde(default)]
    pub jsx_factory: Option<String>,
    /// Fragment expression the bundler compiles JSX-like fragments to.
    #[serde(default)]
    pub jsx_fragment: Option<String>,
}

/// A single upstream service and the routes forwarded to it.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyTarget {
    /// Upstream protocol. Only `"http"` is supported.
    pub protocol: String,
    /// Upstream host.
    pub host: String,
    /// Upstream port.
    pub port: u16,
    /// Base path prepended to forwarded request paths.
    #[serde(default)]
    pub path: String,
    /// Route patterns handled by this target. Patterns ending in `/` match
    /// the whole subtree below them.
    pub routes: Vec<String>,
}

fn default_host() -> String {
    String::from("127.0.0.1")
}

fn default_port() -> u16 {
    8000
}

impl Configuration {
    /// Read and validate a configuration file.
    ///
    /// The file must carry a `.toml` extension; anything unreadable,
    /// unparsable or semantically invalid is a fatal startup error.
    pub fn load(path: &Path) -> Result<Self, Error> {
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            return Err(Error::ConfigExtension {
                path: path.to_path_buf(),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let configuration: Configuration =
            toml::from_str(&raw).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        configuration.validate()?;
        Ok(configuration)
    }

    /// Check the parts of the configuration that TOML deserialization alone
    /// cannot reject.
    pub fn validate(&self) -> Result<(), Error> {
        for proxy in &self.proxies {
            proxy.validate()?;
        }
        Ok(())
    }

    pub(crate) fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerConfig {
    pub(crate) fn html_path(&self) -> PathBuf {
        self.source_dir.join(&self.html_entry)
    }

    pub(crate) fn js_path(&self) -> PathBuf {
        self.build_dir.join(&self.js_target)
    }

    pub(crate) fn css_path(&self) -> PathBuf {
        self.build_dir.join(&self.css_target)
    }

    pub(crate) fn js_route(&self) -> String {
        target_route(&self.js_target)
    }

    pub(crate) fn css_route(&self) -> String {
        target_route(&self.css_target)
    }
}

impl ProxyTarget {
    fn validate(&self) -> Result<(), Error> {
        if self.protocol != "http" {
            return Err(Error::UnsupportedProxyProtocol {
                protocol: self.protocol.clone(),
                host: self.host.clone(),
                port: self.port,
            });
        }
        if self.routes.is_empty() {
            return Err(Error::EmptyProxyRoutes {
                host: self.host.clone(),
                port: self.port,
            });
        }
        Ok(())
    }
}

fn target_route(target: &str) -> String {
    format!("/{}", target.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
        [server]
        host = "0.0.0.0"
        port = 3000
        source_dir = "web/src"
        build_dir = "web/dist"
        html_entry = "index.html"
        js_entry = "index.jsx"
        js_target = "bundle.js"
        css_target = "bundle.css"
        jsx_factory = "h"
        jsx_fragment = "Fragment"

        [[proxies]]
        protocol = "http"
        host = "localhost"
        port = 9000
        path = ""
        routes = ["/api/"]
    "#;

    #[test]
    fn parses_full_configuration() {
        let configuration: Configuration = toml::from_str(EXAMPLE).unwrap();
        configuration.validate().unwrap();

        assert_eq!(configuration.server.port, 3000);
        assert_eq!(configuration.server.js_route(), "/bundle.js");
        assert_eq!(configuration.server.css_route(), "/bundle.css");
        assert_eq!(
            configuration.server.html_path(),
            PathBuf::from("web/src/index.html")
        );
        assert_eq!(
            configuration.server.js_path(),
            PathBuf::from("web/dist/bundle.js")
        );
        assert_eq!(configuration.proxies.len(), 1);
        assert_eq!(configuration.proxies[0].routes, vec!["/api/"]);
    }

    #[test]
    fn host_and_port_default_when_omitted() {
        let configuration: Configuration = toml::from_str(
            r#"
            [server]
            source_dir = "src"
            build_dir = "dist"
            html_entry = "index.html"
            js_entry = "index.jsx"
            js_target = "bundle.js"
            css_target = "bundle.css"
            "#,
        )
        .unwrap();

        assert_eq!(configuration.server.host, "127.0.0.1");
        assert_eq!(configuration.server.port, 8000);
        assert!(configuration.proxies.is_empty());
        assert_eq!(configuration.server.jsx_factory, None);
    }

    #[test]
    fn rejects_unknown_keys() {
        let result: Result<Configuration, _> = toml::from_str(
            r#"
            [server]
            source_dir = "src"
            build_dir = "dist"
            html_entry = "index.html"
            js_entry = "index.jsx"
            js_target = "bundle.js"
            css_target = "bundle.css"
            htlm_entry = "typo.html"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_non_http_proxy_protocol() {
        let mut configuration: Configuration = toml::from_str(EXAMPLE).unwrap();
        configuration.proxies[0].protocol = String::from("https");

        assert!(matches!(
            configuration.validate(),
            Err(Error::UnsupportedProxyProtocol { .. })
        ));
    }

    #[test]
    fn rejects_proxy_without_routes() {
        let mut configuration: Configuration = toml::from_str(EXAMPLE).unwrap();
        configuration.proxies[0].routes.clear();

        assert!(matches!(
            configuration.validate(),
            Err(Error::EmptyProxyRoutes { .. })
        ));
    }

    #[test]
    fn load_rejects_wrong_extension() {
        let mut file = tempfile::Builder::new()
            .suffix(".yml")
            .tempfile()
            .unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        assert!(matches!(
            Configuration::load(file.path()),
            Err(Error::ConfigExtension { .. })
        ));
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let configuration = Configuration::load(file.path()).unwrap();
        assert_eq!(configuration.server.host, "0.0.0.0");
    }
}
