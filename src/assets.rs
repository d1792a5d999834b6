//! Single-file static asset handler.

use std::io;
use std::path::{Path, PathBuf};

use http::header::{self, HeaderValue};
use http::{Response, StatusCode};
use tracing::warn;

use crate::body::{text_response, ResponseBody};

/// Serves the bytes of one fixed file.
///
/// The path and content type are resolved once at startup, but the contents
/// are read fresh from disk on every request so a rebuild that replaces the
/// file is visible immediately. Responses carry aggressive no-cache headers;
/// a dev server that lets the browser cache the bundle defeats its purpose.
#[derive(Clone, Debug)]
pub(crate) struct StaticFile {
    path: PathBuf,
    content_type: &'static str,
}

impl StaticFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        let content_type = content_type_for_path(&path);
        Self { path, content_type }
    }

    pub(crate) async fn respond(&self) -> Response<ResponseBody> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return text_response(StatusCode::NOT_FOUND, "not found");
            }
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read asset");
                return text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            }
        };

        let mut response = Response::new(ResponseBody::full(contents));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.content_type),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
        response
    }
}

pub(crate) fn content_type_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") | Some("map") => "application/json; charset=utf-8",
        Some("wasm") => "application/wasm",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        _ => "application/octet-stream",
    }
}
