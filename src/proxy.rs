//! Reverse proxy adapter for configured upstream services.
//!
//! A [`ReverseProxy`] rewrites matching requests onto its upstream authority
//! and relays the answer. Both directions stream: the request body is handed
//! to the client connector as-is and the upstream response body is returned
//! to the caller unread.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::uri::{Authority, Scheme, Uri};
use http::{Request, Response, StatusCode};
use http_body::Body;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::BoxError;
use tracing::warn;

use crate::body::{text_response, ResponseBody};
use crate::config::ProxyTarget;
use crate::error::Error;

type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Forwards requests to one upstream service.
///
/// One instance exists per configured target; several route patterns may
/// share it. Each request is attempted exactly once, and an unreachable
/// upstream turns into a 502 for that request alone.
pub(crate) struct ReverseProxy {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    client: Client<HttpConnector, ProxyBody>,
}

impl std::fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("scheme", &self.scheme)
            .field("authority", &self.authority)
            .field("base_path", &self.base_path)
            .field("client", &"...")
            .finish()
    }
}

impl ReverseProxy {
    pub(crate) fn new(target: &ProxyTarget) -> Result<Self, Error> {
        let authority = format!("{}:{}", target.host, target.port);
        let authority: Authority =
            authority
                .parse()
                .map_err(|source| Error::InvalidProxyTarget {
                    authority: format!("{}:{}", target.host, target.port),
                    source,
                })?;

        Ok(Self {
            scheme: Scheme::HTTP,
            authority,
            base_path: target.path.clone(),
            client: Client::builder(TokioExecutor::new()).build_http(),
        })
    }

    pub(crate) async fn forward<B>(
        &self,
        request: Request<B>,
        peer: Option<SocketAddr>,
    ) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = request.into_parts();

        parts.uri = match self.upstream_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(error) => {
                warn!(%error, "failed to rewrite request for upstream");
                return text_response(StatusCode::BAD_GATEWAY, "bad gateway");
            }
        };

        strip_hop_by_hop(&mut parts.headers);
        if let Some(peer) = peer {
            append_forwarded_for(&mut parts.headers, peer.ip());
        }

        let request = Request::from_parts(parts, body.map_err(Into::into).boxed_unsync());
        match self.client.request(request).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, ResponseBody::upstream(body))
            }
            Err(error) => {
                warn!(upstream = %self.authority, %error, "upstream request failed");
                text_response(StatusCode::BAD_GATEWAY, "bad gateway")
            }
        }
    }

    fn upstream_uri(&self, uri: &Uri) -> Result<Uri, http::Error> {
        let path = single_joining_slash(&self.base_path, uri.path());
        let path_and_query = match uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

fn single_joining_slash(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Drop connection-scoped headers before relaying in either direction.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // The Connection header may name additional hop-by-hop headers.
    let named: Vec<String> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in named {
        headers.remove(name);
    }

    for name in [
        http::header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        http::header::PROXY_AUTHENTICATE,
        http::header::PROXY_AUTHORIZATION,
        http::header::TE,
        http::header::TRAILER,
        http::header::TRANSFER_ENCODING,
        http::header::UPGRADE,
    ] {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let value = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
    {
        Some(prior) => format!("{prior}, {peer}"),
        None => peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
