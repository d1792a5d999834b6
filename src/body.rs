//! The single response body type shared by every handler.
//!
//! Buffered responses, streamed proxy responses and the live-reload event
//! stream all flow through [`ResponseBody`], so the router can present one
//! response type to the connection regardless of which handler ran.

use bytes::Bytes;
use http::{Response, StatusCode};
use http::header::{self, HeaderValue};
use http_body::{Body, Frame, SizeHint};
use http_body_util::Full;
use hyper::body::Incoming;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::BoxError;

use crate::sse::ReloadEventsBody;

pin_project_lite::pin_project! {
    #[project = ResponseBodyProj]
    pub(crate) enum ResponseBody {
        Full { #[pin] inner: Full<Bytes> },
        Upstream { #[pin] inner: Incoming },
        Events { #[pin] inner: ReloadEventsBody },
    }
}

impl ResponseBody {
    pub(crate) fn full(data: impl Into<Bytes>) -> Self {
        ResponseBody::Full {
            inner: Full::new(data.into()),
        }
    }

    pub(crate) fn upstream(inner: Incoming) -> Self {
        ResponseBody::Upstream { inner }
    }

    pub(crate) fn events(inner: ReloadEventsBody) -> Self {
        ResponseBody::Events { inner }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            ResponseBodyProj::Full { inner } => inner.poll_frame(cx).map_err(Into::into),
            ResponseBodyProj::Upstream { inner } => inner.poll_frame(cx).map_err(Into::into),
            ResponseBodyProj::Events { inner } => inner.poll_frame(cx).map_err(Into::into),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ResponseBody::Full { inner } => inner.is_end_stream(),
            ResponseBody::Upstream { inner } => inner.is_end_stream(),
            ResponseBody::Events { inner } => inner.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            ResponseBody::Full { inner } => inner.size_hint(),
            ResponseBody::Upstream { inner } => inner.size_hint(),
            ResponseBody::Events { inner } => inner.size_hint(),
        }
    }
}

/// Build a small plain-text response, used for dispatch misses and handler
/// failure reporting.
pub(crate) fn text_response(status: StatusCode, text: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::full(text.as_bytes()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
