//! The live-reload event stream.
//!
//! `GET /events` responds with a `text/event-stream` body that stays open
//! for the life of the connection and emits one reload event per rebuild
//! signal. The body is the interesting part: it suspends on the notifier
//! subscription and ends when the client goes away or the server shuts down.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::Response;
use http_body::{Body, Frame};
use tokio::sync::broadcast;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::body::ResponseBody;
use crate::reload::RebuildNotifier;

/// Event frame pushed to clients on every rebuild.
const RELOAD_FRAME: &[u8] = b"event: reload\ndata: succ\n\n";

/// Comment frame written once after the stream opens.
const CONNECTED_FRAME: &[u8] = b": connected\n\n";

/// Comment frame written after a stretch of silence.
///
/// Keep-alive comments prevent proxies and browsers from considering the
/// stream idle.
const KEEP_ALIVE_FRAME: &[u8] = b": keep-alive\n\n";

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Handler for the live-reload stream route.
#[derive(Clone, Debug)]
pub(crate) struct ReloadEvents {
    notifier: RebuildNotifier,
}

impl ReloadEvents {
    pub(crate) fn new(notifier: RebuildNotifier) -> Self {
        Self { notifier }
    }

    /// Open a stream for one client. The subscription is taken here, before
    /// the response is handed to the connection, so a signal racing the
    /// handshake is not lost.
    pub(crate) fn respond(&self) -> Response<ResponseBody> {
        let body = ReloadEventsBody::new(self.notifier.subscribe());

        let mut response = Response::new(ResponseBody::events(body));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        response
    }
}

/// Response body of one live-reload stream.
///
/// Yields a greeting comment, then suspends on the notifier subscription:
/// one reload frame per signal, a keep-alive comment per
/// [`KEEP_ALIVE_INTERVAL`] of silence. The stream ends when every notifier
/// handle is gone; a disconnecting client simply drops the body.
pub(crate) struct ReloadEventsBody {
    signals: BroadcastStream<()>,
    keep_alive: Interval,
    greeted: bool,
}

impl ReloadEventsBody {
    pub(crate) fn new(receiver: broadcast::Receiver<()>) -> Self {
        let start = time::Instant::now() + KEEP_ALIVE_INTERVAL;
        let mut keep_alive = time::interval_at(start, KEEP_ALIVE_INTERVAL);
        keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            signals: BroadcastStream::new(receiver),
            keep_alive,
            greeted: false,
        }
    }

    fn frame(data: &'static [u8]) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(data)))))
    }
}

impl Body for ReloadEventsBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if !this.greeted {
            this.greeted = true;
            return Self::frame(CONNECTED_FRAME);
        }

        match Pin::new(&mut this.signals).poll_next(cx) {
            Poll::Ready(Some(Ok(()))) => {
                this.keep_alive.reset();
                return Self::frame(RELOAD_FRAME);
            }
            // A lagged receiver coalesces the missed signals into one frame.
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => {
                this.keep_alive.reset();
                return Self::frame(RELOAD_FRAME);
            }
            // All senders gone: the server is shutting down.
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }

        match this.keep_alive.poll_tick(cx) {
            Poll::Ready(_) => Self::frame(KEEP_ALIVE_FRAME),
            Poll::Pending => Poll::Pending,
        }
    }
}
