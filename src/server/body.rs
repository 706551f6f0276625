use axum::body::Body;
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::connection::ConnectionHandle;
use crate::tracker::InFlight;

/// Marks its request finished at end of stream or when dropped.
#[derive(Debug)]
pub struct TrackedBody {
    inner: Body,
    in_flight: Option<InFlight<ConnectionHandle>>,
}

impl TrackedBody {
    pub fn new(inner: Body, in_flight: InFlight<ConnectionHandle>) -> Self {
        Self {
            inner,
            in_flight: Some(in_flight),
        }
    }
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(poll, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.in_flight.take();
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
