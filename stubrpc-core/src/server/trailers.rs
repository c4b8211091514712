use crate::context::OutboundTrailers;
use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use tonic::{Status, body::Body};

/// Adds the call's published trailers to a gRPC response.
///
/// A trailers-only response (error before any message) carries them in its headers, any
/// other response in its final trailers frame.
pub(crate) fn attach_trailers(
    response: http::Response<Body>,
    trailers: OutboundTrailers,
) -> http::Response<Body> {
    let (mut parts, body) = response.into_parts();

    if parts.headers.contains_key("grpc-status") {
        if let Some(extra) = trailers.take() {
            merge(&mut parts.headers, extra.to_metadata().into_headers());
        }
        return http::Response::from_parts(parts, body);
    }

    http::Response::from_parts(parts, Body::new(TrailersBody::new(body, trailers)))
}

fn merge(target: &mut HeaderMap, extra: HeaderMap) {
    for (name, value) in extra.iter() {
        target.append(name.clone(), value.clone());
    }
}

/// Wraps a response body and merges the published trailers into its trailers frame.
struct TrailersBody {
    inner: Body,
    trailers: OutboundTrailers,
    done: bool,
}

impl TrailersBody {
    fn new(inner: Body, trailers: OutboundTrailers) -> Self {
        Self {
            inner,
            trailers,
            done: false,
        }
    }

    fn extra(&self) -> Option<HeaderMap> {
        self.trailers
            .take()
            .filter(|headers| !headers.is_empty())
            .map(|headers| headers.to_metadata().into_headers())
    }
}

impl HttpBody for TrailersBody {
    type Data = Bytes;
    type Error = Status;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.done {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut self.inner).poll_frame(cx)) {
            Some(Ok(frame)) => match frame.into_trailers() {
                Ok(mut trailers) => {
                    if let Some(extra) = self.extra() {
                        merge(&mut trailers, extra);
                    }
                    Poll::Ready(Some(Ok(Frame::trailers(trailers))))
                }
                Err(frame) => Poll::Ready(Some(Ok(frame))),
            },
            Some(Err(status)) => Poll::Ready(Some(Err(status))),
            None => {
                self.done = true;
                Poll::Ready(self.extra().map(|extra| Ok(Frame::trailers(extra))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
