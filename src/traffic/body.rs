//! Body wrappers feeding chunk notifications into a traffic record.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::traffic::record::TrafficHandle;

/// Request body that reports every data frame the handler consumes.
pub struct InboundBody {
    inner: Body,
    handle: TrafficHandle,
}

impl InboundBody {
    pub fn new(inner: Body, handle: TrafficHandle) -> Self {
        Self { inner, handle }
    }
}

impl HttpBody for InboundBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &poll {
            if let Some(data) = frame.data_ref() {
                this.handle.add_inbound_chunk(data.len() as u64);
            }
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

/// Runs once when the outbound stream is complete.
pub(crate) type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Response body that optionally counts data frames and signals
/// completion exactly once: at end of stream, or when the protocol layer
/// drops the body, whichever happens first.
pub struct OutboundBody {
    inner: Body,
    handle: TrafficHandle,
    count_chunks: bool,
    on_complete: Option<Completion>,
}

impl OutboundBody {
    pub(crate) fn new(inner: Body, handle: TrafficHandle, count_chunks: bool, on_complete: Completion) -> Self {
        Self {
            inner,
            handle,
            count_chunks,
            on_complete: Some(on_complete),
        }
    }

    fn complete(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete();
        }
    }
}

impl HttpBody for OutboundBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(Some(Ok(frame))) => {
                if this.count_chunks {
                    if let Some(data) = frame.data_ref() {
                        this.handle.add_outbound_payload(data.len() as u64);
                    }
                }
            }
            Poll::Ready(None) => this.complete(),
            _ => {}
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

impl Drop for OutboundBody {
    fn drop(&mut self) {
        self.complete();
    }
}
