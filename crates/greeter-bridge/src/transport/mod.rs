//! The seam between the blocking bridge and an asynchronous RPC transport.
//!
//! A transport exposes the four greeting RPCs in the shape the bridge drives
//! them: a blocking primitive for unary calls, and callback-driven primitives
//! for everything that streams. Streaming responses are delivered to a
//! [`ResponseObserver`] from threads owned by the transport; outbound requests
//! are pushed through a [`RequestSink`] that never blocks the caller.
//!
//! - [`grpc`] - the tonic implementation used in production.

use greeter_core::{
    Result,
    proto::{HelloRequest, HelloResponse},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

pub mod grpc;

pub use grpc::GrpcTransport;

/// Receives the inbound half of a streaming call.
///
/// Implementations are invoked from transport-owned threads, concurrently with
/// the thread that opened the call, and must not block. For a single call the
/// transport invokes `on_next` in the order the peer emitted responses and
/// ends with at most one of `on_error` / `on_completed`.
pub trait ResponseObserver: Send + Sync {
    /// A response arrived.
    fn on_next(&self, response: HelloResponse);

    /// The stream terminated with an error.
    fn on_error(&self, status: Status);

    /// The stream terminated cleanly.
    fn on_completed(&self);
}

/// The outbound half of a client-streaming or bidirectional call.
pub trait RequestSink: Send {
    /// Queues `request` on the stream without waiting for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelError`](greeter_core::Error::ChannelError) when
    /// the stream no longer accepts input (it was half-closed or torn down).
    fn send(&mut self, request: HelloRequest) -> Result<()>;

    /// Signals end-of-input (half-close). Inbound responses may still arrive.
    /// Calling it more than once has no further effect.
    fn close_input(&mut self);
}

/// Handle used to abort a call that is still in flight.
///
/// Cancelling tears down the underlying stream; the observer then sees a
/// terminal `on_error` with [`tonic::Code::Cancelled`] unless the call had
/// already finished.
#[derive(Clone, Debug, Default)]
pub struct CallHandle {
    token: CancellationToken,
}

impl CallHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that resolves once the call is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// A streaming call whose request side is open.
pub struct StreamCall {
    pub sink: Box<dyn RequestSink>,
    pub handle: CallHandle,
}

/// The RPC primitives the bridge is built on.
pub trait Transport: Send + Sync {
    /// Sends one request and blocks until its single response (or error).
    fn unary(&self, request: HelloRequest) -> core::result::Result<HelloResponse, Status>;

    /// Starts a server-streaming call; responses are delivered to `observer`.
    fn server_stream(&self, request: HelloRequest, observer: Arc<dyn ResponseObserver>)
    -> CallHandle;

    /// Opens a client-streaming call. The peer's final response is delivered
    /// to `observer` once the input side has been closed.
    fn client_stream(&self, observer: Arc<dyn ResponseObserver>) -> StreamCall;

    /// Opens a bidirectional call; both directions run concurrently.
    fn bidirectional(&self, observer: Arc<dyn ResponseObserver>) -> StreamCall;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelling_a_clone_cancels_the_handle() {
        let handle = CallHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());

        clone.cancel();
        assert!(handle.is_cancelled());
        assert!(handle.token().is_cancelled());
    }
}
