//! tonic-backed [`Transport`].
//!
//! Streaming calls run as tasks on a Tokio runtime supplied by the caller.
//! Each task drives the tonic stream and invokes the observer callbacks from
//! the runtime's worker threads, so callers never poll anything themselves.
//! The request side of a stream is an unbounded MPSC channel: sending only
//! enqueues, and dropping the sender is the half-close.
//!
//! Every task races its call against the [`CallHandle`]'s cancellation token.
//! Cancelling drops the in-flight call, which resets the HTTP/2 stream so the
//! peer stops producing responses nobody is waiting for.

use super::{CallHandle, RequestSink, ResponseObserver, StreamCall, Transport};
use crate::config::BridgeConfig;
use core::future::Future;
use greeter_core::{
    Error, Result,
    proto::{HelloRequest, HelloResponse, greeting_service_client::GreetingServiceClient},
};
use std::sync::Arc;
use tokio::{runtime::Handle, sync::mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{
    Status, Streaming,
    transport::{Channel, Endpoint},
};

/// [`Transport`] over a tonic [`Channel`].
///
/// Cloning is cheap; clones share the underlying HTTP/2 connection.
#[derive(Clone, Debug)]
pub struct GrpcTransport {
    client: GreetingServiceClient<Channel>,
    runtime: Handle,
}

impl GrpcTransport {
    /// Connects to `config.endpoint`, honoring the configured connect timeout
    /// and compression. `runtime` is where call tasks will be spawned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connect`] if the endpoint is not a valid URI or the
    /// connection cannot be established.
    pub async fn connect(config: &BridgeConfig, runtime: Handle) -> Result<Self> {
        let connect_err = |reason: String| Error::Connect {
            endpoint: config.endpoint.clone(),
            reason,
        };

        let channel = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| connect_err(e.to_string()))?
            .connect_timeout(config.connect_timeout)
            .connect()
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        tracing::debug!(endpoint = %config.endpoint, "Connected to greeting service");
        Ok(Self::from_channel(channel, config, runtime))
    }

    /// Blocking variant of [`GrpcTransport::connect`].
    ///
    /// # Errors
    ///
    /// See [`GrpcTransport::connect`].
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context.
    pub fn connect_blocking(config: &BridgeConfig, runtime: Handle) -> Result<Self> {
        runtime.block_on(Self::connect(config, runtime.clone()))
    }

    /// Wraps an existing channel.
    pub fn from_channel(channel: Channel, config: &BridgeConfig, runtime: Handle) -> Self {
        let mut client = GreetingServiceClient::new(channel);
        if let Some(encoding) = config.compression.encoding() {
            client = client.send_compressed(encoding).accept_compressed(encoding);
        }
        Self { client, runtime }
    }

    /// Spawns `call` on the runtime and reports its terminal event to
    /// `observer`, unless `handle` is cancelled first.
    fn spawn_call<F>(&self, handle: &CallHandle, observer: Arc<dyn ResponseObserver>, call: F)
    where
        F: Future<Output = core::result::Result<(), Status>> + Send + 'static,
    {
        let token = handle.token();
        self.runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!("Call cancelled, dropping the stream");
                    observer.on_error(Status::cancelled("Call cancelled by caller"));
                }
                result = call => match result {
                    Ok(()) => observer.on_completed(),
                    Err(status) => observer.on_error(status),
                },
            }
        });
    }
}

/// Forwards every message of `stream` to `observer`, in arrival order.
async fn forward_responses(
    mut stream: Streaming<HelloResponse>,
    observer: &dyn ResponseObserver,
) -> core::result::Result<(), Status> {
    while let Some(response) = stream.message().await? {
        observer.on_next(response);
    }
    Ok(())
}

impl Transport for GrpcTransport {
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; run
    /// blocking callers on their own threads or via `spawn_blocking`.
    fn unary(&self, request: HelloRequest) -> core::result::Result<HelloResponse, Status> {
        let mut client = self.client.clone();
        self.runtime.block_on(async move {
            client
                .say_hello(request)
                .await
                .map(tonic::Response::into_inner)
        })
    }

    fn server_stream(
        &self,
        request: HelloRequest,
        observer: Arc<dyn ResponseObserver>,
    ) -> CallHandle {
        let handle = CallHandle::new();
        let mut client = self.client.clone();
        let inbound = Arc::clone(&observer);

        self.spawn_call(&handle, observer, async move {
            let stream = client.say_hello_server_stream(request).await?.into_inner();
            forward_responses(stream, inbound.as_ref()).await
        });

        handle
    }

    fn client_stream(&self, observer: Arc<dyn ResponseObserver>) -> StreamCall {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CallHandle::new();
        let mut client = self.client.clone();
        let inbound = Arc::clone(&observer);

        self.spawn_call(&handle, observer, async move {
            let response = client
                .say_hello_client_stream(UnboundedReceiverStream::new(rx))
                .await?
                .into_inner();
            inbound.on_next(response);
            Ok(())
        });

        StreamCall {
            sink: Box::new(ChannelSink::new(tx)),
            handle,
        }
    }

    fn bidirectional(&self, observer: Arc<dyn ResponseObserver>) -> StreamCall {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CallHandle::new();
        let mut client = self.client.clone();
        let inbound = Arc::clone(&observer);

        self.spawn_call(&handle, observer, async move {
            let stream = client
                .say_hello_bidirectional(UnboundedReceiverStream::new(rx))
                .await?
                .into_inner();
            forward_responses(stream, inbound.as_ref()).await
        });

        StreamCall {
            sink: Box::new(ChannelSink::new(tx)),
            handle,
        }
    }
}

/// Request side backed by the sender half of the call's request channel.
struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<HelloRequest>>,
}

impl ChannelSink {
    fn new(tx: mpsc::UnboundedSender<HelloRequest>) -> Self {
        Self { tx: Some(tx) }
    }
}

impl RequestSink for ChannelSink {
    fn send(&mut self, request: HelloRequest) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(Error::ChannelError {
                context: "input side already closed".to_string(),
            });
        };

        tx.send(request).map_err(|e| Error::ChannelError {
            context: format!("Request stream closed, dropped request for {}", e.0.name),
        })
    }

    fn close_input(&mut self) {
        // Dropping the last sender ends the request stream.
        self.tx.take();
    }
}
