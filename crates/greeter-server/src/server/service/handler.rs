//! gRPC service implementation for the greeting peer.
//!
//! This module defines [`GreeterService`], the concrete implementation of the
//! [`GreetingService`] gRPC service defined in `proto/greeting.proto`.
//!
//! ## Responsibilities
//!
//! - Validate incoming requests (every request must name someone).
//! - Answer each interaction shape: one greeting, a paced stream of greetings,
//!   one combined greeting for a stream of names, or one greeting per name.
//! - Stop in-flight streams when the client goes away or the server shuts
//!   down.

use crate::server::{
    config::ServerConfig,
    service::greeting::{greet, greeting, respond, validate},
    telemetry::{
        decrement_streams_inflight, increment_requests, increment_stream_errors,
        increment_streams_inflight, record_stream_duration,
    },
};
use core::pin::Pin;
use futures::TryStreamExt;
use greeter_core::{
    DEFAULT_LANGUAGE, Error,
    proto::{HelloRequest, HelloResponse, greeting_service_server::GreetingService},
    resolve_language,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

type GreetingStream = Pin<Box<dyn Stream<Item = Result<HelloResponse, Status>> + Send>>;

/// Greeting peer serving all four call shapes.
///
/// Streaming handlers run as spawned tasks feeding a bounded channel; the
/// shared shutdown token lets [`GreeterService::shutdown`] end them early.
#[derive(Clone)]
pub struct GreeterService {
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl GreeterService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ends every in-flight stream with `UNAVAILABLE`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn response_stream(rx: mpsc::Receiver<Result<HelloResponse, Status>>) -> GreetingStream {
        let stream = ReceiverStream::new(rx).inspect_err(|_e| increment_stream_errors());
        Box::pin(stream)
    }
}

fn shutting_down() -> Status {
    Status::unavailable("server shutting down")
}

#[tonic::async_trait]
impl GreetingService for GreeterService {
    type SayHelloServerStreamStream = GreetingStream;
    type SayHelloBidirectionalStream = GreetingStream;

    #[tracing::instrument(skip_all, fields(name = %req.get_ref().name))]
    async fn say_hello(
        &self,
        req: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        increment_requests("say_hello");
        let request = req.into_inner();
        validate(&request).inspect_err(|_| increment_stream_errors())?;

        tracing::info!(language = %request.language, "Greeting");
        Ok(Response::new(respond(greet(&request))))
    }

    /// Emits `stream_count` greetings, `stream_interval` apart.
    #[tracing::instrument(skip_all, fields(name = %req.get_ref().name))]
    async fn say_hello_server_stream(
        &self,
        req: Request<HelloRequest>,
    ) -> Result<Response<Self::SayHelloServerStreamStream>, Status> {
        increment_requests("say_hello_server_stream");
        let request = req.into_inner();
        validate(&request).inspect_err(|_| increment_stream_errors())?;

        let (tx, rx) = mpsc::channel(self.config.stream_buffer_size);
        let count = self.config.stream_count;
        let interval = self.config.stream_interval;
        let shutdown = self.shutdown.clone();
        let start = Instant::now();
        increment_streams_inflight();

        let fut = async move {
            let message = greet(&request);
            for i in 1..=count {
                if i > 1 {
                    tokio::select! {
                        () = shutdown.cancelled() => {
                            let _ = tx.send(Err(shutting_down())).await;
                            break;
                        }
                        () = tokio::time::sleep(interval) => {}
                    }
                }

                let response = respond(format!("{message} ({i}/{count})"));
                if tx.send(Ok(response)).await.is_err() {
                    tracing::debug!(sent = i - 1, "Client went away");
                    break;
                }
            }
            decrement_streams_inflight();
            record_stream_duration("say_hello_server_stream", start.elapsed().as_millis() as f64);
        };
        tokio::spawn(fut.instrument(tracing::info_span!("server_stream")));

        Ok(Response::new(Self::response_stream(rx)))
    }

    /// Collects every name, then greets them all at once in the first
    /// request's language.
    #[tracing::instrument(skip_all)]
    async fn say_hello_client_stream(
        &self,
        req: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<HelloResponse>, Status> {
        increment_requests("say_hello_client_stream");
        let mut stream = req.into_inner();
        let mut names = Vec::new();
        let mut language = None;

        while let Some(request) = stream.message().await? {
            validate(&request).inspect_err(|_| increment_stream_errors())?;
            tracing::debug!(name = %request.name, "Received name");
            language.get_or_insert(request.language);
            names.push(request.name);
        }

        if names.is_empty() {
            increment_stream_errors();
            return Err(Error::InvalidRequest {
                reason: "no names received".to_string(),
            }
            .into());
        }

        let language = resolve_language(language.as_deref(), DEFAULT_LANGUAGE);
        tracing::info!(count = names.len(), "Greeting everyone");
        Ok(Response::new(respond(greeting(&names, language))))
    }

    /// Answers each request as it arrives; completes when the input does.
    #[tracing::instrument(skip_all)]
    async fn say_hello_bidirectional(
        &self,
        req: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<Self::SayHelloBidirectionalStream>, Status> {
        increment_requests("say_hello_bidirectional");
        let mut stream = req.into_inner();
        let (tx, rx) = mpsc::channel(self.config.stream_buffer_size);
        let shutdown = self.shutdown.clone();
        let start = Instant::now();
        increment_streams_inflight();

        let fut = async move {
            loop {
                let request = tokio::select! {
                    () = shutdown.cancelled() => {
                        let _ = tx.send(Err(shutting_down())).await;
                        break;
                    }
                    next = stream.message() => match next {
                        Ok(Some(request)) => request,
                        Ok(None) => break,
                        Err(status) => {
                            tracing::warn!(
                                code = ?status.code(),
                                "Request stream failed: {}",
                                status.message()
                            );
                            break;
                        }
                    },
                };

                let reply = validate(&request)
                    .map(|()| respond(greet(&request)))
                    .map_err(Status::from);
                let rejected = reply.is_err();
                if tx.send(reply).await.is_err() {
                    tracing::debug!("Client went away");
                    break;
                }
                if rejected {
                    break;
                }
            }
            decrement_streams_inflight();
            record_stream_duration("say_hello_bidirectional", start.elapsed().as_millis() as f64);
        };
        tokio::spawn(fut.instrument(tracing::info_span!("bidirectional")));

        Ok(Response::new(Self::response_stream(rx)))
    }
}
