//! Call-shape dispatch: the blocking entry points of the bridge.
//!
//! [`GreetingBridge`] exposes one blocking method per RPC shape. Unary calls
//! block on the transport directly; the three streaming shapes go through
//! [`bridge::run`](crate::bridge::run) with the accumulator that matches the
//! shape, and the configured [`ErrorPolicy`] turns the way the stream ended
//! into a [`CallOutcome`].

use crate::{
    bridge::{
        self, Accumulator, Bridged, DriveReport, OpenedCall, ResponseCollector, ResponseSlot,
        WaitPolicy,
    },
    config::{BridgeConfig, ErrorPolicy},
    outcome::{CallOutcome, Completion},
    report::{CallReporter, ThreadContext},
    telemetry,
    transport::{ResponseObserver, Transport},
};
use core::{fmt, time::Duration};
use greeter_core::{
    Error, hello_request_or, hello_requests_or,
    proto::{HelloRequest, HelloResponse},
};
use std::{sync::Arc, time::Instant};

/// The four RPC interaction shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    Unary,
    ServerStream,
    ClientStream,
    Bidirectional,
}

impl CallShape {
    pub fn as_str(self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStream => "server_stream",
            CallShape::ClientStream => "client_stream",
            CallShape::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation, with its request payload.
#[derive(Clone, Debug)]
pub enum Call {
    Unary(HelloRequest),
    ServerStream(HelloRequest),
    ClientStream(Vec<HelloRequest>),
    Bidirectional(Vec<HelloRequest>),
}

impl Call {
    pub fn shape(&self) -> CallShape {
        match self {
            Call::Unary(_) => CallShape::Unary,
            Call::ServerStream(_) => CallShape::ServerStream,
            Call::ClientStream(_) => CallShape::ClientStream,
            Call::Bidirectional(_) => CallShape::Bidirectional,
        }
    }
}

/// Blocking front end over a [`Transport`].
///
/// Every method blocks the calling thread until the call resolves or the
/// configured deadline elapses, and always returns a [`CallOutcome`]. The
/// bridge holds no per-call state, so one instance can be shared by any
/// number of caller threads.
///
/// Callers must not be Tokio runtime worker threads: run them on plain
/// threads or through `spawn_blocking`.
pub struct GreetingBridge<T> {
    transport: T,
    config: BridgeConfig,
    reporter: Option<Arc<dyn CallReporter>>,
}

impl<T: Transport> GreetingBridge<T> {
    pub fn new(transport: T, config: BridgeConfig) -> Self {
        Self {
            transport,
            config,
            reporter: None,
        }
    }

    /// Attaches a reporter that is told about every call as it starts.
    pub fn with_reporter(mut self, reporter: Arc<dyn CallReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Builds a request, falling back to the configured default language.
    pub fn request(&self, name: impl Into<String>, language: Option<&str>) -> HelloRequest {
        hello_request_or(name, language, &self.config.default_language)
    }

    /// Builds one request per name, all in the same language.
    pub fn requests<I, S>(&self, names: I, language: Option<&str>) -> Vec<HelloRequest>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        hello_requests_or(names, language, &self.config.default_language)
    }

    /// Unary greeting. Transport errors are failures under every policy.
    pub fn say_hello(&self, name: &str, language: Option<&str>) -> CallOutcome {
        self.dispatch(Call::Unary(self.request(name, language)))
    }

    /// Server-streaming greeting: one request, every response the peer emits
    /// in emission order.
    pub fn server_stream(&self, name: &str, language: Option<&str>) -> CallOutcome {
        self.dispatch(Call::ServerStream(self.request(name, language)))
    }

    /// Client-streaming greeting: one request per name, at most one response.
    pub fn client_stream<I, S>(&self, names: I, language: Option<&str>) -> CallOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Call::ClientStream(self.requests(names, language)))
    }

    /// Bidirectional greeting: one request per name, every response the peer
    /// emits in emission order.
    pub fn bidirectional<I, S>(&self, names: I, language: Option<&str>) -> CallOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dispatch(Call::Bidirectional(self.requests(names, language)))
    }

    /// Runs `call` to its outcome on the current thread.
    #[tracing::instrument(skip_all, fields(shape = %call.shape()))]
    pub fn dispatch(&self, call: Call) -> CallOutcome {
        let shape = call.shape();
        if let Some(reporter) = &self.reporter {
            reporter.call_started(shape, &ThreadContext::current());
        }
        tracing::info!("Starting call");
        telemetry::increment_calls(shape);

        let start = Instant::now();
        let transport = &self.transport;
        let outcome = match call {
            Call::Unary(request) => self.unary(request),
            Call::ServerStream(request) => {
                self.streaming(shape, ResponseCollector::new(), Vec::new(), |observer| {
                    transport.server_stream(request, observer).into()
                })
            }
            Call::ClientStream(requests) => {
                self.streaming(shape, ResponseSlot::new(), requests, |observer| {
                    transport.client_stream(observer).into()
                })
            }
            Call::Bidirectional(requests) => {
                self.streaming(shape, ResponseCollector::new(), requests, |observer| {
                    transport.bidirectional(observer).into()
                })
            }
        };

        let elapsed = start.elapsed();
        telemetry::record_call_duration(shape, elapsed.as_secs_f64() * 1_000.0);
        telemetry::record_outcome(shape, &outcome);
        tracing::info!(
            outcome = outcome.kind(),
            responses = outcome.responses().len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Call finished"
        );
        outcome
    }

    fn unary(&self, request: HelloRequest) -> CallOutcome {
        match self.transport.unary(request) {
            Ok(response) => CallOutcome::Success {
                responses: vec![response],
                completion: Completion::Completed,
            },
            Err(status) => {
                tracing::error!(
                    code = ?status.code(),
                    "Unary call failed: {}",
                    status.message()
                );
                CallOutcome::Failure(Error::Transport(status))
            }
        }
    }

    fn streaming<A, F>(
        &self,
        shape: CallShape,
        accumulator: A,
        requests: Vec<HelloRequest>,
        open: F,
    ) -> CallOutcome
    where
        A: Accumulator + 'static,
        F: FnOnce(Arc<dyn ResponseObserver>) -> OpenedCall,
    {
        let wait = WaitPolicy {
            deadline: self.config.deadline,
            cancel_on_timeout: self.config.cancel_on_timeout,
        };
        let Bridged {
            responses,
            completion,
            outbound,
        } = bridge::run(shape, accumulator, requests, wait, open);

        if let Some(DriveReport {
            sent,
            failed_at: Some(index),
        }) = outbound
        {
            tracing::warn!(sent, failed_at = index, "Not every request was sent");
        }

        classify(
            shape,
            self.config.error_policy,
            self.config.deadline,
            responses,
            completion,
        )
    }
}

/// Maps how a streaming call ended to its outcome under `policy`.
fn classify(
    shape: CallShape,
    policy: ErrorPolicy,
    deadline: Duration,
    responses: Vec<HelloResponse>,
    completion: Completion,
) -> CallOutcome {
    match (policy, completion) {
        (ErrorPolicy::Strict, Completion::Errored(status)) => {
            CallOutcome::Failure(Error::Transport(status))
        }
        (ErrorPolicy::Strict, Completion::TimedOut) => CallOutcome::TimedOut { after: deadline },
        (_, completion) if shape == CallShape::ClientStream && responses.is_empty() => {
            CallOutcome::Empty { completion }
        }
        (_, completion) => CallOutcome::Success {
            responses,
            completion,
        },
    }
}
