use core::pin::Pin;
use greeter_bridge::{
    BridgeConfig, CallOutcome, Completion, Compression, ErrorPolicy, GreetingBridge,
    GrpcTransport,
    greeter_core::{
        Error,
        proto::{
            HelloRequest, HelloResponse,
            greeting_service_server::{GreetingService, GreetingServiceServer},
        },
    },
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tokio::{net::TcpListener, runtime::Runtime, sync::mpsc};
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{ReceiverStream, TcpListenerStream},
};
use tonic::{
    Code, Request, Response, Status, Streaming, codec::CompressionEncoding, transport::Server,
};

const STREAM_COUNT: usize = 3;

/// In-process peer with a few names that trigger misbehavior:
///
/// - `fail`: unary and server-streaming calls are rejected
/// - `flaky`: the server stream errors after two greetings
/// - `silent`: the bidirectional stream never answers nor completes
#[derive(Clone, Default)]
struct TestGreeter {
    cancelled: Arc<AtomicBool>,
}

fn greet(message: String) -> HelloResponse {
    HelloResponse {
        message,
        timestamp: "2025-01-01T00:00:00Z".to_string(),
        thread_info: format!("Server Thread: {:?}", thread::current().id()),
    }
}

type GreetingStream = Pin<Box<dyn Stream<Item = Result<HelloResponse, Status>> + Send>>;

#[tonic::async_trait]
impl GreetingService for TestGreeter {
    type SayHelloServerStreamStream = GreetingStream;
    type SayHelloBidirectionalStream = GreetingStream;

    async fn say_hello(
        &self,
        req: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        let req = req.into_inner();
        if req.name == "fail" {
            return Err(Status::unavailable("peer refuses"));
        }
        Ok(Response::new(greet(format!("Hello, {}! [{}]", req.name, req.language))))
    }

    async fn say_hello_server_stream(
        &self,
        req: Request<HelloRequest>,
    ) -> Result<Response<Self::SayHelloServerStreamStream>, Status> {
        let name = req.into_inner().name;
        if name == "fail" {
            return Err(Status::unavailable("peer refuses"));
        }

        let (tx, rx) = mpsc::channel(STREAM_COUNT + 1);
        tokio::spawn(async move {
            for i in 1..=STREAM_COUNT {
                if name == "flaky" && i > 2 {
                    let _ = tx.send(Err(Status::internal("flaky peer"))).await;
                    return;
                }
                let message = format!("Hello, {name}! ({i}/{STREAM_COUNT})");
                if tx.send(Ok(greet(message))).await.is_err() {
                    return;
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn say_hello_client_stream(
        &self,
        req: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<HelloResponse>, Status> {
        let mut stream = req.into_inner();
        let mut names = Vec::new();
        while let Some(request) = stream.message().await? {
            names.push(request.name);
        }
        Ok(Response::new(greet(format!("Hello, {}!", names.join(", ")))))
    }

    async fn say_hello_bidirectional(
        &self,
        req: Request<Streaming<HelloRequest>>,
    ) -> Result<Response<Self::SayHelloBidirectionalStream>, Status> {
        let mut stream = req.into_inner();
        let (tx, rx) = mpsc::channel(8);
        let cancelled = Arc::clone(&self.cancelled);

        tokio::spawn(async move {
            let mut silent = false;
            while let Some(Ok(request)) = stream.next().await {
                if request.name == "silent" {
                    silent = true;
                    continue;
                }
                let message = format!("Hello, {}!", request.name);
                if tx.send(Ok(greet(message))).await.is_err() {
                    return;
                }
            }
            if silent {
                // Hold the response stream open until the client goes away.
                tx.closed().await;
                cancelled.store(true, Ordering::SeqCst);
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

struct Harness {
    runtime: Runtime,
    greeter: TestGreeter,
    endpoint: String,
}

impl Harness {
    fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let greeter = TestGreeter::default();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());

        let service = GreetingServiceServer::new(greeter.clone())
            .send_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Zstd);
        runtime.spawn(
            Server::builder()
                .add_service(service)
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );

        Self {
            runtime,
            greeter,
            endpoint,
        }
    }

    fn config(&self) -> BridgeConfig {
        BridgeConfig::default()
            .with_endpoint(self.endpoint.clone())
            .with_deadline(Duration::from_secs(5))
    }

    fn bridge(&self, config: BridgeConfig) -> GreetingBridge<GrpcTransport> {
        let transport =
            GrpcTransport::connect_blocking(&config, self.runtime.handle().clone()).unwrap();
        GreetingBridge::new(transport, config)
    }
}

fn messages(outcome: &CallOutcome) -> Vec<&str> {
    outcome
        .responses()
        .iter()
        .map(|r| r.message.as_str())
        .collect()
}

#[test]
fn unary_round_trip() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    let outcome = bridge.say_hello("Ada", Some("en"));

    assert!(outcome.is_complete());
    assert_eq!(messages(&outcome), ["Hello, Ada! [en]"]);
    assert!(outcome.single().unwrap().thread_info.starts_with("Server Thread"));
}

#[test]
fn unary_rejection_is_a_transport_failure() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    match bridge.say_hello("fail", None) {
        CallOutcome::Failure(Error::Transport(status)) => {
            assert_eq!(status.code(), Code::Unavailable);
        }
        other => panic!("expected a transport failure, got {other:?}"),
    }
}

#[test]
fn server_stream_arrives_in_order() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    let outcome = bridge.server_stream("Ada", None);

    assert!(outcome.is_complete());
    assert_eq!(
        messages(&outcome),
        ["Hello, Ada! (1/3)", "Hello, Ada! (2/3)", "Hello, Ada! (3/3)"]
    );
}

#[test]
fn server_stream_error_keeps_what_arrived() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    let outcome = bridge.server_stream("flaky", None);

    assert_eq!(messages(&outcome).len(), 2);
    assert!(matches!(
        outcome.completion(),
        Some(Completion::Errored(status)) if status.code() == Code::Internal
    ));
}

#[test]
fn strict_server_stream_error_is_a_failure() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config().with_error_policy(ErrorPolicy::Strict));

    let outcome = bridge.server_stream("flaky", None);
    assert!(matches!(outcome, CallOutcome::Failure(Error::Transport(_))));
}

#[test]
fn client_stream_gets_one_combined_greeting() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    let outcome = bridge.client_stream(["Alice", "Bob", "Charlie"], None);

    assert!(outcome.is_complete());
    assert_eq!(messages(&outcome), ["Hello, Alice, Bob, Charlie!"]);
}

#[test]
fn bidirectional_answers_every_request() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    let outcome = bridge.bidirectional(["A", "B"], None);

    assert!(outcome.is_complete());
    assert_eq!(messages(&outcome), ["Hello, A!", "Hello, B!"]);
}

#[test]
fn silent_peer_times_out_and_the_stream_is_torn_down() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config().with_deadline(Duration::from_millis(300)));

    let start = Instant::now();
    let outcome = bridge.bidirectional(["silent"], None);
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert!(matches!(
        &outcome,
        CallOutcome::Success { responses, completion: Completion::TimedOut } if responses.is_empty()
    ));

    let observed = Instant::now();
    while !harness.greeter.cancelled.load(Ordering::SeqCst) {
        assert!(
            observed.elapsed() < Duration::from_secs(3),
            "peer never saw the stream go away"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn compressed_calls_round_trip() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config().with_compression(Compression::Zstd));

    let outcome = bridge.bidirectional(["A", "B", "C"], Some("de"));
    assert_eq!(messages(&outcome), ["Hello, A!", "Hello, B!", "Hello, C!"]);
}

#[test]
fn concurrent_callers_share_one_transport() {
    let harness = Harness::start();
    let bridge = harness.bridge(harness.config());

    let outcomes: Vec<CallOutcome> = thread::scope(|s| {
        let callers: Vec<_> = (0..8)
            .map(|i| {
                let bridge = &bridge;
                s.spawn(move || bridge.bidirectional([format!("caller-{i}")], None))
            })
            .collect();
        callers.into_iter().map(|c| c.join().unwrap()).collect()
    });

    for (i, outcome) in outcomes.iter().enumerate() {
        assert!(outcome.is_complete());
        assert_eq!(messages(outcome), [format!("Hello, caller-{i}!").as_str()]);
    }
}

#[test]
fn unreachable_endpoint_is_a_connect_error() {
    let runtime = Runtime::new().unwrap();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let config = BridgeConfig::default()
        .with_endpoint(format!("http://{addr}"));

    let err = GrpcTransport::connect_blocking(&config, runtime.handle().clone()).unwrap_err();
    assert!(matches!(err, Error::Connect { .. }));
}
