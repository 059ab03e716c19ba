//! The async-to-sync adapter shared by every streaming call shape.
//!
//! A streaming call is bridged by pairing an [`Accumulator`] with a
//! [`CompletionSignal`] behind one [`ResponseObserver`]: responses go into the
//! accumulator, the terminal event fires the signal, and the blocking caller
//! waits on the signal before draining the accumulator. The shapes differ only
//! in which accumulator they use and whether requests are pushed outbound, so
//! [`run`] is the single place where waiting, timeouts and cancellation are
//! handled.
//!
//! - [`signal`] - the one-shot completion latch.
//! - [`collector`] - ordered collector and last-write-wins slot.
//! - [`driver`] - the outbound request driver.

pub mod collector;
pub mod driver;
pub mod signal;

pub use collector::{Accumulator, ResponseCollector, ResponseSlot};
pub use driver::{DriveReport, drive_requests};
pub use signal::{CompletionSignal, Termination};

use crate::{
    dispatch::CallShape,
    outcome::Completion,
    transport::{CallHandle, RequestSink, ResponseObserver, StreamCall},
};
use greeter_core::proto::{HelloRequest, HelloResponse};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tonic::Status;

/// Observer that feeds an accumulator and fires a completion signal.
pub struct StreamBridge<A> {
    shape: CallShape,
    accumulator: A,
    signal: CompletionSignal,
}

impl<A: Accumulator> StreamBridge<A> {
    pub fn new(shape: CallShape, accumulator: A) -> Self {
        Self {
            shape,
            accumulator,
            signal: CompletionSignal::new(),
        }
    }

    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    pub fn accumulator(&self) -> &A {
        &self.accumulator
    }

    /// Settles the signal as abandoned so events caused by cancelling the
    /// call are ignored. Returns the termination that won.
    pub fn abandon(&self) -> Termination {
        self.signal.fire(Termination::Abandoned);
        self.signal
            .wait_up_to(Duration::ZERO)
            .unwrap_or(Termination::Abandoned)
    }

    fn terminate(&self, termination: Termination) -> bool {
        let fired = self.signal.fire(termination);
        if !fired {
            tracing::debug!(shape = %self.shape, "Ignoring terminal event after the first");
        }
        fired
    }
}

impl<A: Accumulator> ResponseObserver for StreamBridge<A> {
    fn on_next(&self, response: HelloResponse) {
        tracing::debug!(shape = %self.shape, message = %response.message, "Received response");
        self.accumulator.accept(response);
    }

    fn on_error(&self, status: Status) {
        let code = status.code();
        let message = status.message().to_string();
        if self.terminate(Termination::Errored(status)) {
            tracing::error!(
                shape = %self.shape,
                code = ?code,
                "Stream terminated with error: {message}"
            );
        }
    }

    fn on_completed(&self) {
        if self.terminate(Termination::Completed) {
            tracing::info!(shape = %self.shape, "Stream completed");
        }
    }
}

/// A call as returned by the transport: always cancellable, and with an open
/// request side for the shapes that stream requests.
pub struct OpenedCall {
    pub handle: CallHandle,
    pub sink: Option<Box<dyn RequestSink>>,
}

impl From<CallHandle> for OpenedCall {
    fn from(handle: CallHandle) -> Self {
        Self { handle, sink: None }
    }
}

impl From<StreamCall> for OpenedCall {
    fn from(call: StreamCall) -> Self {
        Self {
            handle: call.handle,
            sink: Some(call.sink),
        }
    }
}

/// How long to wait and what to do when the wait runs out.
#[derive(Clone, Copy, Debug)]
pub struct WaitPolicy {
    pub deadline: Duration,
    pub cancel_on_timeout: bool,
}

/// Everything a bridged streaming call produced.
#[derive(Debug)]
pub struct Bridged {
    pub responses: Vec<HelloResponse>,
    pub completion: Completion,
    pub outbound: Option<DriveReport>,
}

/// Runs one streaming call to completion from the caller's thread.
///
/// `open` receives the observer to register and returns the opened call. If
/// the call has a request side, `requests` are driven through it and the
/// input is half-closed before waiting starts. The caller then blocks until
/// the terminal event or until `wait.deadline` (measured from the start of
/// this function) elapses. On timeout the call is cancelled if the policy
/// says so, and whatever arrived so far is returned.
pub fn run<A, F>(
    shape: CallShape,
    accumulator: A,
    requests: Vec<HelloRequest>,
    wait: WaitPolicy,
    open: F,
) -> Bridged
where
    A: Accumulator + 'static,
    F: FnOnce(Arc<dyn ResponseObserver>) -> OpenedCall,
{
    let start = Instant::now();
    let bridge = Arc::new(StreamBridge::new(shape, accumulator));
    let observer: Arc<dyn ResponseObserver> = Arc::clone(&bridge) as Arc<dyn ResponseObserver>;

    let OpenedCall { handle, sink } = open(observer);

    let outbound = sink.map(|mut sink| {
        let report = drive_requests(sink.as_mut(), requests);
        tracing::debug!(
            shape = %shape,
            sent = report.sent,
            "Outbound requests driven, input closed"
        );
        report
    });

    let remaining = wait.deadline.saturating_sub(start.elapsed());
    let termination = match bridge.signal().wait_up_to(remaining) {
        Some(termination) => termination,
        None => match bridge.abandon() {
            Termination::Abandoned => {
                tracing::warn!(
                    shape = %shape,
                    deadline = ?wait.deadline,
                    "No terminal event before the deadline, returning partial results"
                );
                if wait.cancel_on_timeout {
                    handle.cancel();
                }
                Termination::Abandoned
            }
            // Ended between the wait running out and the signal settling.
            ended => ended,
        },
    };
    let completion = Completion::from(termination);

    Bridged {
        responses: bridge.accumulator().drain(),
        completion,
        outbound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greeter_core::hello_request;
    use std::thread;

    fn greeting(message: &str) -> HelloResponse {
        HelloResponse {
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn wait(deadline_ms: u64) -> WaitPolicy {
        WaitPolicy {
            deadline: Duration::from_millis(deadline_ms),
            cancel_on_timeout: true,
        }
    }

    #[test]
    fn first_terminal_event_wins() {
        let bridge = StreamBridge::new(CallShape::ServerStream, ResponseCollector::new());
        bridge.on_next(greeting("a"));
        bridge.on_completed();
        bridge.on_error(Status::internal("late"));
        bridge.on_next(greeting("b"));

        assert!(matches!(
            bridge.signal().wait_up_to(Duration::ZERO),
            Some(Termination::Completed)
        ));
        assert_eq!(bridge.accumulator().drain().len(), 2);
    }

    #[test]
    fn run_collects_until_completion() {
        let bridged = run(
            CallShape::ServerStream,
            ResponseCollector::new(),
            Vec::new(),
            wait(5_000),
            |observer| {
                thread::spawn(move || {
                    observer.on_next(greeting("a"));
                    observer.on_next(greeting("b"));
                    observer.on_completed();
                });
                CallHandle::new().into()
            },
        );

        let messages: Vec<_> = bridged.responses.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, ["a", "b"]);
        assert!(matches!(bridged.completion, Completion::Completed));
        assert!(bridged.outbound.is_none());
    }

    #[test]
    fn run_times_out_and_cancels() {
        let handle = CallHandle::new();
        let opened = handle.clone();

        let start = Instant::now();
        let bridged = run(
            CallShape::ServerStream,
            ResponseCollector::new(),
            vec![hello_request("ignored", None)],
            wait(50),
            move |observer| {
                observer.on_next(greeting("partial"));
                opened.into()
            },
        );

        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(matches!(bridged.completion, Completion::TimedOut));
        assert_eq!(bridged.responses.len(), 1);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn cancellation_after_abandon_is_not_a_stream_error() {
        let bridge = StreamBridge::new(CallShape::Bidirectional, ResponseCollector::new());
        bridge.on_next(greeting("partial"));

        assert!(matches!(bridge.abandon(), Termination::Abandoned));
        bridge.on_error(Status::cancelled("call cancelled"));
        bridge.on_completed();

        assert!(matches!(
            bridge.signal().wait_up_to(Duration::ZERO),
            Some(Termination::Abandoned)
        ));
        assert_eq!(bridge.accumulator().drain().len(), 1);
    }

    #[test]
    fn abandon_keeps_a_termination_that_already_arrived() {
        let bridge = StreamBridge::new(CallShape::ServerStream, ResponseCollector::new());
        bridge.on_error(Status::internal("boom"));

        match bridge.abandon() {
            Termination::Errored(status) => assert_eq!(status.code(), tonic::Code::Internal),
            other => panic!("expected the stream error, got {other:?}"),
        }
    }

    #[test]
    fn run_ignores_the_cancel_it_triggers_on_timeout() {
        let handle = CallHandle::new();
        let opened = handle.clone();

        let bridged = run(
            CallShape::ServerStream,
            ResponseCollector::new(),
            Vec::new(),
            wait(30),
            move |observer| {
                observer.on_next(greeting("partial"));
                thread::spawn(move || {
                    while !opened.is_cancelled() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    observer.on_error(Status::cancelled("call cancelled"));
                });
                handle.into()
            },
        );

        assert!(matches!(bridged.completion, Completion::TimedOut));
        assert_eq!(bridged.responses.len(), 1);
    }
}
