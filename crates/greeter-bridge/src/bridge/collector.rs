//! Accumulators that callback threads feed and the caller drains.
//!
//! Both accumulators are written from transport threads and read exactly once
//! by the caller, after the completion signal resolves. Draining seals the
//! accumulator: anything that arrives afterwards (a straggler racing a
//! timeout) is dropped instead of mutating state the caller already owns.

use greeter_core::proto::HelloResponse;
use parking_lot::Mutex;

/// Where a streaming call's inbound responses end up.
pub trait Accumulator: Send + Sync {
    /// Records one response. Called in arrival order.
    fn accept(&self, response: HelloResponse);

    /// Takes what has been accumulated and seals the accumulator.
    fn drain(&self) -> Vec<HelloResponse>;
}

#[derive(Debug, Default)]
struct Collected {
    responses: Vec<HelloResponse>,
    sealed: bool,
}

/// Append-only, order-preserving collector used by server-streaming and
/// bidirectional calls.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    inner: Mutex<Collected>,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for ResponseCollector {
    fn accept(&self, response: HelloResponse) {
        let mut inner = self.inner.lock();
        if inner.sealed {
            tracing::debug!(message = %response.message, "Dropping response received after drain");
            return;
        }
        inner.responses.push(response);
    }

    fn drain(&self) -> Vec<HelloResponse> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        core::mem::take(&mut inner.responses)
    }
}

#[derive(Debug, Default)]
struct Held {
    latest: Option<HelloResponse>,
    sealed: bool,
}

/// Single-slot holder used by client-streaming calls.
///
/// The peer owes exactly one response; if it sends more, the latest wins.
#[derive(Debug, Default)]
pub struct ResponseSlot {
    inner: Mutex<Held>,
}

impl ResponseSlot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for ResponseSlot {
    fn accept(&self, response: HelloResponse) {
        let mut inner = self.inner.lock();
        if inner.sealed {
            tracing::debug!(message = %response.message, "Dropping response received after drain");
            return;
        }
        if let Some(previous) = inner.latest.replace(response) {
            tracing::debug!(message = %previous.message, "Replacing earlier response");
        }
    }

    fn drain(&self) -> Vec<HelloResponse> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        inner.latest.take().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn greeting(message: &str) -> HelloResponse {
        HelloResponse {
            message: message.to_string(),
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            thread_info: "peer".to_string(),
        }
    }

    fn messages(responses: &[HelloResponse]) -> Vec<&str> {
        responses.iter().map(|r| r.message.as_str()).collect()
    }

    #[test]
    fn collector_keeps_arrival_order() {
        let collector = ResponseCollector::new();
        for m in ["one", "two", "three"] {
            collector.accept(greeting(m));
        }
        assert_eq!(messages(&collector.drain()), ["one", "two", "three"]);
    }

    #[test]
    fn collector_drops_responses_after_drain() {
        let collector = ResponseCollector::new();
        collector.accept(greeting("early"));
        assert_eq!(messages(&collector.drain()), ["early"]);

        collector.accept(greeting("late"));
        assert!(collector.drain().is_empty());
    }

    #[test]
    fn collector_keeps_order_from_a_single_producer_thread() {
        let collector = Arc::new(ResponseCollector::new());
        let producer = Arc::clone(&collector);

        thread::spawn(move || {
            for i in 0..1000 {
                producer.accept(greeting(&i.to_string()));
            }
        })
        .join()
        .unwrap();

        let drained = collector.drain();
        assert_eq!(drained.len(), 1000);
        for (i, response) in drained.iter().enumerate() {
            assert_eq!(response.message, i.to_string());
        }
    }

    #[test]
    fn slot_keeps_only_the_latest() {
        let slot = ResponseSlot::new();
        slot.accept(greeting("first"));
        slot.accept(greeting("second"));
        slot.accept(greeting("third"));
        assert_eq!(messages(&slot.drain()), ["third"]);
    }

    #[test]
    fn empty_slot_drains_to_nothing() {
        let slot = ResponseSlot::new();
        assert!(slot.drain().is_empty());
    }

    #[test]
    fn slot_is_sealed_by_drain() {
        let slot = ResponseSlot::new();
        assert!(slot.drain().is_empty());
        slot.accept(greeting("late"));
        assert!(slot.drain().is_empty());
    }
}
