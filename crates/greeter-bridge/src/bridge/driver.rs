use crate::transport::RequestSink;
use greeter_core::proto::HelloRequest;

/// What the outbound driver managed to send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DriveReport {
    /// Requests accepted by the sink.
    pub sent: usize,
    /// Index of the request the sink rejected, if any. Nothing after it was
    /// attempted.
    pub failed_at: Option<usize>,
}

/// Pushes `requests` into `sink` in order, then half-closes it.
///
/// Sending stops at the first rejected request; there are no retries, the
/// peer's side of the failure arrives through the observer's `on_error`. The
/// input side is closed in every case so the peer is never left waiting for
/// more input.
pub fn drive_requests<I>(sink: &mut dyn RequestSink, requests: I) -> DriveReport
where
    I: IntoIterator<Item = HelloRequest>,
{
    let mut report = DriveReport::default();

    for (index, request) in requests.into_iter().enumerate() {
        tracing::debug!(name = %request.name, "Sending request");
        if let Err(e) = sink.send(request) {
            tracing::warn!(index, "Stopped sending requests: {e}");
            report.failed_at = Some(index);
            break;
        }
        report.sent += 1;
    }

    sink.close_input();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use greeter_core::{Error, Result, hello_request};

    #[derive(Default)]
    struct RecordingSink {
        accepted: Vec<String>,
        reject_from: Option<usize>,
        closes: usize,
    }

    impl RequestSink for RecordingSink {
        fn send(&mut self, request: HelloRequest) -> Result<()> {
            if self.reject_from == Some(self.accepted.len()) {
                return Err(Error::ChannelError {
                    context: "peer went away".to_string(),
                });
            }
            self.accepted.push(request.name);
            Ok(())
        }

        fn close_input(&mut self) {
            self.closes += 1;
        }
    }

    fn requests(names: &[&str]) -> Vec<HelloRequest> {
        names.iter().map(|n| hello_request(*n, None)).collect()
    }

    #[test]
    fn sends_everything_in_order_then_closes() {
        let mut sink = RecordingSink::default();
        let report = drive_requests(&mut sink, requests(&["Alice", "Bob", "Charlie"]));

        assert_eq!(
            report,
            DriveReport {
                sent: 3,
                failed_at: None
            }
        );
        assert_eq!(sink.accepted, ["Alice", "Bob", "Charlie"]);
        assert_eq!(sink.closes, 1);
    }

    #[test]
    fn no_requests_still_half_closes() {
        let mut sink = RecordingSink::default();
        let report = drive_requests(&mut sink, Vec::new());

        assert_eq!(report.sent, 0);
        assert_eq!(sink.closes, 1);
    }

    #[test]
    fn stops_at_first_rejection_without_retrying() {
        let mut sink = RecordingSink {
            reject_from: Some(1),
            ..Default::default()
        };
        let report = drive_requests(&mut sink, requests(&["A", "B", "C"]));

        assert_eq!(
            report,
            DriveReport {
                sent: 1,
                failed_at: Some(1)
            }
        );
        assert_eq!(sink.accepted, ["A"]);
        assert_eq!(sink.closes, 1);
    }
}
