//! The synchronous-facing result of a bridged call.

use crate::bridge::Termination;
use core::{fmt, time::Duration};
use greeter_core::{Error, Result, proto::HelloResponse};
use tonic::Status;

/// How the inbound side of a call ended.
#[derive(Clone, Debug)]
pub enum Completion {
    /// The peer completed the stream.
    Completed,
    /// The stream terminated with an error after delivering what it could.
    Errored(Status),
    /// The deadline elapsed before any terminal event.
    TimedOut,
}

impl Completion {
    /// `true` only for a clean completion.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Errored(_) => "errored",
            Self::TimedOut => "timed_out",
        }
    }
}

impl From<Termination> for Completion {
    fn from(termination: Termination) -> Self {
        match termination {
            Termination::Completed => Self::Completed,
            Termination::Errored(status) => Self::Errored(status),
            Termination::Abandoned => Self::TimedOut,
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Errored(status) => write!(
                f,
                "errored ({:?}: {})",
                status.code(),
                status.message()
            ),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Result of one bridged call. Every call ends in exactly one of these.
#[derive(Clone, Debug)]
pub enum CallOutcome {
    /// Responses in the order the peer emitted them. Under the best-effort
    /// policy this also covers streams that errored or timed out; `completion`
    /// says which.
    Success {
        responses: Vec<HelloResponse>,
        completion: Completion,
    },
    /// A client-streaming call that ended without a response.
    Empty { completion: Completion },
    /// The call failed. Always the case for unary transport errors; for
    /// streams only under the strict policy.
    Failure(Error),
    /// Strict policy only: the deadline elapsed with no terminal event.
    TimedOut { after: Duration },
}

impl CallOutcome {
    /// Responses carried by the outcome; empty for everything but `Success`.
    pub fn responses(&self) -> &[HelloResponse] {
        match self {
            Self::Success { responses, .. } => responses,
            _ => &[],
        }
    }

    pub fn into_responses(self) -> Vec<HelloResponse> {
        match self {
            Self::Success { responses, .. } => responses,
            _ => Vec::new(),
        }
    }

    /// The single response of a unary or client-streaming call.
    pub fn single(&self) -> Option<&HelloResponse> {
        self.responses().last()
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Self::Success { completion, .. } | Self::Empty { completion } => Some(completion),
            Self::Failure(_) | Self::TimedOut { .. } => None,
        }
    }

    /// `true` when the call ran to a clean completion.
    pub fn is_complete(&self) -> bool {
        self.completion().is_some_and(Completion::is_complete)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { completion, .. } if completion.is_complete() => "success",
            Self::Success { .. } => "partial",
            Self::Empty { .. } => "empty",
            Self::Failure(_) => "failure",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// Converts the outcome for fail-fast consumers.
    ///
    /// Partial successes are still `Ok`; use [`CallOutcome::is_complete`] to
    /// tell them apart.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyResult`] for `Empty`
    /// - [`Error::Timeout`] for `TimedOut`
    /// - the carried error for `Failure`
    pub fn into_result(self) -> Result<Vec<HelloResponse>> {
        match self {
            Self::Success { responses, .. } => Ok(responses),
            Self::Empty { .. } => Err(Error::EmptyResult),
            Self::Failure(err) => Err(err),
            Self::TimedOut { after } => Err(Error::Timeout { after }),
        }
    }
}
