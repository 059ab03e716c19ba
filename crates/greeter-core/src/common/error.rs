//! Error types shared by the greeter bridge and the reference peer.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of a bridged gRPC call. It implements `From<Error>` for
//! `tonic::Status` so server-side code can hand errors straight back to
//! clients with appropriate status codes.
//!
//! ## Error Cases
//! - `Transport`: The peer or the channel reported a failure.
//! - `Timeout`: A streaming call produced no terminal event before its
//!   deadline.
//! - `Connect`: The channel to the peer could not be established.
//! - `ChannelError`: The outbound half of a stream was already closed.
//! - `InvalidRequest`: The request was malformed.
//! - `EmptyResult`: The stream completed without the response it owed.

use core::time::Duration;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for bridged greeting calls.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The remote peer or the channel reported an error.
    #[error("Transport failure: {0}")]
    Transport(#[from] Status),

    /// The deadline elapsed before the stream signalled completion.
    #[error("Timed out after {after:?} waiting for the stream to finish")]
    Timeout { after: Duration },

    /// The channel to the peer could not be established.
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// Outbound send on a stream whose input side is gone.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The stream completed with zero responses where one was expected.
    #[error("Stream completed without a response")]
    EmptyResult,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Transport(status) => status,
            Error::Timeout { after } => {
                Status::deadline_exceeded(format!("No terminal event within {after:?}"))
            }
            Error::Connect { endpoint, reason } => {
                Status::unavailable(format!("Failed to connect to {endpoint}: {reason}"))
            }
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::EmptyResult => Status::internal("Stream completed without a response"),
        }
    }
}
