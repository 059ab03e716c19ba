//! gRPC service implementation.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`GreeterService`).
//! - [`greeting`] - localized greeting text and response construction.

pub mod greeting;
pub mod handler;
