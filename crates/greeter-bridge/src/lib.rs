#![doc = include_str!("../README.md")]

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod outcome;
pub mod report;
pub mod telemetry;
pub mod transport;

pub use config::{BridgeArgs, BridgeConfig, Compression, ErrorPolicy};
pub use dispatch::{Call, CallShape, GreetingBridge};
pub use greeter_core;
pub use outcome::{CallOutcome, Completion};
pub use report::{CallReporter, LogReporter, ThreadContext};
pub use transport::{GrpcTransport, Transport};
