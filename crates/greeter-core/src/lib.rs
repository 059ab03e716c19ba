#![doc = include_str!("../README.md")]

mod common;
pub use common::*;

/// gRPC service and message definitions generated from `proto/greeting.proto`.
///
/// ## Service
///
/// - `GreetingService` with one RPC per interaction shape: `SayHello`
///   (unary), `SayHelloServerStream`, `SayHelloClientStream` and
///   `SayHelloBidirectional`.
///
/// ## Messages
///
/// - [`HelloRequest`](proto::HelloRequest) - who to greet and in which
///   language.
/// - [`HelloResponse`](proto::HelloResponse) - the greeting, when it was made,
///   and which peer thread made it.
pub mod proto {
    tonic::include_proto!("greeting");

    /// Encoded descriptor set for `greeting.proto`, used for server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("greeting_descriptor");
}
