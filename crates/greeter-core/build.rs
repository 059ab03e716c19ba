/// Builds the gRPC client and server code for `proto/greeting.proto` using
/// `tonic-prost-build`.
///
/// Besides the message and service bindings, the build also emits an encoded
/// `FileDescriptorSet` (`greeting_descriptor.bin`) into `OUT_DIR` so the server
/// can register the schema with `tonic-reflection`.
///
/// # Panics
///
/// This function will `panic!` if code generation fails (for example when
/// `protoc` is not installed).
///
/// # Output
///
/// Generated code is exposed in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("greeting");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("greeting_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/greeting.proto");

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_with_config(config, &["proto/greeting.proto"], &["proto"])
        .unwrap();
}
