use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `greeter-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. The
/// defaults match what `greeter-client` expects out of the box.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "greeter-server",
    version,
    about = "A gRPC greeting service covering all four streaming shapes"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:9090"))]
    pub server_addr: String,

    /// Number of greetings emitted by a server-streaming call.
    ///
    /// Environment variable: `STREAM_COUNT`
    #[arg(long, env = "STREAM_COUNT", default_value_t = 5)]
    pub stream_count: usize,

    /// Pause between two greetings of a server-streaming call, in
    /// milliseconds.
    ///
    /// Environment variable: `STREAM_INTERVAL_MS`
    #[arg(long, env = "STREAM_INTERVAL_MS", default_value_t = 200)]
    pub stream_interval_ms: u64,

    /// Capacity of the response buffer between a handler task and its gRPC
    /// stream.
    ///
    /// Lower values make slow clients push back on the handler sooner.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub stream_count: usize,
    pub stream_interval: Duration,
    pub stream_buffer_size: usize,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_count == 0 {
            bail!("STREAM_COUNT must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        Ok(Self {
            server_addr: args.server_addr,
            stream_count: args.stream_count,
            stream_interval: Duration::from_millis(args.stream_interval_ms),
            stream_buffer_size: args.stream_buffer_size,
        })
    }
}
