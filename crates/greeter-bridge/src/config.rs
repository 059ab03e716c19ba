//! Runtime configuration for the bridge.
//!
//! [`BridgeConfig`] is the validated, library-facing configuration. Binaries
//! build it from [`BridgeArgs`], which `clap` fills from CLI flags or
//! environment variables (a `.env` file is honored via `dotenvy`).

use anyhow::bail;
use clap::{ArgAction, Args, ValueEnum};
use core::{fmt, time::Duration};
use greeter_core::DEFAULT_LANGUAGE;
use tonic::codec::CompressionEncoding;

/// How long a streaming call waits for its terminal event by default.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// How long establishing the channel may take by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default peer address.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9090";

/// What a streaming call returns when it ends badly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ErrorPolicy {
    /// Return whatever was collected; the outcome's completion says why the
    /// stream ended.
    #[default]
    BestEffort,
    /// Stream errors become failures and timeouts become `TimedOut`.
    Strict,
}

/// Message compression negotiated with the peer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Compression {
    #[default]
    None,
    Zstd,
    Gzip,
    Deflate,
}

impl Compression {
    pub fn encoding(self) -> Option<CompressionEncoding> {
        match self {
            Compression::None => None,
            Compression::Zstd => Some(CompressionEncoding::Zstd),
            Compression::Gzip => Some(CompressionEncoding::Gzip),
            Compression::Deflate => Some(CompressionEncoding::Deflate),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Zstd => write!(f, "zstd"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Deflate => write!(f, "deflate"),
        }
    }
}

/// Bridge settings as accepted on the command line.
#[derive(Args, Debug, Clone)]
pub struct BridgeArgs {
    /// Address of the greeting service.
    ///
    /// Environment variable: `GREETER_ENDPOINT`
    #[arg(long, env = "GREETER_ENDPOINT", default_value_t = String::from(DEFAULT_ENDPOINT))]
    pub endpoint: String,

    /// Seconds a streaming call waits for the peer to finish before returning
    /// what it has.
    ///
    /// Environment variable: `CALL_DEADLINE_SECS`
    #[arg(long, env = "CALL_DEADLINE_SECS", default_value_t = 30)]
    pub deadline_secs: u64,

    /// Whether stream errors and timeouts degrade to partial results
    /// (`best-effort`) or fail the call (`strict`).
    ///
    /// Environment variable: `ERROR_POLICY`
    #[arg(long, env = "ERROR_POLICY", value_enum, default_value_t = ErrorPolicy::BestEffort)]
    pub error_policy: ErrorPolicy,

    /// Tear down the underlying stream when the deadline elapses.
    ///
    /// Environment variable: `CANCEL_ON_TIMEOUT`
    #[arg(long, env = "CANCEL_ON_TIMEOUT", default_value_t = true, action = ArgAction::Set)]
    pub cancel_on_timeout: bool,

    /// Language used for requests that don't specify one.
    ///
    /// Environment variable: `DEFAULT_LANGUAGE`
    #[arg(long, env = "DEFAULT_LANGUAGE", default_value_t = String::from(DEFAULT_LANGUAGE))]
    pub default_language: String,

    /// Seconds allowed for establishing the channel.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_SECS`
    #[arg(long, env = "CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    pub connect_timeout_secs: u64,

    /// Compression for requests and accepted for responses.
    ///
    /// Environment variable: `COMPRESSION`
    #[arg(long, env = "COMPRESSION", value_enum, default_value_t = Compression::None)]
    pub compression: Compression,
}

/// Validated bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub endpoint: String,
    pub deadline: Duration,
    pub error_policy: ErrorPolicy,
    pub cancel_on_timeout: bool,
    pub default_language: String,
    pub connect_timeout: Duration,
    pub compression: Compression,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            deadline: DEFAULT_DEADLINE,
            error_policy: ErrorPolicy::default(),
            cancel_on_timeout: true,
            default_language: DEFAULT_LANGUAGE.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            compression: Compression::default(),
        }
    }
}

impl BridgeConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    pub fn with_cancel_on_timeout(mut self, cancel_on_timeout: bool) -> Self {
        self.cancel_on_timeout = cancel_on_timeout;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

impl TryFrom<BridgeArgs> for BridgeConfig {
    type Error = anyhow::Error;

    fn try_from(args: BridgeArgs) -> Result<Self, Self::Error> {
        if args.deadline_secs == 0 {
            bail!("CALL_DEADLINE_SECS must be greater than 0");
        }

        if args.connect_timeout_secs == 0 {
            bail!("CONNECT_TIMEOUT_SECS must be greater than 0");
        }

        let default_language = args.default_language.trim();
        if default_language.is_empty() {
            bail!("DEFAULT_LANGUAGE must not be empty");
        }

        if !args.endpoint.starts_with("http://") && !args.endpoint.starts_with("https://") {
            bail!(
                "GREETER_ENDPOINT ({}) must start with http:// or https://",
                args.endpoint
            );
        }

        Ok(Self {
            endpoint: args.endpoint,
            deadline: Duration::from_secs(args.deadline_secs),
            error_policy: args.error_policy,
            cancel_on_timeout: args.cancel_on_timeout,
            default_language: default_language.to_string(),
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            compression: args.compression,
        })
    }
}
