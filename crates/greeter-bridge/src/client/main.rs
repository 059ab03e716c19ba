use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use greeter_bridge::{
    BridgeArgs, BridgeConfig, Call, CallOutcome, GreetingBridge, GrpcTransport, LogReporter,
    ThreadContext, Transport,
    telemetry::init_telemetry,
};
use std::{sync::Arc, thread};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Command-line driver for the greeting bridge.
///
/// Each invocation issues one call shape from `--concurrency` blocking caller
/// threads and prints what every caller got back.
#[derive(Parser, Debug)]
#[command(
    name = "greeter-client",
    version,
    about = "Blocking client for the streaming greeting service"
)]
struct Cli {
    #[command(flatten)]
    bridge: BridgeArgs,

    /// Number of caller threads issuing the call at the same time.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Tokio worker threads driving the streams and running callbacks.
    ///
    /// Environment variable: `RUNTIME_WORKERS`
    #[arg(long, env = "RUNTIME_WORKERS", default_value_t = 2)]
    runtime_workers: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Unary greeting.
    Hello {
        #[arg(default_value = "World")]
        name: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// One request, a stream of greetings back.
    ServerStream {
        #[arg(default_value = "World")]
        name: String,
        #[arg(long)]
        language: Option<String>,
    },
    /// A stream of names, one combined greeting back.
    ClientStream {
        #[arg(default_values = ["Alice", "Bob", "Charlie"])]
        names: Vec<String>,
        #[arg(long)]
        language: Option<String>,
    },
    /// A stream of names, one greeting back per name.
    Bidi {
        #[arg(default_values = ["Alice", "Bob", "Charlie"])]
        names: Vec<String>,
        #[arg(long)]
        language: Option<String>,
    },
}

impl Command {
    fn to_call<T: Transport>(&self, bridge: &GreetingBridge<T>) -> Call {
        match self {
            Command::Hello { name, language } => {
                Call::Unary(bridge.request(name.as_str(), language.as_deref()))
            }
            Command::ServerStream { name, language } => {
                Call::ServerStream(bridge.request(name.as_str(), language.as_deref()))
            }
            Command::ClientStream { names, language } => {
                Call::ClientStream(bridge.requests(names.iter().cloned(), language.as_deref()))
            }
            Command::Bidi { names, language } => {
                Call::Bidirectional(bridge.requests(names.iter().cloned(), language.as_deref()))
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if cli.concurrency == 0 {
        bail!("CONCURRENCY must be greater than 0");
    }
    if cli.runtime_workers == 0 {
        bail!("RUNTIME_WORKERS must be greater than 0");
    }
    let config = BridgeConfig::try_from(cli.bridge.clone())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.runtime_workers)
        .thread_name("greeter-io")
        .enable_all()
        .build()
        .context("failed to build the Tokio runtime")?;

    let providers = {
        let _guard = runtime.enter();
        init_telemetry()?
    };

    if cfg!(debug_assertions) {
        tracing::info!("Starting greeter client with full config: {:#?}", config);
    } else {
        tracing::info!(
            endpoint = %config.endpoint,
            policy = ?config.error_policy,
            "Starting greeter client"
        );
    }

    let transport = GrpcTransport::connect_blocking(&config, runtime.handle().clone())?;
    let bridge = GreetingBridge::new(transport, config).with_reporter(Arc::new(LogReporter));
    let call = cli.command.to_call(&bridge);

    let results = run_callers(&bridge, &call, cli.concurrency)?;

    let mut failed = 0;
    for (caller, outcome) in &results {
        print_outcome(caller, outcome);
        if matches!(
            outcome,
            CallOutcome::Failure(_) | CallOutcome::TimedOut { .. }
        ) {
            failed += 1;
        }
    }

    providers.shutdown();

    if failed > 0 {
        bail!("{failed} of {} calls failed", results.len());
    }
    Ok(())
}

/// Issues `call` from `concurrency` named threads and collects every outcome
/// in caller order.
fn run_callers<T: Transport>(
    bridge: &GreetingBridge<T>,
    call: &Call,
    concurrency: usize,
) -> anyhow::Result<Vec<(ThreadContext, CallOutcome)>> {
    thread::scope(|s| {
        let callers = (0..concurrency)
            .map(|i| {
                thread::Builder::new()
                    .name(format!("caller-{i}"))
                    .spawn_scoped(s, move || {
                        (ThreadContext::current(), bridge.dispatch(call.clone()))
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()
            .context("failed to spawn caller thread")?;

        callers
            .into_iter()
            .map(|caller| {
                caller
                    .join()
                    .map_err(|_| anyhow!("caller thread panicked"))
            })
            .collect()
    })
}

fn print_outcome(caller: &ThreadContext, outcome: &CallOutcome) {
    match outcome.completion() {
        Some(completion) => println!("[{caller}] {}: {completion}", outcome.kind()),
        None => println!("[{caller}] {}", outcome.kind()),
    }

    for response in outcome.responses() {
        println!("  {}", response.message);
        println!("    timestamp: {}", response.timestamp);
        println!("    {}", response.thread_info);
    }

    match outcome {
        CallOutcome::Failure(err) => println!("  error: {err}"),
        CallOutcome::TimedOut { after } => println!("  no terminal event within {after:?}"),
        CallOutcome::Empty { .. } => println!("  no response"),
        CallOutcome::Success { .. } => {}
    }
}
