//! Hemmer provider plugin for Kafka topics.
//!
//! Usage:
//!   # Started by the host; prints the handshake line
//!   hemmer-provider-kafka
//!
//!   # Started by hand under a debugger; prints reattach instructions
//!   hemmer-provider-kafka -debug

use std::sync::Arc;

use clap::Parser;
use hemmer_provider_kafka::{
    init_logging, serve, serve_debug, KafkaProvider, RdKafkaBroker, PROVIDER_ADDRESS,
};

#[derive(Debug, Parser)]
#[command(name = "hemmer-provider-kafka", version, about)]
struct Args {
    /// Run with support for debuggers; the host attaches via HEMMER_REATTACH_PROVIDERS
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Parse the process command line, also accepting `-debug`.
    fn parse_lenient() -> Self {
        Self::parse_lenient_from(std::env::args())
    }

    /// Parse `args` after rewriting the single-dash `-debug` to `--debug`.
    fn parse_lenient_from(args: impl IntoIterator<Item = String>) -> Self {
        Self::parse_from(args.into_iter().map(|arg| {
            if arg == "-debug" {
                "--debug".to_string()
            } else {
                arg
            }
        }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse_lenient();
    init_logging();

    let provider = KafkaProvider::new(Arc::new(RdKafkaBroker::new()));
    if args.debug {
        serve_debug(provider, PROVIDER_ADDRESS).await
    } else {
        serve(provider).await
    }
}
