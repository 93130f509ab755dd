//! fanmux server binary
//!
//! Examples:
//!   fanmux --input tcp://127.0.0.1:1935
//!   fanmux --input recording.flv --port 9000 --verbose
//!
//! Push a stream with ffmpeg:
//!   ffmpeg -re -i input.mp4 -c copy -f flv -listen 1 tcp://127.0.0.1:1935
//!
//! Then play it:
//!   ffplay http://localhost:8080/stream

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fanmux::registry::{DEFAULT_PIPE_BUFFER, DEFAULT_QUEUE_CAPACITY};
use fanmux::server::config::DEFAULT_PORT;
use fanmux::{StreamServer, StreamerConfig};

/// Remux one video input into fragmented MP4 for any number of HTTP clients
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Host to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Input format name
    #[arg(long, default_value = "flv")]
    format: String,

    /// Input locator: tcp://HOST:PORT, a file path, or - for stdin
    #[arg(long)]
    input: String,

    /// Log every packet
    #[arg(short, long)]
    verbose: bool,

    /// Packets buffered per client before it is dropped
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Bytes buffered between a client's writer and its HTTP response
    #[arg(long, default_value_t = DEFAULT_PIPE_BUFFER)]
    pipe_buffer: usize,
}

impl Args {
    fn into_config(self) -> StreamerConfig {
        StreamerConfig::new(self.format, self.input)
            .host(self.host)
            .port(self.port)
            .queue_capacity(self.queue_capacity)
            .pipe_buffer(self.pipe_buffer)
            .verbose(self.verbose)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "fanmux=trace,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.into_config();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid arguments");
        return ExitCode::FAILURE;
    }

    fanmux::format::setup();

    tracing::info!(
        host = %config.host,
        port = config.port,
        format = %config.input_format,
        input = %config.input_url,
        "Starting"
    );

    let server = StreamServer::new(config);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    match server.run_until(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
