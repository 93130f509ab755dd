//! Remux the video of an input into a fragmented MP4 file
//!
//! Run with: cargo run --example remux_to_file <INPUT> [OUTPUT] [MAX_PACKETS]
//!
//! Examples:
//!   cargo run --example remux_to_file input.flv                  # writes out.mp4
//!   cargo run --example remux_to_file tcp://127.0.0.1:1935 - 300 # to stdout

use std::process::ExitCode;

use fanmux::session::{InputSession, OutputSession, ReadOutcome};
use fanmux::{open_sink, MuxOptions};

const DEFAULT_MAX_PACKETS: usize = 100;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fanmux=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input_url) = args.next() else {
        eprintln!("Usage: remux_to_file <INPUT> [OUTPUT] [MAX_PACKETS]");
        return ExitCode::FAILURE;
    };
    let output_path = args.next().unwrap_or_else(|| "out.mp4".into());
    let max_packets = args
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(DEFAULT_MAX_PACKETS);

    fanmux::format::setup();

    let mut input = match InputSession::open("flv", &input_url).await {
        Ok(input) => input,
        Err(e) => {
            tracing::error!(error = %e, "Unable to open input");
            return ExitCode::FAILURE;
        }
    };

    let sink = match open_sink(&output_path).await {
        Ok(sink) => sink,
        Err(e) => {
            tracing::error!(error = %e, "Unable to open output");
            input.close().await;
            return ExitCode::FAILURE;
        }
    };

    let track = input.track().clone();
    let mut output = match OutputSession::open("mp4", sink, &track, &MuxOptions::streaming()).await
    {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(error = %e, "Unable to open output");
            input.close().await;
            return ExitCode::FAILURE;
        }
    };
    output.set_verbose(true);

    let mut written = 0;
    let mut status = ExitCode::SUCCESS;
    while written < max_packets {
        let packet = match input.read_next().await {
            Ok(ReadOutcome::Video(packet)) => packet,
            Ok(ReadOutcome::Skipped) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Failure reading");
                break;
            }
        };
        if let Err(e) = output.write(packet, track.timebase).await {
            tracing::error!(error = %e, "Failure writing");
            status = ExitCode::FAILURE;
            break;
        }
        written += 1;
    }

    output.close().await;
    input.close().await;
    tracing::info!(packets = written, output = %output_path, "Done");
    status
}
