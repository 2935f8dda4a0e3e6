mod app;
mod codec;
mod config;
mod dsl;
mod error;
mod metadata;
mod model;
mod pipeline;
mod sinks;
mod storage;
mod utils;

use clap::Parser;
use clap::error::ErrorKind;
use std::process::ExitCode;

use app::Cli;
use error::exit_code;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = std::time::Instant::now();
    match app::run(&cli) {
        Ok(summary) => {
            let elapsed = start.elapsed();
            tracing::info!(
                "Done! Written {} of {} objects in {:.2}s",
                summary.written,
                summary.read,
                elapsed.as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(exit_code(&err))
        }
    }
}
