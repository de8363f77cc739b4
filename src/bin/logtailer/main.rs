// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logtailer::bounded_channel::{self, BoundedReceiver};
use logtailer::init::args::TailArgs;
use logtailer::init::wait;
use logtailer::tailers::file::{JsonFileRegistry, Launcher, LauncherConfig, LogSource, Message};

/// Time allowed for the launcher and printer to finish after shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(75);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail a file and print its messages as JSON lines
    Tail(Box<TailArgs>),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "logtailer")]
#[command(bin_name = "logtailer")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "LOGTAILER_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(Serialize)]
struct PrintedMessage<'a> {
    content: String,
    offset: i64,
    identifier: &'a str,
    tags: &'a [String],
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::Tail(args)) => {
            let _guard = match setup_logging(&opt.log_format) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_tail(args) {
                error!(error = e, "Failed to tail file.");
                return ExitCode::from(1);
            }
        }
        None => {
            // it shouldn't be possible to get here since we mark a subcommand as
            // required
            error!("Must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_tail(args: Box<TailArgs>) -> Result<(), BoxError> {
    if args.path.is_empty() {
        return Err("a path to tail is required (--path)".into());
    }

    let registry = Arc::new(JsonFileRegistry::open(&args.offsets_path)?);
    let source = LogSource::new(args.source_name.clone(), args.path.clone());
    let (output_tx, output_rx) = bounded_channel::bounded::<Message>(args.output_queue_size);

    let launcher = Launcher::new(
        args.path.clone(),
        source,
        output_tx,
        registry,
        LauncherConfig::from(&*args),
    );

    let cancel_token = CancellationToken::new();
    let mut join_set = JoinSet::new();
    join_set.spawn(launcher.run(cancel_token.clone()));
    join_set.spawn(print_messages(output_rx));

    info!(path = args.path, "Tailing file");

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of tailer."),
                Err(e) => {
                    cancel_token.cancel();
                    return Err(e);
                }
            }
        },
    }
    cancel_token.cancel();

    // The printer exits once the launcher drops the last output sender.
    wait::wait_for_tasks_with_timeout(&mut join_set, SHUTDOWN_TIMEOUT).await?;
    Ok(())
}

async fn print_messages(mut output: BoundedReceiver<Message>) -> Result<(), BoxError> {
    let stdout = std::io::stdout();
    while let Some(message) = output.next().await {
        let printed = PrintedMessage {
            content: message.content_lossy(),
            offset: message.offset(),
            identifier: &message.origin().identifier,
            tags: message.tags(),
        };
        let mut line = serde_json::to_vec(&printed)?;
        line.push(b'\n');
        stdout.lock().write_all(&line)?;
    }
    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg) -> Result<LoggerGuard, BoxError> {
    LogTracer::init().expect("Unable to setup log tracer!");

    // Messages go to stdout, so logs go to stderr.
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?;

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);
        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber).unwrap();
    } else {
        use std::io;
        use std::io::IsTerminal;

        // Skip color codes when not in a terminal
        let use_ansi = io::stderr().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).unwrap();
    }

    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");
    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

#[cfg(unix)]
async fn signal_wait() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sig_term = signal(SignalKind::terminate()).unwrap();
    let mut sig_int = signal(SignalKind::interrupt()).unwrap();

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

#[cfg(not(unix))]
async fn signal_wait() {
    let _ = tokio::signal::ctrl_c().await;
}
