// SPDX-License-Identifier: Apache-2.0

use clap::{CommandFactory, Parser, ValueEnum};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use dle::bounded_channel::bounded;
use dle::delivery::{DeliveryConnection, TlsDialer, init_crypto_provider};
use dle::discovery::docker::DockerClient;
use dle::discovery::watcher::WatcherConfig;
use dle::discovery::{
    DirectoryDiscovery, DirectoryOptions, DiscoveryKind, DiscoverySource, RuntimeDiscovery,
};
use dle::init::agent::{Agent, AgentCommand, AgentOptions, DiscoveryFactory, request_reload};
use dle::init::args::{AgentRun, LogFormatArg};
use dle::init::config::SourcesConfig;
use dle::init::wait;
use dle::tailer::TailerOptions;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
enum Command {
    /// Print usage
    Help,
}

#[derive(Debug, Parser)]
#[command(name = "dle")]
#[command(bin_name = "dle")]
#[command(version, about, long_about = None)]
struct Arguments {
    #[arg(value_enum)]
    command: Option<Command>,

    #[arg(value_enum, long, env = "DLE_LOG_FORMAT", default_value = "text")]
    /// Log format
    log_format: LogFormatArg,

    #[arg(long, env = "DLE_LOG_LEVEL", default_value = "warn")]
    /// Log level (trace, debug, info, warn, error)
    log_level: String,

    #[command(flatten)]
    agent: AgentRun,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    if opt.command == Some(Command::Help) {
        print_usage();
        return ExitCode::SUCCESS;
    }

    if let Err(e) = opt.agent.validate() {
        eprintln!("{}", e);
        print_usage();
        return ExitCode::from(1);
    }

    let _guard = match setup_logging(&opt.log_format, &opt.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run_agent(opt.agent) {
        Ok(_) => {}
        Err(e) => {
            error!(error = e, "Log shipper failed.");
            return ExitCode::from(1);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_agent(args: AgentRun) -> Result<(), BoxError> {
    init_crypto_provider()?;

    let (lines_tx, lines_rx) = bounded(0);
    let options = AgentOptions {
        default_token: args.default_token().unwrap_or_default().to_string(),
        config_path: args.config.clone(),
        quit_timeout: args.quit_timeout(),
        tailer: TailerOptions {
            parse_structured: args.parse_docker_logs,
        },
    };
    let agent = Agent::new(options, discovery_factory(&args)?, lines_tx)?;

    let dialer = TlsDialer::new(&args.le_host, args.pem_file.clone())?
        .with_connect_timeout(args.connect_timeout());
    let delivery = DeliveryConnection::connect(dialer).await?;

    let mut task_set: JoinSet<Result<(), BoxError>> = JoinSet::new();
    let delivery_cancel = CancellationToken::new();
    {
        let cancel = delivery_cancel.clone();
        task_set.spawn(async move {
            let stats = delivery.run(lines_rx, cancel).await?;
            info!(lines = stats.lines, reconnects = stats.reconnects, "Delivery finished");
            Ok(())
        });
    }

    let (commands_tx, commands_rx) = bounded(1);
    task_set.spawn(agent.run(commands_rx));

    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_hup = signal(SignalKind::hangup())?;
    loop {
        select! {
            _ = sig_term.recv() => {
                info!("Shutdown signal received.");
                let _ = commands_tx.send(AgentCommand::Shutdown).await;
                break;
            },
            _ = sig_int.recv() => {
                info!("Shutdown signal received.");
                // the agent may already be gone, in which case so is the sender
                let _ = commands_tx.send(AgentCommand::Shutdown).await;
                break;
            },
            _ = sig_hup.recv() => {
                info!("Reload signal received.");
                request_reload(&commands_tx);
            },
            e = wait::wait_for_any_task(&mut task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of task."),
                    Err(e) => return Err(e),
                }
                break;
            },
        }
    }

    // the agent drops the fan-in sender once torn down, letting delivery drain
    let res = wait::wait_for_tasks_with_timeout(&mut task_set, SHUTDOWN_TIMEOUT).await;
    delivery_cancel.cancel();
    res
}

fn discovery_factory(args: &AgentRun) -> Result<DiscoveryFactory, BoxError> {
    let factory: DiscoveryFactory = match args.discovery {
        DiscoveryKind::Directory => {
            let root = args.log_directory.clone().unwrap_or_default();
            let options = DirectoryOptions {
                watch: args.watch_ld,
                watcher: WatcherConfig {
                    mode: args.watch_mode,
                    ..Default::default()
                },
                ..Default::default()
            };
            Box::new(move |config: &SourcesConfig| {
                let discovery =
                    DirectoryDiscovery::new(root.clone(), config.clone(), options.clone())?;
                Ok(Arc::new(discovery) as Arc<dyn DiscoverySource>)
            })
        }
        DiscoveryKind::Docker => {
            let host = args.docker_host.clone();
            // surface an unusable host at startup rather than on first reload
            let client = DockerClient::connect(&host)?;
            info!(docker_host = client.host(), "Using container runtime");
            Box::new(move |config: &SourcesConfig| {
                let client = DockerClient::connect(&host)?;
                Ok(Arc::new(RuntimeDiscovery::new(client, config.clone())) as Arc<dyn DiscoverySource>)
            })
        }
    };

    Ok(factory)
}

fn print_usage() {
    let mut cmd = Arguments::command();
    if let Err(e) = cmd.print_help() {
        eprintln!("ERROR: failed to print usage: {}", e);
    }
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg, log_level: &str) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let level = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::ERROR);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?
        .add_directive("bollard=warn".parse()?)
        .add_directive("rustls=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
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
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}
