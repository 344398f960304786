mod cli;
mod error;
mod server;

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use rackdash_config::{Config, config_path, load_config};
use rackdash_core::Engine;

use crate::cli::{Cli, Command, ServeArgs};
use crate::error::CliError;
use crate::server::{AppState, router};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = init_tracing(
        cli.global.verbose,
        cli.global.log_json,
        cli.global.log_dir.as_deref(),
    );

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        // Flush the file writer before exiting.
        drop(guard);
        std::process::exit(code);
    }
}

/// Install the global subscriber. The returned guard must outlive logging
/// when a log directory is configured.
fn init_tracing(verbosity: u8, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = match verbosity {
        0 => "warn,rackdash=info,rackdash_core=info,rackdash_api=info,rackdash_config=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "rackdash.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
    guard
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli.global.config.clone().unwrap_or_else(config_path);
    let config = load_config(&path).map_err(|source| CliError::Config {
        path: path.display().to_string(),
        source,
    })?;

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Serve(args) => serve(config, path, args).await,
    }
}

async fn serve(mut config: Config, path: PathBuf, args: ServeArgs) -> Result<(), CliError> {
    let config_error = |source| CliError::Config {
        path: path.display().to_string(),
        source,
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    let addr = config.bind_addr().map_err(config_error)?;
    let engine_config = config.to_engine_config().map_err(config_error)?;
    if engine_config.network_id.is_empty() {
        warn!("no network id configured; set one via POST /admin/network-id");
    }

    let engine = Engine::new(engine_config).map_err(CliError::Engine)?;
    engine.start().await;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| CliError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(%addr, config = %path.display(), "listening");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    let app = router(AppState::new(engine.clone(), config, Some(path)));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;

    engine.shutdown().await;
    served.map_err(CliError::Server)
}
