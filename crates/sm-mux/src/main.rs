//! shellmux
//!
//! Listens for reverse shells (and dials bind shells) and drives all of them
//! from this terminal. Type `sessions` to list them, `session <id>` to switch,
//! `close <id>` to drop one and `exit` to quit; anything else goes to the
//! active shell.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sm_core::config::{self, LogConfig, MuxConfig};
use sm_mux::cli::{parse_connect_target, Args};
use sm_mux::{operator, ListenerManager, Multiplexer};

/// How long exit waits for blocked tasks such as a pending stdin read
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, config_note) = load_config(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(file) = &args.log_file {
        config.log.file = Some(file.clone());
    }

    let _log_guard = init_logging(&config.log)?;
    if let Some(note) = config_note {
        tracing::warn!("{}", note);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run(args, config));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

/// Load the config file, falling back to defaults when the default path is
/// missing or broken. An explicit `--config` must load.
fn load_config(path: Option<&Path>) -> Result<(MuxConfig, Option<String>)> {
    if let Some(path) = path {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?;
        return Ok((config, None));
    }

    let default_path = config::default_config_path();
    if !default_path.exists() {
        return Ok((MuxConfig::default(), None));
    }

    match config::load_config(&default_path) {
        Ok(config) => Ok((config, None)),
        Err(e) => Ok((
            MuxConfig::default(),
            Some(format!(
                "Failed to load config from {:?}: {}; using defaults",
                default_path, e
            )),
        )),
    }
}

/// Logs go to stderr or a file, never stdout, which belongs to the sessions
fn init_logging(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));

    let Some(path) = &log.file else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    };

    let (dir, file_name) = split_log_path(path)?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
        .init();
    Ok(Some(guard))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log file path {:?}", path))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir.to_path_buf(), PathBuf::from(file_name)))
}

async fn run(args: Args, config: MuxConfig) -> Result<()> {
    let operator = operator::stdio(config.stream.limit).context("Failed to open terminal")?;
    let mux = Multiplexer::new(operator, &config)?;
    let listeners = ListenerManager::new(mux.clone());

    if !args.no_listen {
        let configured = match args.listener()? {
            Some(listener) => vec![listener],
            None => config.listeners.clone(),
        };
        for listener in &configured {
            let id = listeners
                .create_listener(&listener.host, listener.port, None)
                .await?;
            if listener.autostart {
                listeners.start_listener(id)?;
            }
        }
    }

    for target in &args.connect {
        let (host, port) = parse_connect_target(target)?;
        if let Err(e) = listeners.connect_outbound(&host, port).await {
            tracing::error!("{}", e);
        }
    }

    let signal_mux = mux.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_mux.shutdown().await;
    });

    mux.run().await?;
    listeners.shutdown();

    tracing::info!("shellmux shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
