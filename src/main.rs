use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt::{self, time::ChronoLocal}, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobcast::{
    channel::JobChannel,
    utils::{get_log_file, update_config},
    AppState, Config, CONFIG_ENV, JOBCAST_VERSION, LOGGER_ENV, LOGS_ENV, SHUTDOWN_GRACE,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Logging
    let logs_folder = std::env::var(LOGS_ENV).unwrap_or_else(|_| String::from("logs"));
    let file_appender = tracing_appender::rolling::never(&logs_folder, get_log_file(&logs_folder));
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    // "trace,axum=info,tower_http=info,tokio=info,tungstenite=info,tokio_tungstenite=info",
    let env_filter = EnvFilter::try_from_env(LOGGER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let timer = ChronoLocal::new(String::from("%Y-%m-%dT%H:%M:%S%.3f%:z"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_timer(timer.clone()).pretty())
        .with(fmt::layer().with_timer(timer).with_ansi(false).with_writer(file_writer))
        .init();

    let prev_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        tracing_panic::panic_hook(panic_info);
        prev_hook(panic_info);
    }));

    info!("The Jobcast v{}", JOBCAST_VERSION);

    // Config
    let config_file = PathBuf::from(std::env::var(CONFIG_ENV).unwrap_or_else(|_| "Config.toml".into()));
    let config = Config::parse(config_file.clone())?;
    let listen = config.listen.clone();
    let metrics = config.metrics;
    config.subscribe.log_policy();

    // State
    let state = AppState::new(config);

    // Automatic update of configuration while the server is running
    let config_update = Arc::clone(&state.config);
    tokio::spawn(async move {
        if let Err(kind) = update_config(config_file, config_update).await {
            tracing::error!("Config watcher stopped: {kind:#}");
        }
    });

    let channel = Arc::clone(&state.channel);
    let app = jobcast::app(state, metrics);
    let sockets = Arc::clone(&channel);

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Can't listen on {listen}"))?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(channel))
        .await?;
    // Upgraded sockets live outside of serve, let them send their Close frames
    if !sockets.drained(SHUTDOWN_GRACE).await {
        tracing::warn!("Some WebSocket connections didn't close in {:?}", SHUTDOWN_GRACE);
    }
    info!("Serve stopped. Closing...");
    Ok(())
}

async fn shutdown_signal(channel: Arc<JobChannel>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Terminate signal received");
    channel.shutdown();
}
