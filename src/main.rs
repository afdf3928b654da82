use tracing::{error, info};

use tokio_mvc::config::Config;
use tokio_mvc::server::{BoxError, Server};
use tokio_mvc::{app, logging, middleware};

fn main() -> Result<(), BoxError> {
    let config = Config::from_env()?;
    logging::init(&config.logging)?;

    info!("Starting tokio_mvc {}...", tokio_mvc::VERSION);
    config.log_summary();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads())
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), BoxError> {
    let dispatcher = app::build(&config.app)?;
    let server = Server::bind(
        config.server.clone(),
        dispatcher,
        middleware::from_config(&config.middleware),
    )?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutting down...");
        }
    }

    server.trigger_shutdown();
    if server.wait_for_drain(server.drain_timeout()).await {
        info!("All connections drained");
    }

    Ok(())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
