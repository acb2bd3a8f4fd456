use std::sync::Arc;

use librarian_api::config::Config;
use librarian_api::{AppState, AuthPolicy, ControlServer};
use librarian_worker::jobs::builtin_commands;
use librarian_worker::{Daemon, PeriodicScheduler, TemplateStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "librarian_api=debug,librarian_worker=debug,librarian::job=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    librarian_shared_config::load_dotenv();

    let config = Config::from_env()?;
    tracing::info!(
        environment = %config.environment(),
        pool_size = config.worker.pool_size,
        template_dir = %config.worker.template_dir.display(),
        "Starting librarian daemon"
    );

    let daemon = Daemon::new(config.worker.clone(), builtin_commands());
    let templates = Arc::new(TemplateStore::new(config.worker.template_dir.clone()));
    let scheduler = Arc::new(PeriodicScheduler::new(
        daemon.clone(),
        templates,
        config.worker.schedules.clone(),
    ));

    let state = AppState::new(
        daemon.clone(),
        scheduler.clone(),
        AuthPolicy::from_config(config.control()),
    );
    let server = ControlServer::bind(config.control(), state).await?;

    tokio::spawn(scheduler.run(config.worker.scheduler_tick(), daemon.shutdown_token()));

    let signal_daemon = daemon.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            signal_daemon.shutdown().await;
        }
    });

    server.serve().await?;
    Ok(())
}
