use tracing::info;

use spacebook::config::Config;
use spacebook::service::Service;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    spacebook::observability::init(config.metrics_port)?;

    let service = Service::start(&config, Vec::new())?;
    let spaces = service.engine.list_spaces().await?.len();
    info!("spacebook running");
    info!(
        "  data_dir: {}",
        config
            .data_dir
            .as_ref()
            .map_or("(in memory)".to_string(), |d| d.display().to_string())
    );
    info!("  spaces: {spaces}");
    info!("  event workers: {}, queue: {}", config.event_workers, config.event_queue_capacity);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Run until SIGTERM/ctrl-c, then stop the background tasks
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    service.shutdown().await;
    info!("spacebook stopped");
    Ok(())
}
