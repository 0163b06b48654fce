use blackmate::{
    config::Config,
    error::ApiError,
    routes::{AppState, router},
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    if let Err(error) = dotenvy::dotenv()
        && !error.not_found()
    {
        eprintln!("Ignoring unreadable .env file: {error}");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "blackmate=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env()?;

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Failed to create output directory {:?}: {error}",
                config.output_dir
            ))
        })?;

    if config.allowed_origins.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Responses will allow any origin.");
    }
    let addr = config.bind_addr.clone();
    let sweep_interval = config.sweep_interval;
    let state = AppState::new(config);

    info!(
        "Writing downloads to {:?} with {:?} retention, using {:?} ({} at a time)",
        state.downloader.output_dir(),
        state.janitor.retention(),
        state.downloader.ytdlp().program(),
        state.downloader.slots().capacity()
    );

    let removed = state.janitor.sweep().await;
    if removed > 0 {
        info!("Removed {removed} expired file(s) left from a previous run");
    }
    if let Some(every) = sweep_interval {
        state.janitor.spawn_periodic_sweep(every);
    }

    let app = router(state)?;

    let listener = TcpListener::bind(&addr).await.map_err(|error| {
        ApiError::internal(format!("Failed to bind {addr}: {error}"))
    })?;

    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
