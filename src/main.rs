use assessment_engine::{
    config::{get_config, init_config},
    database::pool::create_pool,
    routes,
    utils::time,
    AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    init_config()?;
    let config = get_config()?;

    let pool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app_state = AppState::new(pool, config);

    {
        let service = app_state.attempt_service.clone();
        let period = Duration::from_secs(config.deadline_sweep_seconds.max(1));
        tokio::spawn(async move {
            loop {
                match service.sweep_expired(time::now()).await {
                    Ok(0) => {}
                    Ok(closed) => info!(closed, "deadline sweep finalized expired attempts"),
                    Err(e) => tracing::error!(error = ?e, "deadline sweep failed"),
                }
                tokio::time::sleep(period).await;
            }
        });
    }

    let app = routes::router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
