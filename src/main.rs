use wsrelay::config::RelayConfig;
use wsrelay::routes;
use wsrelay::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = RelayConfig::from_env();
    config.validate().expect("invalid relay configuration");
    let addr = config.listen_addr();

    let state = AppState::new(config);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    tracing::info!(%addr, path = routes::WS_PATH, "relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
