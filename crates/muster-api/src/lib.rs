pub mod handlers;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .with_state(state.clone());

    Router::new()
        .route("/retrieve.do", get(handlers::handle_retrieve))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(cors)
}

/// Serve HTTP queries on `listener` until shutdown is broadcast.
pub async fn serve(
    state: ApiState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "HTTP query interface listening");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("HTTP query interface stopped");
    Ok(())
}
