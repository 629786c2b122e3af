use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use wisp_api::auth::{self, AppState, AppStateInner};
use wisp_api::messages;
use wisp_api::middleware::require_auth;
use wisp_gateway::connection;
use wisp_gateway::registry::PresenceRegistry;
use wisp_media::ImageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisp=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("WISP_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("WISP_DB_PATH").unwrap_or_else(|_| "wisp.db".into());
    let host = std::env::var("WISP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("WISP_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let media_dir = std::env::var("WISP_MEDIA_DIR").unwrap_or_else(|_| "wisp-media".into());
    let public_url = std::env::var("WISP_PUBLIC_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}", port));

    // Init database and image storage
    let db = wisp_db::Database::open(&PathBuf::from(&db_path))?;
    let media_dir = PathBuf::from(media_dir);
    let images = ImageStore::new(media_dir.clone(), format!("{}/media", public_url)).await?;

    // Shared state: presence lives here for the whole process lifetime and
    // is handed to handlers by reference, never reached as a global.
    let registry = PresenceRegistry::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        registry,
        images,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/auth/check", get(auth::check_auth))
        .route("/auth/profile", put(auth::update_profile))
        .route("/messages/users", get(messages::sidebar))
        .route("/messages/send/{receiver_id}", post(messages::send_message))
        .route("/messages/mark/{message_id}", put(messages::mark_message_seen))
        .route("/messages/{peer_id}", get(messages::get_conversation))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/media", ServeDir::new(media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Wisp server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    user_id: Uuid,
}

/// Realtime handshake: the client identifies itself with its user id as an
/// upgrade query parameter. Unknown ids are refused before the upgrade.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let known = tokio::task::spawn_blocking({
        let state = state.clone();
        let id = params.user_id.to_string();
        move || state.db.get_user_by_id(&id)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .is_some();

    if !known {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let registry = state.registry.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, registry, params.user_id)
    }))
}
