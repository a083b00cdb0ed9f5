use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use atelier_api::auth::{self, AppState, AppStateInner, hash_password};
use atelier_api::chat;
use atelier_api::error::{ApiError, ApiResult, blocking};
use atelier_api::middleware::{decode_token, require_auth};
use atelier_api::products;
use atelier_api::reviews;
use atelier_db::Database;
use atelier_gateway::connection::{self, SessionUser};
use atelier_gateway::dispatcher::Dispatcher;
use atelier_gateway::presence::{InMemoryPresence, PresenceStore};
use atelier_types::models::Role;

#[derive(Clone)]
struct ServerState {
    app: AppState,
    dispatcher: Dispatcher,
    presence: Arc<dyn PresenceStore>,
    db: Arc<Database>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("ATELIER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("ATELIER_DB_PATH").unwrap_or_else(|_| "atelier.db".into());
    let host = std::env::var("ATELIER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("ATELIER_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    seed_default_admin(&db)?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let presence: Arc<dyn PresenceStore> = Arc::new(InMemoryPresence::new());
    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        jwt_secret,
    });

    let state = ServerState {
        app: app_state.clone(),
        dispatcher,
        presence,
        db,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .route("/products", get(products::list_products))
        .route("/products/{product_id}", get(products::get_product))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/chat/admin", get(chat::get_admin))
        .route("/chat/messages/{conversation}", get(chat::get_messages))
        .route("/chat/conversations", get(chat::get_conversations))
        .route("/products", post(products::create_product))
        .route(
            "/products/{product_id}",
            axum::routing::put(products::update_product).delete(products::delete_product),
        )
        .route(
            "/products/{product_id}/reviews",
            post(reviews::submit_review),
        )
        .route(
            "/products/{product_id}/reviews/{review_id}",
            axum::routing::put(reviews::edit_review).delete(reviews::delete_review),
        )
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Atelier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": chrono::Utc::now(),
    }))
}

/// First boot of an empty store has nobody to chat with: create the single
/// admin account from the environment when no admin row exists.
fn seed_default_admin(db: &Database) -> anyhow::Result<()> {
    if db.find_admin()?.is_some() {
        return Ok(());
    }

    let name = std::env::var("ATELIER_ADMIN_NAME").unwrap_or_else(|_| "Administrator".into());
    let email = std::env::var("ATELIER_ADMIN_EMAIL").unwrap_or_else(|_| "admin@atelier.shop".into());
    let password = std::env::var("ATELIER_ADMIN_PASSWORD").unwrap_or_else(|_| "Admin123!".into());

    let hash = hash_password(&password)
        .map_err(|e| anyhow::anyhow!("failed to hash admin password: {e}"))?;
    db.create_user(&Uuid::new_v4().to_string(), &name, &email, &hash, "admin")?;

    info!("Default admin created ({})", email);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Authenticate the WebSocket handshake before upgrading. The token rides
/// in the query string (connection metadata, not a header); any failure —
/// missing token, bad signature, expiry, or a deleted user — rejects the
/// upgrade with 401 and no session is created.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    let token = query
        .token
        .ok_or_else(|| ApiError::Unauthorized("Missing token".into()))?;
    let claims = decode_token(&state.app.jwt_secret, &token)?;

    // The token must still resolve to a live user row.
    let row = {
        let db = state.db.clone();
        let user_id = claims.sub.to_string();
        blocking(move || {
            db.get_user_by_id(&user_id)?
                .ok_or_else(|| ApiError::Unauthorized("User not found".into()))
        })
        .await?
    };

    let user = SessionUser {
        id: claims.sub,
        name: row.name,
        role: Role::parse(&row.role),
    };

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.presence, state.db, user)
    }))
}
