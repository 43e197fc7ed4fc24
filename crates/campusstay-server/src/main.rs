use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use campusstay_api::auth::{self, AppState, AppStateInner};
use campusstay_api::conversations;
use campusstay_api::listings;
use campusstay_api::messages;
use campusstay_api::middleware::require_auth;
use campusstay_api::storage::ImageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campusstay=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CAMPUSSTAY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CAMPUSSTAY_DB_PATH").unwrap_or_else(|_| "campusstay.db".into());
    let upload_dir =
        std::env::var("CAMPUSSTAY_UPLOAD_DIR").unwrap_or_else(|_| "uploads".into());
    let host = std::env::var("CAMPUSSTAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CAMPUSSTAY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database and image storage
    let db = campusstay_db::Database::open(&PathBuf::from(&db_path))?;
    let images = ImageStore::new(PathBuf::from(&upload_dir)).await?;
    let uploads_dir = images.dir().to_path_buf();

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        images,
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/listings", get(listings::get_listings))
        .route("/api/listings/recommendations/{id}", get(listings::get_recommendations))
        .route("/api/listings/{id}", get(listings::get_listing))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/listings", post(listings::create_listing))
        .route("/api/listings/{id}", put(listings::update_listing))
        .route("/api/listings/{id}", delete(listings::delete_listing))
        .route("/api/messages", get(conversations::get_all_conversations))
        .route("/api/messages", post(messages::send_message))
        .route("/api/messages/{listing_id}/{user_id}", get(messages::get_conversation))
        .route("/api/messages/{id}", delete(messages::delete_message))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        // listing creation carries up to 5 images at 5 MiB each
        .layer(DefaultBodyLimit::max(30 * 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("CampusStay server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
