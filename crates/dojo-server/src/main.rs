mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use dojo_api::middleware::require_auth;
use dojo_api::{AppState, AppStateInner, builds, comments, mastery, profile, reactions};

use crate::config::Config;

/// Placeholder tokens that MUST NOT make it to production.
const PLACEHOLDER_TOKENS: &[&str] = &["", "change-me", "123456:TEST-TOKEN"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dojo=debug,tower_http=debug".into()),
        )
        .init();

    // Config — read once, passed around from here on.
    let cfg = Config::from_env()?;
    if PLACEHOLDER_TOKENS.contains(&cfg.bot_token.as_str()) {
        eprintln!("FATAL: DOJO_BOT_TOKEN is unset or still a placeholder.");
        eprintln!("       It signs user credentials and authorizes the moderation bot.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }
    if cfg.moderation_chat_id.is_empty() {
        warn!("DOJO_MODERATION_CHAT_ID is empty; application notifications will fail");
    }

    // Init database and media storage
    let db = dojo_db::Database::open(&cfg.db_path)?;
    let media = dojo_api::media::MediaStore::new(cfg.media_dir.clone()).await?;
    let notifier = dojo_api::notify::Notifier::new(&cfg.bot_token);

    let state: AppState = Arc::new(AppStateInner {
        db,
        bot_token: cfg.bot_token.clone(),
        auth_max_age_secs: cfg.auth_max_age_secs,
        media,
        notifier,
        moderation_chat_id: cfg.moderation_chat_id.clone(),
        moderation_topic_id: cfg.moderation_topic_id.clone(),
    });

    // Routes
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/api/builds.getPublic", get(builds::get_public))
        .route("/api/builds.search", get(builds::search))
        .route("/api/builds.get/{build_id}", get(builds::get_one))
        .route("/api/comments.get", get(comments::list))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/profile.get", get(profile::get_profile))
        .route("/api/profile.save", post(profile::save_profile))
        .route("/api/users.list", get(profile::list_users))
        .route("/api/users/{user_id}/avatar", post(profile::upload_avatar))
        .route("/api/builds.getMy", get(builds::get_my))
        .route("/api/builds.getUserBuilds", get(builds::get_user_builds))
        .route("/api/builds.create", post(builds::create))
        .route("/api/builds.update", post(builds::update))
        .route("/api/builds.togglePublish", post(builds::toggle_publish))
        .route("/api/builds.delete", delete(builds::delete))
        .route("/api/builds.toggleReaction", post(reactions::toggle))
        .route("/api/builds.getReactions/{build_id}", get(reactions::get))
        .route("/api/comments.create", post(comments::create))
        .route("/api/comments.recent", get(comments::recent))
        .route("/api/mastery.get", get(mastery::get))
        .route("/api/mastery.submitApplication", post(mastery::submit))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    // The moderation bot authenticates inside these handlers with its
    // static secret, not through the init-data middleware.
    let moderation_routes = Router::new()
        .route("/api/mastery.approve", post(mastery::approve))
        .route("/api/mastery.reject", post(mastery::reject))
        .route("/api/users/{user_id}", delete(profile::purge_user))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(moderation_routes)
        .nest_service("/media", ServeDir::new(&cfg.media_dir))
        .layer(DefaultBodyLimit::max(25 * 1024 * 1024))
        .layer(cors_layer(&cfg))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("Dojo API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

fn cors_layer(cfg: &Config) -> CorsLayer {
    if cfg.allowed_origins.is_empty() {
        warn!("DOJO_ALLOWED_ORIGINS is empty; CORS is wide open (dev mode)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = cfg
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring unparseable CORS origin {o:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            dojo_api::middleware::INIT_DATA_HEADER
                .parse()
                .expect("static header name"),
        ])
        .allow_credentials(true)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
