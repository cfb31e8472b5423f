use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use dojo_types::api::Identity;

use crate::AppState;
use crate::error::ApiError;

/// Header carrying the raw Telegram init data on every authenticated call.
pub const INIT_DATA_HEADER: &str = "x-telegram-init-data";

/// Validate the init-data credential and inject the caller's [`Identity`]
/// as a request extension. Any failure is a 401; the response never echoes
/// payload contents.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw = req
        .headers()
        .get(INIT_DATA_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated(format!("missing {INIT_DATA_HEADER} header")))?;

    let verified = dojo_auth::init_data::verify(raw, &state.bot_token, state.auth_max_age_secs)
        .map_err(|e| {
            debug!("init data rejected: {e}");
            ApiError::Unauthenticated("invalid credentials".to_string())
        })?;

    let display_name = if verified.user.first_name.is_empty() {
        None
    } else {
        Some(verified.user.first_name.clone())
    };
    req.extensions_mut().insert(Identity {
        user_id: verified.user.id,
        display_name,
        username: verified.user.username,
    });

    Ok(next.run(req).await)
}
