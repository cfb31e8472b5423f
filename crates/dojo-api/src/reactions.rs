use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};

use dojo_types::api::{Identity, ReactionRequest};

use crate::error::{ApiError, ApiResult};
use crate::{AppState, blocking, now_ts};

/// Set, replace, or clear the caller's reaction on a public build.
pub async fn toggle(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let summary = blocking(move || {
        let build = state
            .db
            .get_build(req.build_id)?
            .ok_or(ApiError::NotFound("build"))?;
        if !build.is_public {
            return Err(ApiError::Forbidden(
                "reactions are limited to public builds".to_string(),
            ));
        }
        state
            .db
            .set_reaction(req.build_id, user_id, req.kind, now_ts())
            .map_err(Into::into)
    })
    .await?;

    Ok(Json(summary))
}

pub async fn get(
    State(state): State<AppState>,
    Path(build_id): Path<i64>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let summary = blocking(move || {
        if state.db.get_build(build_id)?.is_none() {
            return Err(ApiError::NotFound("build"));
        }
        state
            .db
            .reaction_summary(build_id, user_id)
            .map_err(Into::into)
    })
    .await?;

    Ok(Json(summary))
}
