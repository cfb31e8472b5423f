use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use dojo_types::api::{CommentResponse, CreateCommentRequest, Identity, RecentCommentResponse};

use crate::error::{ApiError, ApiResult};
use crate::{AppState, blocking, now_ts};

const MAX_COMMENT_CHARS: usize = 500;

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateCommentRequest>,
) -> ApiResult<impl IntoResponse> {
    let body = req.body.trim().to_string();
    if body.is_empty() {
        return Err(ApiError::Validation("comment cannot be empty".to_string()));
    }
    if body.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::Validation(format!(
            "comment is too long (max {MAX_COMMENT_CHARS} characters)"
        )));
    }

    let user_id = identity.user_id;
    let comment_id = blocking(move || {
        if state.db.get_build(req.build_id)?.is_none() {
            return Err(ApiError::NotFound("build"));
        }
        state
            .db
            .insert_comment(req.build_id, user_id, &body, now_ts())
            .map_err(Into::into)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "ok", "comment_id": comment_id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub build_id: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = blocking(move || {
        if state.db.get_build(query.build_id)?.is_none() {
            return Err(ApiError::NotFound("build"));
        }
        state.db.list_comments(query.build_id).map_err(Into::into)
    })
    .await?;

    let comments: Vec<CommentResponse> = rows
        .into_iter()
        .map(|row| CommentResponse {
            comment_id: row.comment_id,
            build_id: row.build_id,
            user_id: row.user_id,
            author: row.author,
            avatar_url: row.avatar_url,
            body: row.body,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(serde_json::json!({ "status": "ok", "comments": comments })))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: u32,
}

fn default_recent_limit() -> u32 {
    3
}

/// Home feed: latest comments across public builds.
pub async fn recent(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.clamp(1, 10);
    let rows = blocking(move || state.db.recent_comments(limit).map_err(Into::into)).await?;

    let comments: Vec<RecentCommentResponse> = rows
        .into_iter()
        .map(|row| RecentCommentResponse {
            comment_id: row.comment_id,
            build_id: row.build_id,
            build_name: row.build_name,
            user_id: row.user_id,
            author: row.author,
            avatar_url: row.avatar_url,
            body: row.body,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(serde_json::json!({ "comments": comments })))
}
