use axum::extract::{Multipart, Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use tracing::{info, warn};

use dojo_db::models::{ProfileUpdate, UserRow, split_list};
use dojo_types::api::{Identity, ProfileResponse, SaveProfileRequest, UserSummary};

use crate::error::{ApiError, ApiResult};
use crate::mastery::require_moderator;
use crate::media;
use crate::{AppState, blocking, now_ts};

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let row = blocking(move || state.db.get_user(user_id).map_err(Into::into))
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok(Json(profile_response(row)))
}

pub async fn save_profile(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SaveProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(ApiError::Validation("display_name is required".to_string()));
    }
    let gamer_tag = req.gamer_tag.trim().to_string();
    if !valid_gamer_tag(&gamer_tag) {
        return Err(ApiError::Validation(
            "gamer_tag must be 3-16 characters: A-Z, a-z, 0-9, -, _".to_string(),
        ));
    }

    let user_id = identity.user_id;
    let update = ProfileUpdate {
        display_name,
        gamer_tag,
        platforms: req.platforms,
        modes: req.modes,
        goals: req.goals,
        difficulties: req.difficulties,
    };
    blocking(move || {
        state
            .db
            .upsert_profile(user_id, &update, now_ts())
            .map_err(Into::into)
    })
    .await?;

    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let rows = blocking(move || state.db.list_users().map_err(Into::into)).await?;
    let users: Vec<UserSummary> = rows
        .into_iter()
        .map(|row| UserSummary {
            user_id: row.user_id,
            gamer_tag: row.gamer_tag,
            avatar_url: row.avatar_url,
            has_public_builds: row.builds_count > 0,
            builds_count: row.builds_count,
            has_mastery_progress: row.has_mastery_progress,
        })
        .collect();
    Ok(Json(serde_json::json!({ "users": users })))
}

/// Owner-only avatar upload: multipart with one image part, normalized to
/// a square JPEG and written under the media root before the URL is
/// recorded on the profile.
pub async fn upload_avatar(
    State(state): State<AppState>,
    Path(target_user_id): Path<i64>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    if target_user_id != identity.user_id {
        return Err(ApiError::Forbidden(
            "you can only upload your own avatar".to_string(),
        ));
    }

    let mut raw: Option<bytes::Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("bad multipart body: {e}")))?
    {
        if field.name() == Some("avatar") {
            raw = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("bad multipart body: {e}")))?,
            );
        }
    }
    let raw = raw.ok_or_else(|| ApiError::Validation("missing avatar field".to_string()))?;
    if media::sniff_image(&raw).is_none() {
        return Err(ApiError::Validation("only images are allowed".to_string()));
    }

    let jpeg = blocking(move || {
        media::normalize_avatar(&raw).map_err(|e| ApiError::Validation(e.to_string()))
    })
    .await?;

    let avatar_url = state
        .media
        .save_avatar(identity.user_id, &jpeg)
        .await
        .map_err(ApiError::Store)?;

    let db = state.clone();
    let user_id = identity.user_id;
    let url = avatar_url.clone();
    let updated = blocking(move || db.db.set_avatar_url(user_id, &url).map_err(Into::into)).await?;
    if !updated {
        // An avatar without a profile has nothing to hang off.
        return Err(ApiError::NotFound("profile"));
    }

    info!("avatar updated for user {}", identity.user_id);
    Ok(Json(serde_json::json!({ "status": "ok", "avatar_url": avatar_url })))
}

/// Moderation-bot route: purge everything a departed user left behind.
pub async fn purge_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    require_moderator(&headers, &state.bot_token)?;

    let db = state.clone();
    let (deleted, build_ids) =
        blocking(move || db.db.delete_user_data(user_id).map_err(Into::into)).await?;
    if !deleted {
        return Err(ApiError::NotFound("user"));
    }

    // Media cleanup happens after the transaction committed; leftovers
    // are only disk garbage, so failures just log.
    if let Err(e) = state.media.remove_user_dir(user_id).await {
        warn!("failed to remove media for user {user_id}: {e:#}");
    }
    for build_id in build_ids {
        if let Err(e) = state.media.remove_build_dir(build_id).await {
            warn!("failed to remove media for build {build_id}: {e:#}");
        }
    }

    info!("purged all data for user {user_id}");
    Ok(Json(serde_json::json!({ "status": "ok", "user_id": user_id })))
}

fn profile_response(row: UserRow) -> ProfileResponse {
    ProfileResponse {
        user_id: row.user_id,
        display_name: row.display_name,
        gamer_tag: row.gamer_tag,
        platforms: split_list(&row.platforms),
        modes: split_list(&row.modes),
        goals: split_list(&row.goals),
        difficulties: split_list(&row.difficulties),
        avatar_url: row.avatar_url,
        updated_at: row.updated_at,
    }
}

fn valid_gamer_tag(tag: &str) -> bool {
    (3..=16).contains(&tag.len())
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamer_tag_rules() {
        assert!(valid_gamer_tag("ghost_of_ramen"));
        assert!(valid_gamer_tag("abc"));
        assert!(valid_gamer_tag("A-1_b"));
        assert!(!valid_gamer_tag("ab"));
        assert!(!valid_gamer_tag("seventeen-chars-xx"));
        assert!(!valid_gamer_tag("with space"));
        assert!(!valid_gamer_tag("кириллица"));
        assert!(!valid_gamer_tag(""));
    }
}
