use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use dojo_db::models::{BuildRow, NewBuild, split_list};
use dojo_types::api::{BuildResponse, Identity, TogglePublishRequest};

use crate::error::{ApiError, ApiResult};
use crate::media;
use crate::{AppState, blocking, now_ts};

// -- Multipart form --

#[derive(Default)]
struct BuildForm {
    build_id: Option<i64>,
    name: Option<String>,
    class_name: Option<String>,
    tags: Option<String>,
    description: Option<String>,
    photo_1: Option<Bytes>,
    photo_2: Option<Bytes>,
}

/// Read the build form, skipping unknown fields the same way the update
/// whitelist drops unknown keys. Empty file parts count as absent.
async fn read_build_form(mut multipart: Multipart) -> ApiResult<BuildForm> {
    let bad_body = |e| ApiError::Validation(format!("bad multipart body: {e}"));

    let mut form = BuildForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        match field.name() {
            Some("build_id") => {
                let text = field.text().await.map_err(bad_body)?;
                form.build_id = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| ApiError::Validation("build_id must be an integer".to_string()))?,
                );
            }
            Some("name") => form.name = Some(field.text().await.map_err(bad_body)?),
            Some("class") => form.class_name = Some(field.text().await.map_err(bad_body)?),
            Some("tags") => form.tags = Some(field.text().await.map_err(bad_body)?),
            Some("description") => form.description = Some(field.text().await.map_err(bad_body)?),
            Some("photo_1") => {
                let bytes = field.bytes().await.map_err(bad_body)?;
                form.photo_1 = (!bytes.is_empty()).then_some(bytes);
            }
            Some("photo_2") => {
                let bytes = field.bytes().await.map_err(bad_body)?;
                form.photo_2 = (!bytes.is_empty()).then_some(bytes);
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Tags arrive either as a JSON array or as a comma-joined string,
/// depending on the client version.
pub(crate) fn parse_tags(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }
    split_list(trimmed)
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = read_build_form(multipart).await?;

    let name = required_text(form.name, "name")?;
    let class_name = required_text(form.class_name, "class")?;
    let tags = parse_tags(form.tags.as_deref().unwrap_or(""));
    let description = form.description.unwrap_or_default().trim().to_string();

    let photo_1 = form
        .photo_1
        .ok_or_else(|| ApiError::Validation("photo_1 is required".to_string()))?;
    let photo_2 = form
        .photo_2
        .ok_or_else(|| ApiError::Validation("photo_2 is required".to_string()))?;
    if media::sniff_image(&photo_1).is_none() || media::sniff_image(&photo_2).is_none() {
        return Err(ApiError::Validation("only images are allowed".to_string()));
    }

    // Author tag comes from the profile, denormalized onto the build.
    let db = state.clone();
    let user_id = identity.user_id;
    let author = blocking(move || db.db.get_user(user_id).map_err(Into::into))
        .await?
        .ok_or(ApiError::NotFound("profile"))?
        .gamer_tag;
    if author.is_empty() {
        return Err(ApiError::Validation(
            "set a gamer tag on your profile before publishing builds".to_string(),
        ));
    }

    let db = state.clone();
    let new_build = NewBuild {
        user_id: identity.user_id,
        author,
        name,
        class_name,
        tags,
        description,
        created_at: now_ts(),
    };
    let build_id = blocking(move || db.db.create_build(&new_build).map_err(Into::into)).await?;

    // Photos are processed after the row exists (paths are keyed by id);
    // if anything fails, the fresh row is compensated away.
    match store_photos(&state, build_id, photo_1, photo_2).await {
        Ok(()) => {}
        Err(e) => {
            let db = state.clone();
            let owner = identity.user_id;
            if let Err(cleanup) =
                blocking(move || db.db.delete_build(build_id, owner).map_err(Into::into)).await
            {
                warn!("failed to roll back build {build_id}: {cleanup}");
            }
            if let Err(cleanup) = state.media.remove_build_dir(build_id).await {
                warn!("failed to remove media for build {build_id}: {cleanup:#}");
            }
            return Err(e);
        }
    }

    info!("build {build_id} created by user {}", identity.user_id);
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "ok", "build_id": build_id })),
    ))
}

async fn store_photos(
    state: &AppState,
    build_id: i64,
    photo_1: Bytes,
    photo_2: Bytes,
) -> ApiResult<()> {
    let (jpeg_1, jpeg_2) = blocking(move || {
        let one = media::normalize_jpeg(&photo_1).map_err(|e| ApiError::Validation(e.to_string()))?;
        let two = media::normalize_jpeg(&photo_2).map_err(|e| ApiError::Validation(e.to_string()))?;
        Ok((one, two))
    })
    .await?;

    let url_1 = state
        .media
        .save_build_photo(build_id, 1, &jpeg_1)
        .await
        .map_err(ApiError::Store)?;
    let url_2 = state
        .media
        .save_build_photo(build_id, 2, &jpeg_2)
        .await
        .map_err(ApiError::Store)?;

    let db = state.clone();
    blocking(move || {
        db.db
            .set_build_photos(build_id, &url_1, &url_2)
            .map_err(Into::into)
    })
    .await
}

pub async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = read_build_form(multipart).await?;
    let build_id = form
        .build_id
        .ok_or_else(|| ApiError::Validation("build_id is required".to_string()))?;

    let db = state.clone();
    let existing = blocking(move || db.db.get_build(build_id).map_err(Into::into))
        .await?
        .ok_or(ApiError::NotFound("build"))?;
    if existing.user_id != identity.user_id {
        return Err(ApiError::Forbidden(
            "only the owner can change this build".to_string(),
        ));
    }

    let mut fields: Vec<(String, String)> = Vec::new();
    if let Some(name) = form.name {
        fields.push(("name".to_string(), required_text(Some(name), "name")?));
    }
    if let Some(class_name) = form.class_name {
        fields.push(("class".to_string(), required_text(Some(class_name), "class")?));
    }
    if let Some(tags) = form.tags {
        fields.push(("tags".to_string(), parse_tags(&tags).join(",")));
    }
    if let Some(description) = form.description {
        fields.push(("description".to_string(), description.trim().to_string()));
    }

    for (index, photo) in [(1u8, form.photo_1), (2u8, form.photo_2)] {
        let Some(raw) = photo else { continue };
        if media::sniff_image(&raw).is_none() {
            return Err(ApiError::Validation("only images are allowed".to_string()));
        }
        let jpeg = blocking(move || {
            media::normalize_jpeg(&raw).map_err(|e| ApiError::Validation(e.to_string()))
        })
        .await?;
        let url = state
            .media
            .save_build_photo(build_id, index, &jpeg)
            .await
            .map_err(ApiError::Store)?;
        fields.push((format!("photo_{index}"), url));
    }

    let db = state.clone();
    let owner = identity.user_id;
    let updated =
        blocking(move || db.db.update_build(build_id, owner, fields).map_err(Into::into)).await?;
    if !updated {
        return Err(ApiError::NotFound("build"));
    }

    Ok(Json(serde_json::json!({ "status": "ok", "build_id": build_id })))
}

pub async fn get_my(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let rows =
        blocking(move || state.db.list_builds_by_user(user_id, false).map_err(Into::into)).await?;
    Ok(build_list_response(rows))
}

pub async fn get_public(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = blocking(move || state.db.list_public_builds().map_err(Into::into)).await?;
    Ok(build_list_response(rows))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    10
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.limit.min(50);
    let rows = blocking(move || {
        state
            .db
            .search_public_builds(&params.query, limit)
            .map_err(Into::into)
    })
    .await?;
    Ok(build_list_response(rows))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(build_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let row = blocking(move || state.db.get_build(build_id).map_err(Into::into))
        .await?
        .ok_or(ApiError::NotFound("build"))?;
    if !row.is_public {
        return Err(ApiError::Forbidden("this build is private".to_string()));
    }
    Ok(Json(serde_json::json!({ "build": build_response(row) })))
}

#[derive(Debug, Deserialize)]
pub struct UserBuildsQuery {
    pub target_user_id: i64,
}

pub async fn get_user_builds(
    State(state): State<AppState>,
    Extension(_identity): Extension<Identity>,
    Query(query): Query<UserBuildsQuery>,
) -> ApiResult<impl IntoResponse> {
    let rows = blocking(move || {
        state
            .db
            .list_builds_by_user(query.target_user_id, true)
            .map_err(Into::into)
    })
    .await?;
    Ok(build_list_response(rows))
}

pub async fn toggle_publish(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<TogglePublishRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let updated = blocking(move || {
        state
            .db
            .set_build_visibility(req.build_id, user_id, req.is_public)
            .map_err(Into::into)
    })
    .await?;
    if !updated {
        return Err(ApiError::NotFound("build"));
    }
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct BuildIdQuery {
    pub build_id: i64,
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<BuildIdQuery>,
) -> ApiResult<impl IntoResponse> {
    let build_id = query.build_id;
    let user_id = identity.user_id;

    let db = state.clone();
    let deleted =
        blocking(move || db.db.delete_build(build_id, user_id).map_err(Into::into)).await?;
    if !deleted {
        return Err(ApiError::NotFound("build"));
    }

    // Row is gone (comments/reactions cascaded); the photo directory is
    // cleaned up outside the transaction.
    if let Err(e) = state.media.remove_build_dir(build_id).await {
        warn!("failed to remove media for build {build_id}: {e:#}");
    }

    info!("build {build_id} deleted by user {user_id}");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// -- Helpers --

fn required_text(value: Option<String>, field: &str) -> ApiResult<String> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        return Err(ApiError::Validation(format!("{field} is required")));
    }
    Ok(value)
}

pub(crate) fn build_response(row: BuildRow) -> BuildResponse {
    BuildResponse {
        build_id: row.build_id,
        user_id: row.user_id,
        author: row.author,
        name: row.name,
        class_name: row.class_name,
        tags: split_list(&row.tags),
        description: row.description,
        photo_1: row.photo_1,
        photo_2: row.photo_2,
        created_at: row.created_at,
        is_public: row.is_public,
    }
}

fn build_list_response(rows: Vec<BuildRow>) -> Json<serde_json::Value> {
    let builds: Vec<BuildResponse> = rows.into_iter().map(build_response).collect();
    Json(serde_json::json!({ "status": "ok", "builds": builds }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_accept_json_arrays() {
        assert_eq!(
            parse_tags(r#"["melee", " stealth ", ""]"#),
            vec!["melee", "stealth"]
        );
    }

    #[test]
    fn tags_accept_comma_strings() {
        assert_eq!(parse_tags("melee, stealth ,,"), vec!["melee", "stealth"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn malformed_json_falls_back_to_comma_parsing() {
        assert_eq!(parse_tags("[broken"), vec!["[broken"]);
    }
}
