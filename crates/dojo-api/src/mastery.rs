use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};

use dojo_db::mastery::{Decision, ResolveOutcome, SubmitOutcome};
use dojo_types::api::{Identity, ResolveApplicationRequest};
use dojo_types::models::MasteryCategory;

use crate::error::{ApiError, ApiResult};
use crate::media;
use crate::{AppState, blocking, now_ts};

/// Moderation routes authenticate with the bot's own token as a static
/// bearer secret — exact equality, nothing derived.
pub(crate) fn require_moderator(headers: &HeaderMap, expected: &str) -> ApiResult<()> {
    let supplied = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated("missing authorization header".to_string()))?;
    let token = supplied.strip_prefix("Bearer ").unwrap_or(supplied).trim();
    if token != expected {
        return Err(ApiError::Unauthenticated(
            "invalid moderation credential".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct MasteryQuery {
    pub target_user_id: Option<i64>,
}

pub async fn get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<MasteryQuery>,
) -> ApiResult<impl IntoResponse> {
    let target = query.target_user_id.unwrap_or(identity.user_id);
    let levels = blocking(move || state.db.mastery_levels(target).map_err(Into::into)).await?;
    Ok(Json(levels))
}

struct ApplicationForm {
    category: Option<String>,
    target_level: Option<i64>,
    evidence: Option<String>,
    photo: Option<Bytes>,
}

async fn read_application_form(mut multipart: Multipart) -> ApiResult<ApplicationForm> {
    let bad_body = |e| ApiError::Validation(format!("bad multipart body: {e}"));

    let mut form = ApplicationForm {
        category: None,
        target_level: None,
        evidence: None,
        photo: None,
    };
    while let Some(field) = multipart.next_field().await.map_err(bad_body)? {
        match field.name() {
            Some("category") => form.category = Some(field.text().await.map_err(bad_body)?),
            Some("target_level") => {
                let text = field.text().await.map_err(bad_body)?;
                form.target_level = Some(text.trim().parse().map_err(|_| {
                    ApiError::Validation("target_level must be an integer".to_string())
                })?);
            }
            Some("evidence") => form.evidence = Some(field.text().await.map_err(bad_body)?),
            // Clients may attach several shots; the first one travels
            // with the moderation notification.
            Some("photo") if form.photo.is_none() => {
                let bytes = field.bytes().await.map_err(bad_body)?;
                form.photo = (!bytes.is_empty()).then_some(bytes);
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Submit a tier-upgrade application: Idle -> PendingApproval for this
/// (user, category), then a notification to the moderation chat.
pub async fn submit(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let form = read_application_form(multipart).await?;

    let category = form
        .category
        .as_deref()
        .and_then(MasteryCategory::parse)
        .ok_or_else(|| ApiError::Validation("unknown mastery category".to_string()))?;
    let target_level = form
        .target_level
        .ok_or_else(|| ApiError::Validation("target_level is required".to_string()))?;
    if target_level < 1 {
        return Err(ApiError::Validation(
            "target_level must be positive".to_string(),
        ));
    }
    let evidence = form.evidence.unwrap_or_default().trim().to_string();

    if let Some(photo) = &form.photo {
        if media::sniff_image(photo).is_none() {
            return Err(ApiError::Validation("only images are allowed".to_string()));
        }
    }

    let db = state.clone();
    let user_id = identity.user_id;
    let gamer_tag = blocking(move || db.db.get_user(user_id).map_err(Into::into))
        .await?
        .ok_or(ApiError::NotFound("profile"))?
        .gamer_tag;
    if gamer_tag.is_empty() {
        return Err(ApiError::Validation(
            "set a gamer tag on your profile before applying".to_string(),
        ));
    }

    let db = state.clone();
    let evidence_for_store = evidence.clone();
    let (outcome, current) = blocking(move || {
        let current = db.db.mastery_levels(user_id)?.get(category);
        let outcome =
            db.db
                .submit_application(user_id, category, target_level, &evidence_for_store, now_ts())?;
        Ok((outcome, current))
    })
    .await?;

    match outcome {
        SubmitOutcome::Accepted => {}
        SubmitOutcome::AlreadyPending => {
            return Err(ApiError::Conflict(format!(
                "an application for {category} is already pending"
            )));
        }
        SubmitOutcome::NotAnUpgrade { current } => {
            return Err(ApiError::Validation(format!(
                "requested tier {target_level} is not above the current tier {current}"
            )));
        }
    }

    // The pending row is committed; the moderation ping is best-effort.
    let caption = format!(
        "🏆 <b>Mastery application</b>\n\n\
         👤 <b>Player:</b> {gamer_tag}\n\
         📂 <b>Category:</b> {category}\n\
         📊 <b>Current tier:</b> {current}\n\
         ⬆️ <b>Requested tier:</b> {target_level}\n\
         💬 <b>Evidence:</b> {evidence}",
        evidence = if evidence.is_empty() { "—" } else { evidence.as_str() },
    );
    let topic = state.moderation_topic_id.as_deref();
    let sent = match form.photo {
        Some(photo) => {
            match blocking(move || {
                media::normalize_jpeg(&photo).map_err(|e| ApiError::Validation(e.to_string()))
            })
            .await
            {
                Ok(jpeg) => {
                    state
                        .notifier
                        .send_photo(&state.moderation_chat_id, &caption, jpeg, topic)
                        .await
                }
                Err(e) => {
                    // Fall back to text rather than failing a committed submit.
                    warn!("application photo unusable: {e}");
                    state
                        .notifier
                        .send_message(&state.moderation_chat_id, &caption, topic)
                        .await
                }
            }
        }
        None => {
            state
                .notifier
                .send_message(&state.moderation_chat_id, &caption, topic)
                .await
        }
    };
    if let Err(e) = sent {
        warn!("failed to notify moderation chat: {e:#}");
    }

    info!("mastery application: user {user_id} {category} -> {target_level}");
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Commit the pending tier. Idempotent-safe: with nothing pending this is
/// a 404 and no mutation.
pub async fn approve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResolveApplicationRequest>,
) -> ApiResult<impl IntoResponse> {
    require_moderator(&headers, &state.bot_token)?;

    let db = state.clone();
    let outcome = blocking(move || {
        db.db
            .resolve_application(req.user_id, req.category, Decision::Approve)
            .map_err(Into::into)
    })
    .await?;

    let level = match outcome {
        ResolveOutcome::Approved { level } => level,
        _ => return Err(ApiError::NotFound("pending application")),
    };

    let text = format!(
        "✅ <b>Your mastery application was approved!</b>\n\n\
         Category: <b>{}</b>\n\
         Current tier: <b>{level}</b>",
        req.category,
    );
    if let Err(e) = state
        .notifier
        .send_message(&req.user_id.to_string(), &text, None)
        .await
    {
        warn!("failed to notify user {} of approval: {e:#}", req.user_id);
    }

    info!(
        "mastery approved: user {} {} -> {level} (by {})",
        req.user_id, req.category, req.moderator
    );
    Ok(Json(serde_json::json!({
        "status": "ok",
        "user_id": req.user_id,
        "category": req.category,
        "level": level,
    })))
}

/// Discard the pending tier, leaving the current one untouched.
pub async fn reject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResolveApplicationRequest>,
) -> ApiResult<impl IntoResponse> {
    require_moderator(&headers, &state.bot_token)?;

    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::Validation("reason is required".to_string()))?
        .to_string();

    let db = state.clone();
    let outcome = blocking(move || {
        db.db
            .resolve_application(req.user_id, req.category, Decision::Reject)
            .map_err(Into::into)
    })
    .await?;

    if outcome != ResolveOutcome::Rejected {
        return Err(ApiError::NotFound("pending application"));
    }

    let text = format!(
        "❌ <b>Your mastery application was declined.</b>\n\n\
         Category: <b>{}</b>\n\
         Reason: {reason}",
        req.category,
    );
    if let Err(e) = state
        .notifier
        .send_message(&req.user_id.to_string(), &text, None)
        .await
    {
        warn!("failed to notify user {} of rejection: {e:#}", req.user_id);
    }

    info!(
        "mastery rejected: user {} {} (by {})",
        req.user_id, req.category, req.moderator
    );
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn moderator_guard_accepts_exact_token_with_or_without_scheme() {
        assert!(require_moderator(&headers_with("123:ABC"), "123:ABC").is_ok());
        assert!(require_moderator(&headers_with("Bearer 123:ABC"), "123:ABC").is_ok());
    }

    #[test]
    fn moderator_guard_rejects_everything_else() {
        assert!(require_moderator(&HeaderMap::new(), "123:ABC").is_err());
        assert!(require_moderator(&headers_with("123:abc"), "123:ABC").is_err());
        assert!(require_moderator(&headers_with("Bearer"), "123:ABC").is_err());
        assert!(require_moderator(&headers_with(""), "123:ABC").is_err());
    }
}
