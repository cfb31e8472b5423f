use serde::{Deserialize, Serialize};

use crate::models::{MasteryCategory, ReactionKind};

// -- Identity --

/// Verified caller identity injected by the auth middleware. Canonical
/// definition lives here in dojo-types so the API crate and the server
/// share one type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub display_name: Option<String>,
    pub username: Option<String>,
}

// -- Profile --

#[derive(Debug, Deserialize)]
pub struct SaveProfileRequest {
    pub display_name: String,
    pub gamer_tag: String,
    #[serde(default)]
    pub platforms: Vec<String>,
    #[serde(default)]
    pub modes: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub difficulties: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: i64,
    pub display_name: String,
    pub gamer_tag: String,
    pub platforms: Vec<String>,
    pub modes: Vec<String>,
    pub goals: Vec<String>,
    pub difficulties: Vec<String>,
    pub avatar_url: Option<String>,
    pub updated_at: i64,
}

/// Directory entry for the community roster.
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub user_id: i64,
    pub gamer_tag: String,
    pub avatar_url: Option<String>,
    pub builds_count: i64,
    pub has_public_builds: bool,
    pub has_mastery_progress: bool,
}

// -- Builds --

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub build_id: i64,
    pub user_id: i64,
    pub author: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub tags: Vec<String>,
    pub description: String,
    pub photo_1: String,
    pub photo_2: String,
    pub created_at: i64,
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TogglePublishRequest {
    pub build_id: i64,
    pub is_public: bool,
}

// -- Comments --

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub build_id: i64,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub comment_id: i64,
    pub build_id: i64,
    pub user_id: i64,
    pub author: String,
    pub avatar_url: Option<String>,
    pub body: String,
    pub created_at: i64,
}

/// Home-feed entry: a recent comment with its build's headline data.
#[derive(Debug, Serialize)]
pub struct RecentCommentResponse {
    pub comment_id: i64,
    pub build_id: i64,
    pub build_name: String,
    pub user_id: i64,
    pub author: String,
    pub avatar_url: Option<String>,
    pub body: String,
    pub created_at: i64,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub build_id: i64,
    pub kind: ReactionKind,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReactionSummary {
    pub likes: i64,
    pub dislikes: i64,
    pub mine: Option<ReactionKind>,
}

// -- Mastery --

#[derive(Debug, Deserialize)]
pub struct ResolveApplicationRequest {
    pub user_id: i64,
    pub category: MasteryCategory,
    pub moderator: String,
    /// Required by the reject route, ignored by approve.
    #[serde(default)]
    pub reason: Option<String>,
}
