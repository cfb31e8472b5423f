pub mod builds;
pub mod comments;
pub mod error;
pub mod mastery;
pub mod media;
pub mod middleware;
pub mod notify;
pub mod profile;
pub mod reactions;

use std::sync::Arc;

use anyhow::anyhow;

use dojo_db::Database;

use crate::error::ApiError;
use crate::media::MediaStore;
use crate::notify::Notifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    /// Bot token: signing secret for user init data AND the static
    /// bearer credential for the moderation routes.
    pub bot_token: String,
    /// Replay budget for init-data `auth_date`.
    pub auth_max_age_secs: i64,
    pub media: MediaStore,
    pub notifier: Notifier,
    /// Chat (and optional forum topic) that receives mastery applications.
    pub moderation_chat_id: String,
    pub moderation_topic_id: Option<String>,
}

/// Run blocking rusqlite work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Store(anyhow!("blocking task join error: {e}")))?
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
