use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// The error surface of every handler. Each variant carries a stable
/// `kind` string and a human-readable detail; store failures are logged
/// server-side and answered with a generic body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated(_) => "authentication",
            ApiError::Forbidden(_) => "authorization",
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Store(_) => "store",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self {
            ApiError::Store(e) => {
                // The transaction already rolled back; answer generically.
                error!("store failure: {e:#}");
                "internal storage failure".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": { "kind": self.kind(), "detail": detail }
        }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ApiError::Unauthenticated(String::new()).kind(), "authentication");
        assert_eq!(ApiError::Forbidden(String::new()).kind(), "authorization");
        assert_eq!(ApiError::Validation(String::new()).kind(), "validation");
        assert_eq!(ApiError::NotFound("build").kind(), "not_found");
        assert_eq!(ApiError::Conflict(String::new()).kind(), "conflict");
        assert_eq!(ApiError::Store(anyhow::anyhow!("x")).kind(), "store");
    }

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(ApiError::Validation(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Conflict(String::new()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Store(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
