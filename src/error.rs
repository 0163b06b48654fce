use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failure of one download job, independent of how it reaches the caller.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),
    #[error("error fetching video info: {0}")]
    MetadataFetch(String),
    #[error("failed to download media: {0}")]
    Download(String),
    #[error("unable to get file info: {0}")]
    FileStat(String),
    #[error("File not found")]
    NotFound,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: Some("INVALID_REQUEST"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }

    pub fn not_found() -> Self {
        Self::from(JobError::NotFound)
    }
}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        let (status, code) = match &error {
            JobError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            JobError::MetadataFetch(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "METADATA_FETCH_FAILED")
            }
            JobError::Download(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DOWNLOAD_FAILED"),
            JobError::FileStat(_) => (StatusCode::INTERNAL_SERVER_ERROR, "FILE_STAT_FAILED"),
            JobError::NotFound => (StatusCode::NOT_FOUND, "FILE_NOT_FOUND"),
        };

        Self {
            status,
            message: error.to_string(),
            code: Some(code),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}
