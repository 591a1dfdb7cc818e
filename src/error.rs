//! Error type shared by the service and the trainer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required multipart field was absent.
    #[error("No {0} provided")]
    MissingField(&'static str),

    #[error("Image too large (max {max_mb}MB)")]
    ImageTooLarge { size: usize, max_mb: usize },

    #[error("Invalid multipart payload: {0}")]
    Multipart(String),

    #[error("Image decoding error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Backend error: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Variant name reported to HTTP callers in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MissingField(_) => "MissingField",
            Error::ImageTooLarge { .. } => "ImageTooLarge",
            Error::Multipart(_) => "Multipart",
            Error::Decode(_) => "Decode",
            Error::Model(_) => "Model",
            Error::Backend(_) => "Backend",
            Error::Config(_) => "Config",
            Error::Dataset(_) => "Dataset",
            Error::Io(_) => "Io",
            Error::Serialization(_) => "Serialization",
        }
    }

    /// Input problems are the caller's fault; everything else is ours.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingField(_) | Error::ImageTooLarge { .. } | Error::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tensorflow::Status> for Error {
    fn from(status: tensorflow::Status) -> Self {
        Error::Model(status.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<axum::extract::multipart::MultipartError> for Error {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        Error::Multipart(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status == StatusCode::BAD_REQUEST {
            json!({ "success": false, "error": self.to_string() })
        } else {
            json!({ "success": false, "error": self.to_string(), "type": self.kind() })
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
