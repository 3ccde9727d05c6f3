use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::fmt::Display;

use crate::{config::ConfigError, registry::TransportError, store::StorageError, suggest::SuggestError};

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Bad(String),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("suggest: {0}")]
    Suggest(#[from] SuggestError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let (code, detail) = match self {
            AppErr::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppErr::Bad(msg)      => (StatusCode::BAD_REQUEST, msg),
            AppErr::Suggest(e) => {
                tracing::error!(error = %e, "autocomplete failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate autocomplete suggestion".into())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (code, Json(json!({ "detail": detail }))).into_response()
    }
}

/* ── helpers: turn any displayable error into NotFound / Bad ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }

pub fn room_not_found(room_id: &str) -> AppErr {
    AppErr::NotFound(format!("Room {room_id} not found"))
}
