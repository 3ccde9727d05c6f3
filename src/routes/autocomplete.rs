use axum::{
    extract::{Extension, Json},
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::Config,
    error::{bad, AppResult},
    models::Language,
    suggest::Suggester,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutocompleteReq {
    code: String,
    cursor_position: i64,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Serialize)]
struct AutocompleteResp {
    suggestion: String,
    confidence: f64,
    #[serde(rename = "type")]
    kind: &'static str,
}

pub fn router() -> Router {
    Router::new().route("/autocomplete", post(autocomplete))
}

async fn autocomplete(
    Extension(suggester): Extension<Arc<dyn Suggester>>,
    Extension(cfg): Extension<Config>,
    Json(req): Json<AutocompleteReq>,
) -> AppResult<Json<AutocompleteResp>> {
    let len = req.code.chars().count();
    let cursor = usize::try_from(req.cursor_position)
        .ok()
        .filter(|c| *c <= len)
        .ok_or_else(|| bad("Cursor position must be between 0 and the code length"))?;

    let language = req
        .language
        .filter(|l| !l.trim().is_empty())
        .map(Language::from)
        .unwrap_or(cfg.default_language);

    let s = suggester.suggest(&req.code, cursor, &language)?;
    Ok(Json(AutocompleteResp {
        suggestion: s.text,
        confidence: s.confidence.clamp(0.0, 1.0),
        kind: s.kind,
    }))
}
