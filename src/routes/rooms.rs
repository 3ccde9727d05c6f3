use axum::{
    body::Bytes,
    extract::{Extension, Json, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::Config,
    error::{bad, room_not_found, AppResult},
    models::{Language, Room, Snapshot},
    store::RoomStore,
};

#[derive(Deserialize, Default)]
struct CreateRoom {
    language: Option<String>,
}

#[derive(Serialize)]
struct RoomJson {
    #[serde(rename = "roomId")]
    room_id:    String,
    code:       String,
    language:   Language,
    created_at: DateTime<Utc>,
}

impl From<Room> for RoomJson {
    fn from(r: Room) -> Self {
        RoomJson { room_id: r.id, code: r.code, language: r.language, created_at: r.created_at }
    }
}

pub fn router() -> Router {
    Router::new()
        .route("/rooms",                    post(create_room))
        .route("/rooms/:room_id",           get(get_room).delete(delete_room))
        .route("/rooms/:room_id/snapshots", get(list_snapshots))
}

/* ---------------- create ---------------- */
async fn create_room(
    Extension(store): Extension<Arc<dyn RoomStore>>,
    Extension(cfg): Extension<Config>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    // No body means defaults; a body that is there must parse.
    let req: CreateRoom = if body.iter().all(u8::is_ascii_whitespace) {
        CreateRoom::default()
    } else {
        serde_json::from_slice(&body).map_err(bad)?
    };
    let language = req
        .language
        .filter(|l| !l.trim().is_empty())
        .map(Language::from)
        .unwrap_or(cfg.default_language);

    let room = store.create(language).await?;
    Ok((StatusCode::CREATED, Json(RoomJson::from(room))))
}

/* ---------------- read ---------------- */
async fn get_room(
    Extension(store): Extension<Arc<dyn RoomStore>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomJson>> {
    let room = store.get(&room_id).await?.ok_or_else(|| room_not_found(&room_id))?;
    Ok(Json(room.into()))
}

async fn list_snapshots(
    Extension(store): Extension<Arc<dyn RoomStore>>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Vec<Snapshot>>> {
    if store.get(&room_id).await?.is_none() {
        return Err(room_not_found(&room_id));
    }
    Ok(Json(store.snapshots(&room_id).await?))
}

/* ---------------- delete ---------------- */
async fn delete_room(
    Extension(store): Extension<Arc<dyn RoomStore>>,
    Path(room_id): Path<String>,
) -> AppResult<StatusCode> {
    if !store.delete(&room_id).await? {
        return Err(room_not_found(&room_id));
    }
    Ok(StatusCode::NO_CONTENT)
}
