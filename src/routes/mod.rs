use axum::{routing::get, Extension, Json, Router, extract::DefaultBodyLimit};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{
    config::Config, registry::ConnectionRegistry, session::RoomSession, store::RoomStore,
    suggest::Suggester,
};

pub mod autocomplete;
pub mod rooms;
pub mod ws;

/// Everything handlers reach through `Extension`.
#[derive(Clone)]
pub struct Deps {
    pub config:    Config,
    pub store:     Arc<dyn RoomStore>,
    pub registry:  Arc<ConnectionRegistry>,
    pub suggester: Arc<dyn Suggester>,
}

pub fn router() -> Router {
    Router::new()
        .route("/",       get(root))
        .route("/health", get(health))
        .merge(rooms::router())
        .merge(autocomplete::router())
        .merge(ws::router())
}

pub fn app(deps: Deps) -> Router {
    let body_limit = deps.config.max_code_bytes + 64 * 1024;
    let session = Arc::new(RoomSession::new(
        deps.store.clone(),
        deps.registry.clone(),
        deps.config.max_code_bytes,
    ));

    router()
        .layer(Extension(deps.config))
        .layer(Extension(deps.store))
        .layer(Extension(deps.registry))
        .layer(Extension(deps.suggester))
        .layer(Extension(session))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Pair programming server is running",
        "version": env!("CARGO_PKG_VERSION"),
        "status":  "healthy",
    }))
}

async fn health(Extension(registry): Extension<Arc<ConnectionRegistry>>) -> Json<Value> {
    let mut active: Vec<String> = registry.all_active_rooms().await.into_iter().collect();
    active.sort();
    Json(json!({
        "status":       "healthy",
        "active_rooms": active,
        "connections":  registry.total_connections().await,
    }))
}


#[cfg(test)]
mod tests {
    use super::{test_support::*, *};
    use axum::{body::Body, http::{Request, StatusCode}};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_registry() {
        let app = app(test_deps().await);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["connections"], 0);
        assert!(json["active_rooms"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn root_is_alive() {
        let resp = app(test_deps().await)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
