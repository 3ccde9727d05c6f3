mod config;
mod error;
mod models;
mod protocol;
mod registry;
mod routes;
mod session;
mod store;
mod suggest;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    registry::ConnectionRegistry,
    routes::Deps,
    store::SqliteRoomStore,
    suggest::RuleSuggester,
};
use error::AppErr;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg   = Config::from_env()?;
    let store = SqliteRoomStore::connect(&cfg.database_url).await?;
    let rules = RuleSuggester::new()?;
    let registry = Arc::new(ConnectionRegistry::new(cfg.send_timeout));

    let app = routes::app(Deps {
        config:    cfg.clone(),
        store:     Arc::new(store),
        registry,
        suggester: Arc::new(rules),
    });

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(addr = %cfg.bind_addr, db = %cfg.database_url, "listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
