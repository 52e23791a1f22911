mod auth;
mod config;
mod dao;
mod error;
mod model;
mod resolver;
mod routes;
mod store;
#[cfg(test)]
mod testing;
mod utils;
mod visits;

use axum::serve;
use config::Config;
use dao::PgStore;
use dotenvy::dotenv;
use routes::{create_router, AppState};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::net::SocketAddr;
use std::sync::Arc;
use store::{MemorialStore, MemoryStore};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_TRACING_LEVEL: &str = "memorial_qr=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    _ = dotenv();
    configure_tracing();
    let config = Config::from_env();
    let store = create_store(&config).await;
    let listener = create_listener(&config.server_address).await;
    let router = create_router(AppState::new(store, config));
    serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}

fn configure_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or(DEFAULT_TRACING_LEVEL.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn create_store(config: &Config) -> Arc<dyn MemorialStore> {
    match &config.database_url {
        Some(database_url) => {
            let db_connection_pool =
                create_db_connection_pool(database_url, config.database_max_connections).await;
            sqlx::migrate!()
                .run(&db_connection_pool)
                .await
                .expect("Running database migrations failed");
            tracing::info!("Database migrations applied");
            Arc::new(PgStore::new(db_connection_pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, memorials are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn create_db_connection_pool(database_url: &str, max_connections: u32) -> Pool<Postgres> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .expect("Creating database connection pool failed")
}

async fn create_listener(server_address: &str) -> TcpListener {
    let listener = TcpListener::bind(&server_address)
        .await
        .expect("Creating tcp listener failed");
    tracing::info!("Listening on address: {}", server_address);
    listener
}
