//! Read-only HTTP API over the engine's materialized tables.

mod http;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio_util::sync::CancellationToken;

use transit_engine::TableCatalog;

#[derive(Clone)]
pub(crate) struct AppState {
    tables: Arc<TableCatalog>,
}

pub fn router(tables: Arc<TableCatalog>) -> Router {
    Router::new()
        .route("/api/tables", get(http::handle_list_tables))
        .route("/api/tables/{name}", get(http::handle_table))
        .route("/api/tables/{name}/{key}", get(http::handle_entry))
        .with_state(AppState { tables })
}

/// Serve the table API on `port` until `shutdown` is cancelled.
pub async fn run(port: u16, tables: Arc<TableCatalog>, shutdown: CancellationToken) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| format!("bind api :{port}: {e}"))?;
    tracing::info!(port, "table api listening");

    axum::serve(listener, router(tables))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| format!("axum serve: {e}"))?;

    Ok(())
}
