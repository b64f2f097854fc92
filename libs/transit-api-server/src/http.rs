use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
struct TableSummary {
    name: String,
    entries: usize,
}

#[derive(Serialize)]
struct Entry {
    key: serde_json::Value,
    value: serde_json::Value,
}

#[derive(Serialize)]
struct TableContents {
    name: String,
    entries: Vec<Entry>,
}

fn not_found(what: String) -> Response {
    (StatusCode::NOT_FOUND, format!("error: {what} not found")).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/tables
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_list_tables(State(state): State<AppState>) -> Response {
    let tables: Vec<TableSummary> = state
        .tables
        .names()
        .into_iter()
        .filter_map(|name| {
            let table = state.tables.get(&name)?;
            Some(TableSummary {
                entries: table.len(),
                name,
            })
        })
        .collect();
    axum::Json(tables).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/tables/{name}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_table(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let Some(table) = state.tables.get(&name) else {
        return not_found(format!("table '{name}'"));
    };
    let entries = table
        .snapshot()
        .into_iter()
        .map(|(key, value)| Entry { key, value })
        .collect();
    axum::Json(TableContents { name, entries }).into_response()
}

// ═══════════════════════════════════════════════════════════════
//  GET /api/tables/{name}/{key}
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_entry(
    State(state): State<AppState>,
    Path((name, key)): Path<(String, String)>,
) -> Response {
    let Some(table) = state.tables.get(&name) else {
        return not_found(format!("table '{name}'"));
    };
    match table.get_json(&key) {
        Some(value) => axum::Json(value).into_response(),
        None => not_found(format!("key '{key}' in table '{name}'")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use transit_engine::table::NoChangelog;
    use transit_engine::{Line, MaterializedTable, TableCatalog, TransformedStation};

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn state() -> AppState {
        let mut table = MaterializedTable::<i64, TransformedStation>::new("stations_table", Box::new(NoChangelog));
        table
            .put(
                40380,
                TransformedStation {
                    station_id: 40380,
                    station_name: "Clark/Lake".into(),
                    order: 21,
                    line: Line::Blue,
                },
            )
            .unwrap();
        let tables = Arc::new(TableCatalog::new());
        tables.register(Arc::new(table.view()));
        AppState { tables }
    }

    #[tokio::test]
    async fn lists_tables_with_sizes() {
        let response = handle_list_tables(State(state())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            serde_json::json!([{"name": "stations_table", "entries": 1}])
        );
    }

    #[tokio::test]
    async fn returns_whole_table() {
        let response = handle_table(State(state()), Path("stations_table".into())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["entries"][0]["key"], 40380);
        assert_eq!(body["entries"][0]["value"]["line"], "blue");
    }

    #[tokio::test]
    async fn returns_single_entry() {
        let response = handle_entry(State(state()), Path(("stations_table".into(), "40380".into()))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["station_name"], "Clark/Lake");
    }

    #[tokio::test]
    async fn unknown_table_or_key_is_404() {
        let response = handle_table(State(state()), Path("nope".into())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = handle_entry(State(state()), Path(("stations_table".into(), "1".into()))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
