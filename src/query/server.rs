use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::index::{Catalog, Leaf};
use crate::stats::IndexStats;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub page: String,
    pub section: String,
    pub selector: String,
    pub priority: i32,
}

impl From<Leaf> for SearchHit {
    fn from(leaf: Leaf) -> Self {
        Self {
            id: leaf.id,
            text: leaf.text,
            page: leaf.page,
            section: leaf.section,
            selector: leaf.selector,
            priority: leaf.priority,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub default_limit: usize,
}

pub struct QueryServer {
    pub state: AppState,
}

impl QueryServer {
    pub fn new(catalog: Arc<Catalog>, default_limit: usize) -> Self {
        Self {
            state: AppState {
                catalog,
                default_limit,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/search", get(search_handler))
            .route("/status", get(status_handler))
            .with_state(self.state.clone())
    }

    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        tracing::info!("HTTP Query Server listening on port {}", port);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

pub fn search(state: &AppState, params: &SearchParams) -> Vec<SearchHit> {
    let limit = params.limit.unwrap_or(state.default_limit);
    state
        .catalog
        .search(&params.q)
        .into_iter()
        .take(limit)
        .map(SearchHit::from)
        .collect()
}

async fn search_handler(
    Query(params): Query<SearchParams>,
    State(state): State<AppState>,
) -> Json<Vec<SearchHit>> {
    Json(search(&state, &params))
}

async fn status_handler(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.catalog.stats())
}
