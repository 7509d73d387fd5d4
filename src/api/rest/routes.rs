use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::engine::manager::{self, NewRoute};
use crate::error::AppError;
use crate::models::route::Route;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/routes", post(create_route).get(list_routes))
        .route("/routes/:id", get(get_route))
}

async fn create_route(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewRoute>,
) -> Result<Json<Route>, AppError> {
    Ok(Json(manager::create_route(&state, payload)?))
}

async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<Route>> {
    let mut routes: Vec<Route> = state
        .routes
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    routes.sort_by(|a, b| a.name.cmp(&b.name));

    Json(routes)
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Route>, AppError> {
    Ok(Json(state.route(id)?))
}
