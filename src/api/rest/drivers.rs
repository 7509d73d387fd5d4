use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::manager::{self, NewDriver};
use crate::engine::preferences::{self, PreferencesInput};
use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::history::HealthSnapshot;
use crate::models::preferences::DriverPreferences;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/preferences", put(set_preferences).get(list_preferences))
        .route("/drivers/:id/health", get(health_history))
        .route("/drivers/:id/unflag", post(unflag))
        .route("/drivers/:id/reinstate", post(reinstate))
        .route("/drivers/:id/cap", put(set_cap))
        .route("/drivers/:id/deactivate", post(deactivate))
}

#[derive(Debug, Deserialize)]
pub struct ManagerRequest {
    pub manager_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CapRequest {
    pub manager_id: Uuid,
    pub weekly_cap: u8,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewDriver>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(manager::create_driver(&state, payload)?))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    let mut drivers: Vec<Driver> = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    drivers.sort_by(|a, b| a.name.cmp(&b.name));

    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(state.driver(id)?))
}

async fn set_preferences(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PreferencesInput>,
) -> Result<Json<DriverPreferences>, AppError> {
    Ok(Json(preferences::set_preferences(&state, id, payload)?))
}

async fn list_preferences(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DriverPreferences>>, AppError> {
    state.driver(id)?;
    let mut found: Vec<DriverPreferences> = state
        .preferences
        .iter()
        .filter(|entry| entry.key().0 == id)
        .map(|entry| entry.value().clone())
        .collect();
    found.sort_by_key(|prefs| prefs.week_start);

    Ok(Json(found))
}

async fn health_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<HealthSnapshot>>, AppError> {
    state.driver(id)?;
    let mut snapshots: Vec<HealthSnapshot> = state
        .health_snapshots
        .iter()
        .filter(|entry| entry.key().0 == id)
        .map(|entry| entry.value().clone())
        .collect();
    snapshots.sort_by_key(|snapshot| snapshot.date);

    Ok(Json(snapshots))
}

async fn unflag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManagerRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(manager::unflag(&state, id, payload.manager_id)?))
}

async fn reinstate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManagerRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(manager::reinstate(&state, id, payload.manager_id)?))
}

async fn set_cap(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CapRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(manager::set_weekly_cap(
        &state,
        id,
        payload.manager_id,
        payload.weekly_cap,
    )?))
}

async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManagerRequest>,
) -> Result<Json<Driver>, AppError> {
    Ok(Json(manager::deactivate_driver(&state, id, payload.manager_id)?))
}
