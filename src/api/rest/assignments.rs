use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::lifecycle::{self, CancellationOutcome, CompletionInput, ShiftEdit};
use crate::engine::manager;
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::bid::BidWindow;
use crate::models::shift::Shift;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assignments", get(list_assignments))
        .route("/assignments/:id", get(get_assignment))
        .route("/assignments/:id/shift", get(get_shift).patch(edit_shift))
        .route("/assignments/:id/confirm", post(confirm))
        .route("/assignments/:id/arrive", post(arrive))
        .route("/assignments/:id/start", post(start))
        .route("/assignments/:id/complete", post(complete))
        .route("/assignments/:id/cancel", post(cancel))
        .route("/assignments/:id/assign", post(manual_assign))
        .route("/assignments/:id/emergency", post(emergency_reopen))
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignmentQuery {
    pub date: Option<NaiveDate>,
    pub week_start: Option<NaiveDate>,
    pub driver_id: Option<Uuid>,
    pub route_id: Option<Uuid>,
    pub status: Option<AssignmentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct DriverRequest {
    pub driver_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub driver_id: Uuid,
    pub parcels_start: i64,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub driver_id: Uuid,
    #[serde(flatten)]
    pub completion: CompletionInput,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub driver_id: Uuid,
    #[serde(flatten)]
    pub edit: ShiftEdit,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub driver_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManualAssignRequest {
    pub manager_id: Uuid,
    pub driver_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct EmergencyRequest {
    pub manager_id: Uuid,
    #[serde(default)]
    pub pay_bonus_pct: Option<u8>,
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentQuery>,
) -> Json<Vec<Assignment>> {
    let week = query
        .week_start
        .map(|monday| (monday, monday + Duration::days(6)));

    let mut assignments: Vec<Assignment> = state
        .assignments
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|a| query.date.is_none_or(|date| a.date == date))
        .filter(|a| week.is_none_or(|(from, to)| a.date >= from && a.date <= to))
        .filter(|a| query.driver_id.is_none_or(|id| a.user_id == Some(id)))
        .filter(|a| query.route_id.is_none_or(|id| a.route_id == id))
        .filter(|a| query.status.is_none_or(|status| a.status == status))
        .collect();
    assignments.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.route_id.cmp(&b.route_id)));

    Json(assignments)
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(state.assignment(id)?))
}

async fn get_shift(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Shift>, AppError> {
    let shift = state
        .shifts
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("no shift recorded for assignment {id}")))?;

    Ok(Json(shift.value().clone()))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(lifecycle::confirm(&state, id, payload.driver_id)?))
}

async fn arrive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Shift>, AppError> {
    Ok(Json(lifecycle::arrive(&state, id, payload.driver_id)?))
}

async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<Shift>, AppError> {
    Ok(Json(lifecycle::record_start(
        &state,
        id,
        payload.driver_id,
        payload.parcels_start,
    )?))
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Shift>, AppError> {
    Ok(Json(lifecycle::complete(
        &state,
        id,
        payload.driver_id,
        payload.completion,
    )?))
}

async fn edit_shift(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EditRequest>,
) -> Result<Json<Shift>, AppError> {
    Ok(Json(lifecycle::edit_shift(
        &state,
        id,
        payload.driver_id,
        payload.edit,
    )?))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<CancellationOutcome>, AppError> {
    Ok(Json(lifecycle::cancel(
        &state,
        id,
        payload.driver_id,
        payload.reason,
    )?))
}

async fn manual_assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualAssignRequest>,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(manager::manual_assign(
        &state,
        id,
        payload.driver_id,
        payload.manager_id,
    )?))
}

async fn emergency_reopen(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<EmergencyRequest>,
) -> Result<Json<BidWindow>, AppError> {
    Ok(Json(manager::emergency_reopen(
        &state,
        id,
        payload.manager_id,
        payload.pay_bonus_pct,
    )?))
}
