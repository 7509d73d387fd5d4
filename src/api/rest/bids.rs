use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::bidding::{self, BidReceipt, ResolutionOutcome};
use crate::error::AppError;
use crate::models::bid::{Bid, BidWindow, WindowStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bid-windows", get(list_windows))
        .route("/bid-windows/:id", get(get_window))
        .route("/bid-windows/:id/bids", post(submit_bid).get(list_bids))
        .route("/bid-windows/:id/resolve", post(resolve))
}

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub status: Option<WindowStatus>,
    pub assignment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub driver_id: Uuid,
}

async fn list_windows(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Json<Vec<BidWindow>> {
    let mut windows: Vec<BidWindow> = state
        .bid_windows
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|w| query.status.is_none_or(|status| w.status == status))
        .filter(|w| query.assignment_id.is_none_or(|id| w.assignment_id == id))
        .collect();
    windows.sort_by_key(|w| w.opens_at);

    Json(windows)
}

async fn get_window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BidWindow>, AppError> {
    Ok(Json(state.bid_window(id)?))
}

async fn submit_bid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BidRequest>,
) -> Result<Json<BidReceipt>, AppError> {
    Ok(Json(bidding::submit_bid(&state, id, payload.driver_id)?))
}

async fn list_bids(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Bid>>, AppError> {
    state.bid_window(id)?;
    let mut bids: Vec<Bid> = state
        .bids
        .iter()
        .filter(|entry| entry.value().window_id == id)
        .map(|entry| entry.value().clone())
        .collect();
    bids.sort_by_key(|bid| bid.bid_at);

    Ok(Json(bids))
}

async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResolutionOutcome>, AppError> {
    Ok(Json(bidding::resolve_window(&state, id)?))
}
