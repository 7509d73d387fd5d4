use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::engine::jobs::{self, JobKind, JobParams, JobReport};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/:name", post(run_job))
}

#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    pub week_start: Option<NaiveDate>,
}

async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<JobQuery>,
) -> Result<Json<JobReport>, AppError> {
    let job: JobKind = name.parse()?;
    let report = jobs::run_job(
        &state,
        job,
        JobParams {
            week_start: query.week_start,
        },
    )?;

    Ok(Json(report))
}
