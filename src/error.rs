use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("returned parcels ({returned}) exceed starting parcels ({start})")]
    ReturnsExceedStart { start: u32, returned: u32 },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(Conflict),

    #[error("outside allowed window: {0}")]
    Window(WindowViolation),

    #[error("assignment already taken by another driver")]
    AlreadyAssigned,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Requested transition does not match the current lifecycle state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Conflict {
    #[error("assignment is already confirmed")]
    AlreadyConfirmed,
    #[error("assignment has not been confirmed")]
    NotConfirmed,
    #[error("driver has already arrived")]
    AlreadyArrived,
    #[error("driver has not arrived")]
    NotArrived,
    #[error("shift already started")]
    AlreadyStarted,
    #[error("shift has not started")]
    NotStarted,
    #[error("shift already completed")]
    AlreadyCompleted,
    #[error("shift is not completed")]
    NotCompleted,
    #[error("shift has already started; cancellation is no longer possible")]
    CancellationAfterStart,
    #[error("assignment is {actual}, expected {expected}")]
    InvalidStatus {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("bid window is not open")]
    WindowNotOpen,
    #[error("driver already bid on this window")]
    AlreadyBid,
    #[error("driver is not eligible for new work")]
    DriverIneligible,
    #[error("driver has reached the weekly shift cap")]
    WeeklyCapReached,
    #[error("driver already works a route on this date")]
    DoubleBooked,
    #[error("preferences for this week are locked")]
    PreferencesLocked,
    #[error("preferences for this week have not been locked")]
    WeekNotLocked,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowViolation {
    #[error("outside the confirmation window")]
    OutsideConfirmationWindow,
    #[error("arrival deadline has passed")]
    ArrivalDeadlinePassed,
    #[error("arrival is only accepted on the shift date")]
    NotShiftDay,
    #[error("edit window has expired")]
    EditWindowExpired,
    #[error("bid window has closed")]
    BidWindowClosed,
}

impl From<Conflict> for AppError {
    fn from(conflict: Conflict) -> Self {
        AppError::Conflict(conflict)
    }
}

impl From<WindowViolation> for AppError {
    fn from(violation: WindowViolation) -> Self {
        AppError::Window(violation)
    }
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) | AppError::ReturnsExceedStart { .. } => "validation",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "state_conflict",
            AppError::Window(_) => "window_violation",
            AppError::AlreadyAssigned => "race_lost",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn code(&self) -> String {
        match self {
            AppError::ReturnsExceedStart { .. } => "ReturnsExceedStart".to_string(),
            AppError::AlreadyAssigned => "AlreadyAssigned".to_string(),
            AppError::Conflict(Conflict::InvalidStatus { .. }) => "InvalidStatus".to_string(),
            AppError::Conflict(conflict) => format!("{conflict:?}"),
            AppError::Window(violation) => format!("{violation:?}"),
            other => other.kind().to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::ReturnsExceedStart { .. } => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) | AppError::AlreadyAssigned => StatusCode::CONFLICT,
            AppError::Window(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}
