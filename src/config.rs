use std::env;

use chrono::NaiveTime;
use chrono_tz::Tz;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub policy: DispatchPolicy,
}

/// Business constants shared by every engine component.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub timezone: Tz,
    pub default_weekly_cap: u8,
    pub max_weekly_cap: u8,
    pub confirmation_window_days: i64,
    pub confirmation_deadline_hours: i64,
    pub confirmation_reminder_lead_hours: i64,
    pub late_cancellation_hours: i64,
    pub arrival_deadline: NaiveTime,
    pub edit_window_minutes: i64,
    pub instant_mode_threshold_hours: i64,
    pub emergency_window_minutes: i64,
    pub emergency_bonus_pct: u8,
    pub flag_grace_days: i64,
    pub new_driver_shift_floor: u32,
    pub new_driver_attendance_threshold: f64,
    pub attendance_threshold: f64,
    pub reward_min_confirmed: u32,
    pub reward_min_attendance: f64,
    pub completion_lookback_shifts: usize,
    pub health_window_days: i64,
    pub hard_stop_score_ceiling: u8,
    pub hard_stop_late_cancellations: u32,
    pub weekly_completion_bar: f64,
    pub max_stars: u8,
    pub corrective_score_threshold: u8,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::Toronto,
            default_weekly_cap: 4,
            max_weekly_cap: 6,
            confirmation_window_days: 7,
            confirmation_deadline_hours: 48,
            confirmation_reminder_lead_hours: 24,
            late_cancellation_hours: 48,
            arrival_deadline: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            edit_window_minutes: 60,
            instant_mode_threshold_hours: 24,
            emergency_window_minutes: 120,
            emergency_bonus_pct: 20,
            flag_grace_days: 7,
            new_driver_shift_floor: 10,
            new_driver_attendance_threshold: 0.80,
            attendance_threshold: 0.70,
            reward_min_confirmed: 20,
            reward_min_attendance: 0.95,
            completion_lookback_shifts: 20,
            health_window_days: 30,
            hard_stop_score_ceiling: 49,
            hard_stop_late_cancellations: 2,
            weekly_completion_bar: 0.95,
            max_stars: 4,
            corrective_score_threshold: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            policy: DispatchPolicy::from_env()?,
        })
    }
}

impl DispatchPolicy {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let policy = Self {
            timezone: parse_or_default("DISPATCH_TIMEZONE", defaults.timezone)?,
            default_weekly_cap: parse_or_default(
                "DISPATCH_DEFAULT_WEEKLY_CAP",
                defaults.default_weekly_cap,
            )?,
            max_weekly_cap: parse_or_default("DISPATCH_MAX_WEEKLY_CAP", defaults.max_weekly_cap)?,
            confirmation_window_days: parse_or_default(
                "DISPATCH_CONFIRMATION_WINDOW_DAYS",
                defaults.confirmation_window_days,
            )?,
            confirmation_deadline_hours: parse_or_default(
                "DISPATCH_CONFIRMATION_DEADLINE_HOURS",
                defaults.confirmation_deadline_hours,
            )?,
            confirmation_reminder_lead_hours: parse_or_default(
                "DISPATCH_CONFIRMATION_REMINDER_LEAD_HOURS",
                defaults.confirmation_reminder_lead_hours,
            )?,
            late_cancellation_hours: parse_or_default(
                "DISPATCH_LATE_CANCELLATION_HOURS",
                defaults.late_cancellation_hours,
            )?,
            arrival_deadline: parse_time_or_default(
                "DISPATCH_ARRIVAL_DEADLINE",
                defaults.arrival_deadline,
            )?,
            edit_window_minutes: parse_or_default(
                "DISPATCH_EDIT_WINDOW_MINUTES",
                defaults.edit_window_minutes,
            )?,
            instant_mode_threshold_hours: parse_or_default(
                "DISPATCH_INSTANT_MODE_THRESHOLD_HOURS",
                defaults.instant_mode_threshold_hours,
            )?,
            emergency_window_minutes: parse_or_default(
                "DISPATCH_EMERGENCY_WINDOW_MINUTES",
                defaults.emergency_window_minutes,
            )?,
            emergency_bonus_pct: parse_or_default(
                "DISPATCH_EMERGENCY_BONUS_PCT",
                defaults.emergency_bonus_pct,
            )?,
            flag_grace_days: parse_or_default("DISPATCH_FLAG_GRACE_DAYS", defaults.flag_grace_days)?,
            hard_stop_score_ceiling: parse_or_default(
                "DISPATCH_HARD_STOP_SCORE_CEILING",
                defaults.hard_stop_score_ceiling,
            )?,
            health_window_days: parse_or_default(
                "DISPATCH_HEALTH_WINDOW_DAYS",
                defaults.health_window_days,
            )?,
            ..defaults
        };

        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.default_weekly_cap == 0 || self.default_weekly_cap > self.max_weekly_cap {
            return Err(AppError::Internal(format!(
                "default weekly cap {} must be within 1..={}",
                self.default_weekly_cap, self.max_weekly_cap
            )));
        }

        if self.confirmation_window_days * 24 <= self.confirmation_deadline_hours {
            return Err(AppError::Internal(
                "confirmation window must open before the confirmation deadline".to_string(),
            ));
        }

        if self.hard_stop_score_ceiling > 100 {
            return Err(AppError::Internal(
                "hard-stop score ceiling must be at most 100".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_time_or_default(key: &str, default: NaiveTime) -> Result<NaiveTime, AppError> {
    match env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
