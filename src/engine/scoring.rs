use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::bid::ScoreBreakdown;
use crate::models::driver::Driver;
use crate::models::preferences::DriverPreferences;

const COMPLETION_WEIGHT: f64 = 0.40;
const FAMILIARITY_WEIGHT: f64 = 0.30;
const ATTENDANCE_WEIGHT: f64 = 0.20;
const PREFERENCE_WEIGHT: f64 = 0.10;

/// Completions on a route after which familiarity stops adding score.
const FAMILIARITY_SATURATION: f64 = 20.0;

pub fn compute_score(
    driver: &Driver,
    route_id: Uuid,
    preferences: Option<&DriverPreferences>,
) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        completion_score: driver.metrics.completion_rate.clamp(0.0, 1.0),
        familiarity_score: familiarity_score(driver.route_familiarity(route_id)),
        attendance_score: driver.metrics.attendance_rate.clamp(0.0, 1.0),
        preference_score: preference_score(route_id, preferences),
    };

    let score = weighted_score(&breakdown);
    (score, breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.completion_score * COMPLETION_WEIGHT)
        + (breakdown.familiarity_score * FAMILIARITY_WEIGHT)
        + (breakdown.attendance_score * ATTENDANCE_WEIGHT)
        + (breakdown.preference_score * PREFERENCE_WEIGHT)
}

fn familiarity_score(route_completions: u32) -> f64 {
    (route_completions as f64 / FAMILIARITY_SATURATION).min(1.0)
}

fn preference_score(route_id: Uuid, preferences: Option<&DriverPreferences>) -> f64 {
    match preferences {
        Some(prefs) if prefs.ranks_route(route_id) => 1.0,
        _ => 0.0,
    }
}

/// Highest score first; equal scores go to the earlier bid.
pub fn compare_bids(
    a: (f64, DateTime<Utc>),
    b: (f64, DateTime<Utc>),
) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use chrono::{Duration, NaiveDate, Utc, Weekday};
    use uuid::Uuid;

    use super::{compare_bids, compute_score};
    use crate::models::driver::Driver;
    use crate::models::preferences::DriverPreferences;

    fn driver(completion: f64, attendance: f64, route: Uuid, completions: u32) -> Driver {
        let mut driver = Driver::new("test-driver".to_string(), 4, Utc::now());
        driver.metrics.completion_rate = completion;
        driver.metrics.attendance_rate = attendance;
        driver.route_completions.insert(route, completions);
        driver
    }

    fn prefs(driver: &Driver, routes: Vec<Uuid>) -> DriverPreferences {
        DriverPreferences {
            driver_id: driver.id,
            week_start: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            weekdays: vec![Weekday::Mon],
            preferred_routes: routes,
            updated_at: Utc::now(),
            locked_at: None,
        }
    }

    #[test]
    fn weights_match_published_formula() {
        let route = Uuid::from_u128(9);
        let candidate = driver(0.9, 0.8, route, 10);
        let preferences = prefs(&candidate, vec![route]);

        let (score, breakdown) = compute_score(&candidate, route, Some(&preferences));

        assert!((breakdown.familiarity_score - 0.5).abs() < 1e-9);
        assert!((score - (0.4 * 0.9 + 0.3 * 0.5 + 0.2 * 0.8 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn familiarity_saturates_at_twenty_completions() {
        let route = Uuid::from_u128(9);

        let (_, veteran) = compute_score(&driver(1.0, 1.0, route, 45), route, None);
        let (_, exact) = compute_score(&driver(1.0, 1.0, route, 20), route, None);

        assert_eq!(veteran.familiarity_score, 1.0);
        assert_eq!(exact.familiarity_score, 1.0);
    }

    #[test]
    fn only_top_three_preferences_count() {
        let route = Uuid::from_u128(9);
        let candidate = driver(1.0, 1.0, route, 0);
        let fourth = prefs(
            &candidate,
            vec![Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3), route],
        );

        let (_, breakdown) = compute_score(&candidate, route, Some(&fourth));

        assert_eq!(breakdown.preference_score, 0.0);
    }

    #[test]
    fn ties_go_to_earliest_bid() {
        let early = Utc::now();
        let late = early + Duration::seconds(5);

        assert_eq!(compare_bids((0.7, early), (0.7, late)), Ordering::Less);
        assert_eq!(compare_bids((0.6, early), (0.7, late)), Ordering::Greater);
    }
}
