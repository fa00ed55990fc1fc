//! Timer window evaluation and filtration run time derived from water
//! temperature.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::{
    config::{ThresholdConfig, TimeWindow},
    error::ConfigurationError,
};

/// Pool turnovers per day at or below [`TURNOVER_REFERENCE_TEMP`].
pub const BASE_TURNOVER_FACTOR: f32 = 2.5;
/// Turnovers per day once the pool reaches its maximum temperature.
pub const MAX_TURNOVER_FACTOR: f32 = 4.0;
pub const TURNOVER_REFERENCE_TEMP: f32 = 20.0;

const MINUTES_PER_DAY: i64 = 24 * 60;

fn time_of_day(hour: u8, minute: u8) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)
}

/// Whether `now` falls inside `window`, bounds included.
///
/// A window whose start lies after its end spans midnight and is active on
/// both sides of it. Malformed windows are never active.
pub fn is_window_active(window: &TimeWindow, now: NaiveDateTime) -> bool {
    if !window.is_valid() {
        return false;
    }
    let (Some(start), Some(end)) = (
        time_of_day(window.start_hour, window.start_minute),
        time_of_day(window.end_hour, window.end_minute),
    ) else {
        return false;
    };

    let now = now.time().with_nanosecond(0).unwrap_or(now.time());
    if window.crosses_midnight() {
        now >= start || now <= end
    } else {
        start <= now && now <= end
    }
}

/// Turnovers per day for the given water temperature.
pub fn turnover_factor(pool_temp: f32, pool_max_temp: f32) -> f32 {
    if !pool_temp.is_finite() {
        return BASE_TURNOVER_FACTOR;
    }
    if pool_temp >= pool_max_temp {
        MAX_TURNOVER_FACTOR
    } else if pool_temp <= TURNOVER_REFERENCE_TEMP {
        BASE_TURNOVER_FACTOR
    } else {
        (BASE_TURNOVER_FACTOR * (pool_temp / TURNOVER_REFERENCE_TEMP)).min(MAX_TURNOVER_FACTOR)
    }
}

fn check_pump_sizing(thresholds: &ThresholdConfig) -> Result<(), ConfigurationError> {
    // Negated comparisons also reject NaN.
    if !(thresholds.pool_volume > 0.0) {
        return Err(ConfigurationError::PoolVolume(thresholds.pool_volume));
    }
    if !(thresholds.pump_capacity > 0.0) {
        return Err(ConfigurationError::PumpCapacity(thresholds.pump_capacity));
    }
    Ok(())
}

/// Hours of filtration needed per day: one turnover takes
/// `pool_volume / pump_capacity` hours.
pub fn filtration_hours(
    thresholds: &ThresholdConfig,
    pool_temp: f32,
) -> Result<f32, ConfigurationError> {
    check_pump_sizing(thresholds)?;
    let turnover_hours = thresholds.pool_volume / thresholds.pump_capacity;
    Ok(turnover_hours * turnover_factor(pool_temp, thresholds.pool_max_temp))
}

/// End of the filtration run when it starts at the window start and lasts as
/// long as [`filtration_hours`] requires. Runs of a day or longer end one
/// minute before the next start.
pub fn compute_duration_based_end(
    window: &TimeWindow,
    thresholds: &ThresholdConfig,
    pool_temp: f32,
) -> Result<NaiveTime, ConfigurationError> {
    let hours = filtration_hours(thresholds, pool_temp)?;
    let minutes = ((hours * 60.0).round() as i64).clamp(0, MINUTES_PER_DAY - 1);

    let start = time_of_day(window.start_hour, window.start_minute).unwrap_or(NaiveTime::MIN);
    Ok(start + Duration::minutes(minutes))
}

/// The window the pump should actually follow: the configured one, or the
/// configured start with a temperature-derived end when that is enabled.
///
/// An invalid pool reading keeps the configured window, but only once the
/// pump sizing itself is usable.
pub fn resolve_window(
    window: &TimeWindow,
    thresholds: &ThresholdConfig,
    pool_temp: f32,
) -> Result<TimeWindow, ConfigurationError> {
    if !thresholds.use_duration_from_temperature {
        return Ok(*window);
    }
    check_pump_sizing(thresholds)?;
    if !pool_temp.is_finite() {
        return Ok(*window);
    }

    let end = compute_duration_based_end(window, thresholds, pool_temp)?;
    Ok(TimeWindow {
        end_hour: end.hour() as u8,
        end_minute: end.minute() as u8,
        ..*window
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, 15)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn sized_pool(pool_max_temp: f32) -> ThresholdConfig {
        ThresholdConfig {
            pool_max_temp,
            pool_volume: 30.0,
            pump_capacity: 6.0,
            use_duration_from_temperature: true,
            ..ThresholdConfig::default()
        }
    }

    #[test]
    fn same_day_window() {
        let window = TimeWindow::new(10, 30, 16, 45);
        assert!(is_window_active(&window, at(12, 0)));
        assert!(!is_window_active(&window, at(9, 0)));
        assert!(!is_window_active(&window, at(17, 0)));
    }

    #[test]
    fn same_day_window_includes_bounds() {
        let window = TimeWindow::new(10, 30, 16, 45);
        assert!(is_window_active(&window, at(10, 30)));
        assert!(is_window_active(&window, at(16, 45)));
        assert!(!is_window_active(
            &window,
            at(16, 45) + Duration::seconds(1)
        ));
    }

    #[test]
    fn window_across_midnight() {
        let window = TimeWindow::new(22, 0, 2, 0);
        assert!(is_window_active(&window, at(23, 30)));
        assert!(is_window_active(&window, at(1, 0)));
        assert!(!is_window_active(&window, at(10, 0)));
    }

    #[test]
    fn malformed_window_is_inactive() {
        let window = TimeWindow::new(24, 0, 2, 0);
        assert!(!is_window_active(&window, at(23, 30)));
    }

    #[test]
    fn duration_at_reference_temperature() {
        let hours = filtration_hours(&sized_pool(28.5), 20.0).unwrap();
        assert_eq!(hours, 12.5);
    }

    #[test]
    fn duration_at_max_temperature() {
        let hours = filtration_hours(&sized_pool(28.5), 28.5).unwrap();
        assert_eq!(hours, 20.0);
    }

    #[test]
    fn duration_scales_between_reference_and_max() {
        let hours = filtration_hours(&sized_pool(28.5), 24.0).unwrap();
        assert!((hours - 15.0).abs() < 1e-4);
    }

    #[test]
    fn turnover_factor_is_capped() {
        // 2.5 * 35 / 20 = 4.375 without the cap.
        assert_eq!(turnover_factor(35.0, 40.0), MAX_TURNOVER_FACTOR);
        assert_eq!(turnover_factor(12.0, 28.5), BASE_TURNOVER_FACTOR);
        assert_eq!(turnover_factor(f32::NAN, 28.5), BASE_TURNOVER_FACTOR);
    }

    #[test]
    fn end_time_wraps_past_midnight() {
        let window = TimeWindow::new(10, 30, 17, 30);
        let end = compute_duration_based_end(&window, &sized_pool(28.5), 28.5).unwrap();
        assert_eq!(end, NaiveTime::from_hms_opt(6, 30, 0).unwrap());

        let end = compute_duration_based_end(&window, &sized_pool(28.5), 20.0).unwrap();
        assert_eq!(end, NaiveTime::from_hms_opt(23, 0, 0).unwrap());
    }

    #[test]
    fn runs_of_a_day_or_more_saturate() {
        let thresholds = ThresholdConfig {
            pool_volume: 100.0,
            pump_capacity: 2.0,
            ..sized_pool(28.5)
        };
        let window = TimeWindow::new(8, 0, 9, 0);
        let end = compute_duration_based_end(&window, &thresholds, 25.0).unwrap();
        assert_eq!(end, NaiveTime::from_hms_opt(7, 59, 0).unwrap());
    }

    #[test]
    fn non_positive_volume_or_capacity_is_a_configuration_error() {
        let window = TimeWindow::default();
        let no_volume = ThresholdConfig {
            pool_volume: 0.0,
            ..sized_pool(28.5)
        };
        assert_eq!(
            compute_duration_based_end(&window, &no_volume, 24.0),
            Err(ConfigurationError::PoolVolume(0.0))
        );

        let no_pump = ThresholdConfig {
            pump_capacity: -1.0,
            ..sized_pool(28.5)
        };
        assert_eq!(
            compute_duration_based_end(&window, &no_pump, 24.0),
            Err(ConfigurationError::PumpCapacity(-1.0))
        );
    }

    #[test]
    fn resolve_window_respects_the_enable_flag() {
        let window = TimeWindow::new(10, 30, 17, 30);
        let disabled = ThresholdConfig {
            use_duration_from_temperature: false,
            ..sized_pool(28.5)
        };
        assert_eq!(resolve_window(&window, &disabled, 24.0).unwrap(), window);

        let derived = resolve_window(&window, &sized_pool(28.5), 24.0).unwrap();
        assert_eq!(derived, TimeWindow::new(10, 30, 1, 30));
        assert!(derived.crosses_midnight());
    }

    #[test]
    fn resolve_window_keeps_configured_end_on_invalid_reading() {
        let window = TimeWindow::new(10, 30, 17, 30);
        assert_eq!(
            resolve_window(&window, &sized_pool(28.5), f32::NAN).unwrap(),
            window
        );
    }

    #[test]
    fn resolve_window_checks_pool_size_before_the_reading() {
        let window = TimeWindow::new(10, 30, 17, 30);
        let r#unsized = ThresholdConfig {
            use_duration_from_temperature: true,
            ..ThresholdConfig::default()
        };
        assert!(matches!(
            resolve_window(&window, &r#unsized, f32::NAN),
            Err(ConfigurationError::PoolVolume(_))
        ));
    }
}
