//! Property tests for the decision engine.
//!
//! Host only; proptest does not build for the firmware targets.

#![cfg(not(target_os = "espidf"))]

use chrono::NaiveDate;
use poolctl_common::{
    clock::elapsed_ticks,
    config::SlotLayout,
    schedule::is_window_active,
    store::keys,
    ConfigStore, ControlRule, MemoryBackend, MemoryEeprom, NetworkTime, RelayState, RuleContext,
    SensorReading, SlotBackend, ThresholdConfig, TimeSource, TimeWindow,
};
use proptest::prelude::*;

/// 2026-07-01T08:00:00Z
const T0: i64 = 1_782_892_800;

struct SyncOnce(Option<i64>);

impl NetworkTime for SyncOnce {
    fn fetch_epoch(&mut self) -> Option<i64> {
        self.0.take()
    }
}

fn automatic(reading: SensorReading, thresholds: ThresholdConfig, solar_on: bool) -> ControlRule {
    ControlRule::Automatic(RuleContext {
        reading,
        thresholds,
        window_active: true,
        relays: RelayState {
            pool_pump_on: true,
            solar_pump_on: solar_on,
        },
    })
}

// ── control rules ─────────────────────────────────────────────

proptest! {
    /// Pool below its maximum minus hysteresis, collector at least as warm
    /// as the pool and above its minimum: solar switches on.
    #[test]
    fn automatic_turns_solar_on_when_heat_is_available(
        pool_max in 10.0f32..40.0,
        hysteresis in 0.0f32..5.0,
        solar_min in 0.0f32..60.0,
        pool_frac in 0.0f32..1.0,
        extra in 0.0f32..30.0,
    ) {
        let pool = (pool_max - hysteresis) * pool_frac;
        let solar = pool.max(solar_min) + extra;
        let thresholds = ThresholdConfig {
            pool_max_temp: pool_max,
            solar_min_temp: solar_min,
            hysteresis,
            ..ThresholdConfig::default()
        };

        let command = automatic(SensorReading::new(pool, solar), thresholds, false).evaluate();
        prop_assert_eq!(command.pool_pump, Some(true));
        prop_assert_eq!(command.solar_pump, Some(true));
    }

    /// A NaN on either probe always forces solar off.
    #[test]
    fn automatic_forces_solar_off_on_nan(
        other in -20.0f32..120.0,
        nan_on_pool in any::<bool>(),
        solar_on in any::<bool>(),
        pool_max in 0.0f32..40.0,
        hysteresis in 0.0f32..10.0,
    ) {
        let reading = if nan_on_pool {
            SensorReading::new(f32::NAN, other)
        } else {
            SensorReading::new(other, f32::NAN)
        };
        let thresholds = ThresholdConfig {
            pool_max_temp: pool_max,
            hysteresis,
            ..ThresholdConfig::default()
        };

        let command = automatic(reading, thresholds, solar_on).evaluate();
        prop_assert_eq!(command.solar_pump, Some(false));
    }
}

// ── schedule ──────────────────────────────────────────────────

proptest! {
    /// Window activity matches plain minute-of-day arithmetic.
    #[test]
    fn window_activity_matches_minute_arithmetic(
        start_h in 0u8..24, start_m in 0u8..60,
        end_h in 0u8..24, end_m in 0u8..60,
        now_h in 0u32..24, now_m in 0u32..60,
    ) {
        let window = TimeWindow::new(start_h, start_m, end_h, end_m);
        let now = NaiveDate::from_ymd_opt(2026, 5, 1)
            .unwrap()
            .and_hms_opt(now_h, now_m, 0)
            .unwrap();

        let start = window.start_minutes() as u32;
        let end = window.end_minutes() as u32;
        let minute = now_h * 60 + now_m;
        let expected = if start <= end {
            start <= minute && minute <= end
        } else {
            minute >= start || minute <= end
        };

        prop_assert_eq!(is_window_active(&window, now), expected);
    }
}

// ── persistence ───────────────────────────────────────────────

proptest! {
    #[test]
    fn in_range_floats_round_trip(value in 0.0f32..=40.0, fixed in any::<bool>()) {
        let mut store = ConfigStore::new(MemoryBackend::new("prop"));
        store.save_float(keys::POOL_MAX_TEMP, value).unwrap();
        prop_assert_eq!(store.load_float(keys::POOL_MAX_TEMP, 28.5), value);

        let layout = if fixed { SlotLayout::Fixed } else { SlotLayout::Hashed };
        let mut slots = ConfigStore::new(SlotBackend::new(MemoryEeprom::default(), layout));
        slots.save_float(keys::POOL_MAX_TEMP, value).unwrap();
        prop_assert_eq!(slots.load_float(keys::POOL_MAX_TEMP, 28.5), value);
    }

    #[test]
    fn out_of_range_floats_are_replaced(value in prop_oneof![-1000.0f32..-0.01, 40.01f32..1000.0]) {
        let mut store = ConfigStore::new(MemoryBackend::new("prop"));
        store.save_float(keys::POOL_MAX_TEMP, value).unwrap();
        prop_assert_eq!(store.load_float(keys::POOL_MAX_TEMP, 28.5), 28.5);
    }

    /// Random EEPROM contents never yield a value outside the sane range.
    #[test]
    fn garbage_eeprom_never_leaks_implausible_values(
        image in proptest::collection::vec(any::<u8>(), 512),
    ) {
        let store = ConfigStore::new(SlotBackend::new(
            MemoryEeprom::from_bytes(image),
            SlotLayout::Fixed,
        ));
        let hysteresis = store.load_float(keys::HYSTERESIS, 1.0);
        prop_assert!((0.0..=10.0).contains(&hysteresis));
        let hour = store.load_int(keys::TIMER_START_H, 10);
        prop_assert!((0..=23).contains(&hour));
    }
}

// ── time source ───────────────────────────────────────────────

proptest! {
    #[test]
    fn elapsed_ticks_is_wrap_safe(captured in any::<u32>(), dt in any::<u32>()) {
        prop_assert_eq!(elapsed_ticks(captured, captured.wrapping_add(dt)), dt as u64);
    }

    /// After one good sync the clock advances with the tick counter, across
    /// wraparound, and turns non-authoritative after a day.
    #[test]
    fn fallback_tracks_ticks(tick0 in any::<u32>(), dt in 0u32..(2 * 86_400_000)) {
        let mut source = TimeSource::new(SyncOnce(Some(T0)), 0);
        prop_assert_eq!(source.utc_epoch(tick0), T0);

        let now = source.now(tick0.wrapping_add(dt));
        prop_assert_eq!(now.utc_epoch, T0 + (dt / 1_000) as i64);
        prop_assert_eq!(now.valid, dt <= 86_400_000);
    }
}
