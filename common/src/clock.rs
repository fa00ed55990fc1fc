//! Wall-clock time derived from an unreliable network time source.
//!
//! [`TimeSource`] caches the last plausible network time together with the
//! monotonic tick count at which it arrived. When a later fetch fails the
//! cached value is extrapolated with the elapsed ticks, so local time keeps
//! moving forward through network outages. After [`SYNC_STALE_AFTER_MS`]
//! without a good fetch the estimate is still returned but flagged invalid.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::{debug, warn};

use crate::{ports::NetworkTime, timezone};

/// Fetches before 2020-01-01T00:00:00Z are treated as an unsynced RTC.
pub const MIN_VALID_EPOCH: i64 = 1_577_836_800;

pub const SYNC_STALE_AFTER_MS: u64 = 24 * 60 * 60 * 1_000;

/// Milliseconds between two readings of a wrapping `u32` tick counter.
///
/// A current value numerically below the captured one means the counter
/// wrapped in between; the distance is then measured through `u32::MAX`.
pub fn elapsed_ticks(captured: u32, current: u32) -> u64 {
    if current < captured {
        (u32::MAX - captured) as u64 + current as u64 + 1
    } else {
        (current - captured) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTime {
    pub utc_epoch: i64,
    pub local: DateTime<FixedOffset>,
    /// Abbreviation of the offset in `local`.
    pub zone: &'static str,
    /// False when time was never synced or the last sync is older than
    /// [`SYNC_STALE_AFTER_MS`].
    pub valid: bool,
}

impl LocalTime {
    pub fn naive(&self) -> NaiveDateTime {
        self.local.naive_local()
    }
}

#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    epoch: i64,
    captured_tick: u32,
}

pub struct TimeSource<N> {
    network: N,
    timezone_index: usize,
    last_good: Option<SyncPoint>,
    sync_valid: bool,
}

impl<N: NetworkTime> TimeSource<N> {
    pub fn new(network: N, timezone_index: usize) -> Self {
        let mut source = Self {
            network,
            timezone_index: 0,
            last_good: None,
            sync_valid: false,
        };
        source.set_timezone(timezone_index);
        source
    }

    /// Selects a profile from [`timezone::PROFILES`]. Returns false and keeps
    /// the current selection when `index` is out of range.
    pub fn set_timezone(&mut self, index: usize) -> bool {
        if timezone::profile(index).is_none() {
            warn!("ignoring unknown timezone index {index}");
            return false;
        }
        self.timezone_index = index;
        true
    }

    pub fn timezone_index(&self) -> usize {
        self.timezone_index
    }

    pub fn timezone_name(&self) -> &'static str {
        timezone::describe(self.timezone_index)
    }

    pub fn is_sync_valid(&self) -> bool {
        self.sync_valid
    }

    /// Best-known UTC epoch seconds at `now_tick`.
    pub fn utc_epoch(&mut self, now_tick: u32) -> i64 {
        if let Some(epoch) = self.network.fetch_epoch() {
            if epoch >= MIN_VALID_EPOCH {
                if !self.sync_valid {
                    debug!("network time accepted: {epoch}");
                }
                self.last_good = Some(SyncPoint {
                    epoch,
                    captured_tick: now_tick,
                });
                self.sync_valid = true;
                return epoch;
            }
            debug!("rejecting implausible network time {epoch}");
        }

        let Some(point) = self.last_good else {
            self.sync_valid = false;
            return 0;
        };

        let elapsed_ms = elapsed_ticks(point.captured_tick, now_tick);
        if elapsed_ms > SYNC_STALE_AFTER_MS && self.sync_valid {
            warn!(
                "no network time for {}h, local time is no longer authoritative",
                elapsed_ms / 3_600_000
            );
            self.sync_valid = false;
        }

        point.epoch + (elapsed_ms / 1_000) as i64
    }

    pub fn now(&mut self, now_tick: u32) -> LocalTime {
        let utc_epoch = self.utc_epoch(now_tick);
        let utc = DateTime::from_timestamp(utc_epoch, 0)
            .unwrap_or_default()
            .naive_utc();

        // An index is only ever stored after validation.
        let (local, zone) = match timezone::profile(self.timezone_index) {
            Some(profile) => (profile.to_local(utc), profile.abbreviation(utc)),
            None => (utc.and_utc().fixed_offset(), "UTC"),
        };

        LocalTime {
            utc_epoch,
            local,
            zone,
            valid: self.sync_valid,
        }
    }
}
