use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc, Weekday,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeekOfMonth {
    First,
    Second,
    Third,
    Fourth,
    Last,
}

/// One clock change: "the `week` `weekday` of `month` at `hour` local time,
/// after which local time is UTC + `offset_minutes`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub abbrev: &'static str,
    pub week: WeekOfMonth,
    pub weekday: Weekday,
    pub month: u32,
    pub hour: u32,
    pub offset_minutes: i32,
}

impl TransitionRule {
    /// Wall-clock instant of the transition in `year`, expressed in the
    /// offset that is in force just before it.
    fn local_instant(&self, year: i32) -> Option<NaiveDateTime> {
        let date = match self.week {
            WeekOfMonth::First => NaiveDate::from_weekday_of_month_opt(year, self.month, self.weekday, 1),
            WeekOfMonth::Second => NaiveDate::from_weekday_of_month_opt(year, self.month, self.weekday, 2),
            WeekOfMonth::Third => NaiveDate::from_weekday_of_month_opt(year, self.month, self.weekday, 3),
            WeekOfMonth::Fourth => NaiveDate::from_weekday_of_month_opt(year, self.month, self.weekday, 4),
            WeekOfMonth::Last => last_weekday_of_month(year, self.month, self.weekday),
        }?;
        date.and_hms_opt(self.hour, 0, 0)
    }
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }?;

    let mut day = first_of_next.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeZoneProfile {
    pub name: &'static str,
    pub daylight: TransitionRule,
    pub standard: TransitionRule,
}

impl TimeZoneProfile {
    pub fn observes_dst(&self) -> bool {
        self.daylight.offset_minutes != self.standard.offset_minutes
    }

    /// Rule in force at the given UTC instant.
    pub fn rule_at(&self, utc: NaiveDateTime) -> &TransitionRule {
        if self.is_daylight(utc) {
            &self.daylight
        } else {
            &self.standard
        }
    }

    /// Short name of the offset in force, e.g. "CEST".
    pub fn abbreviation(&self, utc: NaiveDateTime) -> &'static str {
        self.rule_at(utc).abbrev
    }

    pub fn is_daylight(&self, utc: NaiveDateTime) -> bool {
        if !self.observes_dst() {
            return false;
        }

        let year = utc.year();
        let (Some(dst_local), Some(std_local)) = (
            self.daylight.local_instant(year),
            self.standard.local_instant(year),
        ) else {
            return false;
        };

        // Daylight starts while standard time is in force and vice versa.
        let dst_start = dst_local - Duration::minutes(self.standard.offset_minutes as i64);
        let std_start = std_local - Duration::minutes(self.daylight.offset_minutes as i64);

        if dst_start < std_start {
            utc >= dst_start && utc < std_start
        } else {
            // Southern hemisphere: daylight time spans the turn of the year.
            !(utc >= std_start && utc < dst_start)
        }
    }

    pub fn to_local(&self, utc: NaiveDateTime) -> DateTime<FixedOffset> {
        let offset_secs = self.rule_at(utc).offset_minutes * 60;
        let offset = FixedOffset::east_opt(offset_secs).unwrap_or_else(|| Utc.fix());
        DateTime::from_naive_utc_and_offset(utc, offset)
    }
}

const fn rule(
    abbrev: &'static str,
    week: WeekOfMonth,
    month: u32,
    hour: u32,
    offset_minutes: i32,
) -> TransitionRule {
    TransitionRule {
        abbrev,
        week,
        weekday: Weekday::Sun,
        month,
        hour,
        offset_minutes,
    }
}

const fn fixed(name: &'static str, abbrev: &'static str, offset_minutes: i32) -> TimeZoneProfile {
    let only = rule(abbrev, WeekOfMonth::First, 3, 0, offset_minutes);
    TimeZoneProfile {
        name,
        daylight: only,
        standard: only,
    }
}

/// Selectable timezones. The persisted timezone index points into this table,
/// so entries may be appended but never reordered.
pub const PROFILES: [TimeZoneProfile; 10] = [
    TimeZoneProfile {
        name: "Central European",
        daylight: rule("CEST", WeekOfMonth::Last, 3, 2, 120),
        standard: rule("CET", WeekOfMonth::Last, 10, 3, 60),
    },
    TimeZoneProfile {
        name: "Eastern European",
        daylight: rule("EEST", WeekOfMonth::Last, 3, 3, 180),
        standard: rule("EET", WeekOfMonth::Last, 10, 4, 120),
    },
    TimeZoneProfile {
        name: "Western European",
        daylight: rule("BST", WeekOfMonth::Last, 3, 1, 60),
        standard: rule("GMT", WeekOfMonth::Last, 10, 2, 0),
    },
    TimeZoneProfile {
        name: "US Eastern",
        daylight: rule("EDT", WeekOfMonth::Second, 3, 2, -240),
        standard: rule("EST", WeekOfMonth::First, 11, 2, -300),
    },
    TimeZoneProfile {
        name: "US Central",
        daylight: rule("CDT", WeekOfMonth::Second, 3, 2, -300),
        standard: rule("CST", WeekOfMonth::First, 11, 2, -360),
    },
    TimeZoneProfile {
        name: "US Mountain",
        daylight: rule("MDT", WeekOfMonth::Second, 3, 2, -360),
        standard: rule("MST", WeekOfMonth::First, 11, 2, -420),
    },
    TimeZoneProfile {
        name: "US Pacific",
        daylight: rule("PDT", WeekOfMonth::Second, 3, 2, -420),
        standard: rule("PST", WeekOfMonth::First, 11, 2, -480),
    },
    TimeZoneProfile {
        name: "Australian Eastern",
        daylight: rule("AEDT", WeekOfMonth::First, 10, 2, 660),
        standard: rule("AEST", WeekOfMonth::First, 4, 3, 600),
    },
    fixed("Japan", "JST", 9 * 60),
    fixed("China", "CST", 8 * 60),
];

pub fn profile(index: usize) -> Option<&'static TimeZoneProfile> {
    PROFILES.get(index)
}

pub fn describe(index: usize) -> &'static str {
    profile(index).map(|profile| profile.name).unwrap_or("UTC")
}
