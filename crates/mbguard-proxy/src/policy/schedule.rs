//! Maintenance windows: time-of-day intervals in which whitelisted
//! engineering stations may write.
//!
//! Both boundaries are inclusive. A window whose end precedes its start
//! wraps past midnight (`22:00`..`02:00`).

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};

use mbguard_core::error::{MbGuardError, Result};

use crate::config::WindowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MaintenanceWindow {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }
}

/// Ordered set of windows plus the local offset they are written in.
#[derive(Debug, Clone)]
pub struct MaintenanceSchedule {
    windows: Vec<MaintenanceWindow>,
    offset: FixedOffset,
}

impl Default for MaintenanceSchedule {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            offset: Utc.fix(),
        }
    }
}

impl MaintenanceSchedule {
    pub fn new(mut windows: Vec<MaintenanceWindow>, utc_offset_minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            MbGuardError::BadConfig(format!("invalid utc offset: {utc_offset_minutes} minutes"))
        })?;
        windows.sort_by_key(|w| (w.start, w.end));
        windows.dedup();
        Ok(Self { windows, offset })
    }

    pub fn compile(raw: &[WindowConfig], utc_offset_minutes: i32) -> Result<Self> {
        let windows = raw
            .iter()
            .map(|w| {
                Ok(MaintenanceWindow {
                    start: parse_time(&w.start)?,
                    end: parse_time(&w.end)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(windows, utc_offset_minutes)
    }

    /// Whether `now` falls inside any window.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset).time();
        self.windows.iter().any(|w| w.contains(local))
    }

    pub fn windows(&self) -> &[MaintenanceWindow] {
        &self.windows
    }
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| MbGuardError::BadConfig(format!("invalid maintenance window time: {s}")))
}
