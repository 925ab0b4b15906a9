// ABOUTME: Scheduled task model plus parsing for action times and repeat intervals
// ABOUTME: Times are wall-clock strings in a configured zone, intervals look like "1h30m"

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Wall-clock format accepted for action times.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Repeat forever.
pub const REPEAT_FOREVER: i64 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid time '{0}', expected YYYY-MM-DD HH:MM:SS")]
    InvalidTime(String),
    #[error("time '{0}' does not exist in the configured timezone")]
    NonexistentTime(String),
    #[error("invalid interval '{0}', expected something like 30s, 10m or 1h30m")]
    InvalidInterval(String),
    #[error("invalid repetition count '{0}'")]
    InvalidRepetitions(String),
    #[error("unknown task type '{0}', expected ban, unban or broadcast")]
    InvalidAction(String),
    #[error("action time is in the past")]
    InPast,
    #[error("repeating tasks need a non-zero interval")]
    ZeroInterval,
    #[error("task has no target groups")]
    NoTargets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    /// Optional notice, then enable group-wide mute.
    BanGroup,
    /// Optional notice, then lift group-wide mute.
    UnbanGroup,
    /// Send the payload to each group.
    Broadcast,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::BanGroup => "ban_group",
            TaskAction::UnbanGroup => "unban_group",
            TaskAction::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts the numeric codes used by older task files as well as names.
impl FromStr for TaskAction {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "ban" | "ban_group" | "mute" => Ok(TaskAction::BanGroup),
            "2" | "unban" | "unban_group" | "unmute" => Ok(TaskAction::UnbanGroup),
            "3" | "broadcast" | "send" => Ok(TaskAction::Broadcast),
            _ => Err(ScheduleError::InvalidAction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Assigned by the scheduler; zero until then.
    #[serde(default)]
    pub id: u64,
    pub next_fire: DateTime<Utc>,
    /// `-1` repeats forever; `1` or `0` fires once.
    pub remaining: i64,
    #[serde(with = "interval_text", default)]
    pub interval: Duration,
    pub action: TaskAction,
    #[serde(default)]
    pub groups: Vec<i64>,
    #[serde(default)]
    pub payload: String,
}

impl ScheduledTask {
    pub fn new(next_fire: DateTime<Utc>, action: TaskAction, groups: Vec<i64>) -> Self {
        Self {
            id: 0,
            next_fire,
            remaining: 1,
            interval: Duration::ZERO,
            action,
            groups,
            payload: String::new(),
        }
    }

    pub fn repeating(mut self, remaining: i64, interval: Duration) -> Self {
        self.remaining = remaining;
        self.interval = interval;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn repeats(&self) -> bool {
        self.remaining == REPEAT_FOREVER || self.remaining > 1
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        if self.next_fire < now {
            return Err(ScheduleError::InPast);
        }
        if self.groups.is_empty() {
            return Err(ScheduleError::NoTargets);
        }
        if self.repeats() && self.interval.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        Ok(())
    }

    /// Applies one firing. Returns `false` when the task is exhausted.
    pub fn advance(&mut self) -> bool {
        if !self.repeats() {
            return false;
        }
        if self.remaining > 1 {
            self.remaining -= 1;
        }
        match chrono::Duration::from_std(self.interval) {
            Ok(step) => {
                self.next_fire += step;
                true
            }
            Err(_) => false,
        }
    }
}

/// Parses `YYYY-MM-DD HH:MM:SS` as wall-clock time in `tz`.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant.
pub fn parse_action_time(s: &str, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), TIME_FORMAT)
        .map_err(|_| ScheduleError::InvalidTime(s.to_string()))?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NonexistentTime(s.to_string()))
}

pub fn format_action_time(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format(TIME_FORMAT).to_string()
}

pub fn parse_repetitions(s: &str) -> Result<i64, ScheduleError> {
    match s.trim().parse::<i64>() {
        Ok(n) if n >= REPEAT_FOREVER => Ok(n),
        _ => Err(ScheduleError::InvalidRepetitions(s.to_string())),
    }
}

/// Parses durations like `500ms`, `30s`, `10m`, `1h30m` or `2d`. A bare `0` is zero.
pub fn parse_interval(s: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidInterval(s.to_string());
    let text = s.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err(invalid());
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = match &rest[..unit_len] {
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(3600),
            "d" => Duration::from_secs(86_400),
            _ => return Err(invalid()),
        };
        let part = unit
            .checked_mul(u32::try_from(value).map_err(|_| invalid())?)
            .ok_or_else(invalid)?;
        total = total.checked_add(part).ok_or_else(invalid)?;
        rest = &rest[unit_len..];
    }
    Ok(total)
}

/// Renders an interval in the same notation [`parse_interval`] reads.
pub fn format_interval(d: Duration) -> String {
    if d.is_zero() {
        return "0".to_string();
    }
    let mut out = String::new();
    let mut secs = d.as_secs();
    for (unit, size) in [("d", 86_400), ("h", 3600), ("m", 60), ("s", 1)] {
        if secs >= size {
            out.push_str(&format!("{}{}", secs / size, unit));
            secs %= size;
        }
    }
    let millis = d.subsec_millis();
    if millis > 0 {
        out.push_str(&format!("{}ms", millis));
    }
    out
}

mod interval_text {
    use super::{format_interval, parse_interval};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_interval(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        parse_interval(&text).map_err(serde::de::Error::custom)
    }
}
