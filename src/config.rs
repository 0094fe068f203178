use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, TimeDelta, Utc};

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
pub const DEFAULT_REMINDER_LEAD_MINUTES: i64 = 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// One week.
pub const MAX_REMINDER_LEAD_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
    HoursOutOfOrder { open: NaiveTime, close: NaiveTime },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            ConfigError::HoursOutOfOrder { open, close } => {
                write!(f, "opening time {open} must be before closing time {close}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Daily window in which reservations may start and end. Both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OpenHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self, ConfigError> {
        if open >= close {
            return Err(ConfigError::HoursOutOfOrder { open, close });
        }
        Ok(Self { open, close })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.open <= t && t <= self.close
    }
}

impl Default for OpenHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub open_hours: OpenHours,
    /// Offset in which calendar dates and open hours are evaluated.
    pub site_offset: FixedOffset,
    pub compact_threshold: u64,
    pub reminder_lead: TimeDelta,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            open_hours: OpenHours::default(),
            site_offset: Utc.fix(),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            reminder_lead: TimeDelta::minutes(DEFAULT_REMINDER_LEAD_MINUTES),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Read `ROOMBOOK_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset keys fall back to defaults;
    /// set-but-malformed keys are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = lookup("ROOMBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let open = parse_time(&lookup, "ROOMBOOK_OPEN")?.unwrap_or(defaults.open_hours.open);
        let close = parse_time(&lookup, "ROOMBOOK_CLOSE")?.unwrap_or(defaults.open_hours.close);
        let open_hours = OpenHours::new(open, close)?;

        let site_offset = match parse_var::<i32>(&lookup, "ROOMBOOK_UTC_OFFSET_MINUTES")? {
            Some(minutes) => minutes
                .checked_mul(60)
                .and_then(FixedOffset::east_opt)
                .ok_or(ConfigError::Invalid {
                    key: "ROOMBOOK_UTC_OFFSET_MINUTES",
                    value: minutes.to_string(),
                })?,
            None => defaults.site_offset,
        };

        let compact_threshold = parse_var(&lookup, "ROOMBOOK_COMPACT_THRESHOLD")?
            .unwrap_or(defaults.compact_threshold);
        // 0 disables reminders.
        let reminder_lead = match parse_var::<i64>(&lookup, "ROOMBOOK_REMINDER_LEAD_MINUTES")? {
            Some(minutes) => (0..=MAX_REMINDER_LEAD_MINUTES)
                .contains(&minutes)
                .then(|| TimeDelta::try_minutes(minutes))
                .flatten()
                .ok_or(ConfigError::Invalid {
                    key: "ROOMBOOK_REMINDER_LEAD_MINUTES",
                    value: minutes.to_string(),
                })?,
            None => defaults.reminder_lead,
        };
        let sweep_interval = match parse_var::<u64>(&lookup, "ROOMBOOK_SWEEP_INTERVAL_SECS")? {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    key: "ROOMBOOK_SWEEP_INTERVAL_SECS",
                    value: "0".into(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.sweep_interval,
        };
        let metrics_port = parse_var(&lookup, "ROOMBOOK_METRICS_PORT")?;

        Ok(Self {
            data_dir,
            open_hours,
            site_offset,
            compact_threshold,
            reminder_lead,
            sweep_interval,
            metrics_port,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_time(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<NaiveTime>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
