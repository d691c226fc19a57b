//! Configuration loading and management
//!
//! Handles parsing of `.tasknote.toml` in the store root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = ".tasknote.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where records live
    #[serde(default)]
    pub store: StoreConfig,

    /// Note chain limits
    #[serde(default)]
    pub notes: NotesConfig,

    /// Polling loop
    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `tasks.json` and `notes.json`, relative to the root
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".tasknote")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
        }
    }
}

/// Note chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesConfig {
    /// Notes kept per task once eviction runs
    #[serde(default = "default_max_notes")]
    pub max_notes: usize,

    /// Evict notes beyond `max_notes`
    #[serde(default = "default_true")]
    pub evict: bool,

    /// Serialize note taking per task
    #[serde(default = "default_true")]
    pub serialize_per_task: bool,
}

fn default_max_notes() -> usize {
    crate::versioning::DEFAULT_MAX_NOTES
}

fn default_true() -> bool {
    true
}

impl Default for NotesConfig {
    fn default() -> Self {
        Self {
            max_notes: default_max_notes(),
            evict: true,
            serialize_per_task: true,
        }
    }
}

impl NotesConfig {
    /// Effective eviction limit; `None` keeps every note.
    pub fn limit(&self) -> Option<usize> {
        self.evict.then_some(self.max_notes)
    }

    fn validate(&self) -> Result<()> {
        if self.max_notes == 0 {
            return Err(Error::InvalidConfig(
                "notes.max_notes must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Window length, e.g. "30s" or "5m"
    #[serde(default = "default_period")]
    pub period: String,

    /// Finish every reconciliation before the next window
    #[serde(default = "default_true")]
    pub ensure_each_poll: bool,

    /// How far before startup the first window begins
    #[serde(default = "default_lookback")]
    pub lookback: String,
}

fn default_period() -> String {
    "30s".to_string()
}

fn default_lookback() -> String {
    "0s".to_string()
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            ensure_each_poll: true,
            lookback: default_lookback(),
        }
    }
}

impl WatcherConfig {
    pub fn period(&self) -> Result<Duration> {
        parse_duration(&self.period)
            .map_err(|err| Error::InvalidConfig(format!("watcher.period: {err}")))
    }

    pub fn lookback(&self) -> Result<Duration> {
        parse_duration(&self.lookback)
            .map_err(|err| Error::InvalidConfig(format!("watcher.lookback: {err}")))
    }

    fn validate(&self) -> Result<()> {
        let period = self.period()?;
        if period <= Duration::zero() {
            return Err(Error::InvalidConfig(
                "watcher.period must be > 0".to_string(),
            ));
        }
        let lookback = self.lookback()?;
        let now = Utc::now();
        checked_after(now, period, "watcher.period")
            .and_then(|_| checked_before(now, lookback, "watcher.lookback"))
            .map_err(|err| Error::InvalidConfig(err.to_string()))?;
        Ok(())
    }
}

impl Config {
    /// Load configuration from a `.tasknote.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the store root, or return defaults
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Absolute store directory under `root`
    pub fn store_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.store.dir)
    }

    fn validate(&self) -> Result<()> {
        if self.store.dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("store.dir cannot be empty".to_string()));
        }
        self.notes.validate()?;
        self.watcher.validate()?;
        Ok(())
    }
}

/// Parse a duration string like "30s", "5m", "2h", "1d" or "1w".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::InvalidArgument("Duration cannot be empty".to_string()));
    }

    let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => (&s[..pos], s[pos..].trim()),
        None => (s, "s"),
    };

    let num: i64 = num_str
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Invalid duration number: {num_str}")))?;

    let duration = match unit.to_lowercase().as_str() {
        "ms" => Duration::try_milliseconds(num),
        "s" | "sec" | "second" | "seconds" => Duration::try_seconds(num),
        "m" | "min" | "minute" | "minutes" => Duration::try_minutes(num),
        "h" | "hr" | "hour" | "hours" => Duration::try_hours(num),
        "d" | "day" | "days" => Duration::try_days(num),
        "w" | "week" | "weeks" => Duration::try_weeks(num),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Invalid duration unit '{unit}'. Expected: ms, s, m, h, d, w"
            )));
        }
    };

    duration.ok_or_else(|| Error::InvalidArgument(format!("Duration out of range: {s}")))
}

/// `at - span`, or an error naming `what` when the result is not a representable time.
pub fn checked_before(at: DateTime<Utc>, span: Duration, what: &str) -> Result<DateTime<Utc>> {
    at.checked_sub_signed(span)
        .ok_or_else(|| Error::InvalidArgument(format!("{what} reaches past the earliest time")))
}

/// `at + span`, or an error naming `what` when the result is not a representable time.
pub fn checked_after(at: DateTime<Utc>, span: Duration, what: &str) -> Result<DateTime<Utc>> {
    at.checked_add_signed(span)
        .ok_or_else(|| Error::InvalidArgument(format!("{what} reaches past the latest time")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::default();
        assert_eq!(cfg.store.dir, PathBuf::from(".tasknote"));
        assert_eq!(cfg.notes.max_notes, 100);
        assert_eq!(cfg.notes.limit(), Some(100));
        assert!(cfg.notes.serialize_per_task);
        assert_eq!(cfg.watcher.period().unwrap(), Duration::seconds(30));
        assert_eq!(cfg.watcher.lookback().unwrap(), Duration::zero());
        assert!(cfg.watcher.ensure_each_poll);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let content = r#"
[store]
dir = "data"

[notes]
max_notes = 5
evict = false
serialize_per_task = false

[watcher]
period = "5m"
ensure_each_poll = false
lookback = "1h"
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.store_dir(dir.path()), dir.path().join("data"));
        assert_eq!(cfg.notes.max_notes, 5);
        assert_eq!(cfg.notes.limit(), None);
        assert!(!cfg.notes.serialize_per_task);
        assert_eq!(cfg.watcher.period().unwrap(), Duration::minutes(5));
        assert_eq!(cfg.watcher.lookback().unwrap(), Duration::hours(1));
        assert!(!cfg.watcher.ensure_each_poll);
    }

    #[test]
    fn zero_max_notes_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "[notes]\nmax_notes = 0").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_period_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        for period in ["0s", "soon", "10y"] {
            fs::write(&path, format!("[watcher]\nperiod = \"{period}\"")).expect("write config");
            assert!(
                matches!(Config::load(&path), Err(Error::InvalidConfig(_))),
                "period {period} accepted"
            );
        }
    }

    #[test]
    fn load_from_root_defaults_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_from_root(dir.path()).expect("defaults");
        assert_eq!(cfg.notes.max_notes, 100);
    }

    #[test]
    fn save_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        let mut cfg = Config::default();
        cfg.notes.max_notes = 7;
        cfg.save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("max_notes = 7"));
        assert_eq!(Config::load(&path).unwrap().notes.max_notes, 7);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("45").unwrap(), Duration::seconds(45));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1w").unwrap(), Duration::weeks(1));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn oversized_durations_are_errors() {
        for text in ["1000000000000000w", "99999999999999999d", "99999999999999999999s"] {
            assert!(
                matches!(parse_duration(text), Err(Error::InvalidArgument(_))),
                "{text} accepted"
            );
        }
        // Fits in a Duration but not in a calendar date.
        let span = parse_duration("100000000w").unwrap();
        assert!(checked_before(Utc::now(), span, "since").is_err());
        assert!(checked_after(Utc::now(), span, "period").is_err());
        assert!(checked_before(Utc::now(), Duration::hours(1), "since").is_ok());
    }

    #[test]
    fn oversized_watcher_durations_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        for body in [
            "[watcher]\nperiod = \"1000000000000000w\"",
            "[watcher]\nperiod = \"100000000w\"",
            "[watcher]\nlookback = \"100000000w\"",
        ] {
            fs::write(&path, body).expect("write config");
            assert!(
                matches!(Config::load(&path), Err(Error::InvalidConfig(_))),
                "{body} accepted"
            );
        }
    }
}
