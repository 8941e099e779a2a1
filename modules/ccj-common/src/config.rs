use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ScraperError;

/// Default heartbeat period for a running controller.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 60;
/// Days of active inmates excluded from the new-inmate search.
pub const DEFAULT_NEW_INMATE_SEARCH_WINDOW_SIZE: u32 = 5;
/// Highest booking sequence number the jail hands out in a single day.
pub const DEFAULT_CANDIDATES_PER_DAY: u32 = 350;
/// Longest accepted search window.
pub const MAX_NEW_INMATE_SEARCH_WINDOW_SIZE: u32 = 366;
/// Booking sequence numbers are three digits.
pub const MAX_CANDIDATES_PER_DAY: u32 = 999;

/// Feature control keys recognized by the raw inmate data publisher.
pub const RAW_INMATE_DATA_BUILD_DIR: &str = "raw_inmate_data_build_dir";
pub const RAW_INMATE_DATA_RELEASE_DIR: &str = "raw_inmate_data_release_dir";
pub const STORE_RAW_INMATE_DATA: &str = "store_raw_inmate_data";
pub const FEATURE_CONTROL_IDS: [&str; 3] = [
    RAW_INMATE_DATA_BUILD_DIR,
    RAW_INMATE_DATA_RELEASE_DIR,
    STORE_RAW_INMATE_DATA,
];

/// Which active inmate IDs the full scrape cycle excludes from its
/// new-inmate search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActiveExclusion {
    /// Only IDs booked on or after the search start date. Older IDs are
    /// searched again since booking numbers can be reused after a gap.
    #[default]
    SearchWindow,
    /// Every active ID.
    AllActive,
}

/// Raw inmate data feature flags. Publishing is enabled only when all three
/// keys are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureControls {
    pub raw_inmate_data_build_dir: Option<PathBuf>,
    pub raw_inmate_data_release_dir: Option<PathBuf>,
    pub store_raw_inmate_data: Option<bool>,
}

/// Fully specified raw inmate data settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDataSettings {
    pub build_dir: PathBuf,
    pub release_dir: PathBuf,
    pub store: bool,
}

impl FeatureControls {
    pub fn new(build_dir: impl Into<PathBuf>, release_dir: impl Into<PathBuf>, store: bool) -> Self {
        Self {
            raw_inmate_data_build_dir: Some(build_dir.into()),
            raw_inmate_data_release_dir: Some(release_dir.into()),
            store_raw_inmate_data: Some(store),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ScraperError> {
        serde_json::from_str(raw)
            .map_err(|e| ScraperError::Config(format!("invalid feature controls: {e}")))
    }

    /// All three settings, or `None` if any key is missing.
    pub fn settings(&self) -> Option<RawDataSettings> {
        Some(RawDataSettings {
            build_dir: self.raw_inmate_data_build_dir.clone()?,
            release_dir: self.raw_inmate_data_release_dir.clone()?,
            store: self.store_raw_inmate_data?,
        })
    }

    /// Names of the recognized keys that are not set.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.raw_inmate_data_build_dir.is_none() {
            missing.push(RAW_INMATE_DATA_BUILD_DIR);
        }
        if self.raw_inmate_data_release_dir.is_none() {
            missing.push(RAW_INMATE_DATA_RELEASE_DIR);
        }
        if self.store_raw_inmate_data.is_none() {
            missing.push(STORE_RAW_INMATE_DATA);
        }
        missing
    }

    /// Remove a key by name. Returns false for unrecognized keys.
    pub fn clear(&mut self, key: &str) -> bool {
        match key {
            RAW_INMATE_DATA_BUILD_DIR => self.raw_inmate_data_build_dir = None,
            RAW_INMATE_DATA_RELEASE_DIR => self.raw_inmate_data_release_dir = None,
            STORE_RAW_INMATE_DATA => self.store_raw_inmate_data = None,
            _ => return false,
        }
        true
    }
}

/// Scraper configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub heartbeat_interval: Duration,
    pub new_inmate_search_window: u32,
    pub candidates_per_day: u32,
    /// Candidates enumerated by the full cycle's new-inmate search.
    pub candidates_per_run: u32,
    pub active_exclusion: ActiveExclusion,
    pub feature_controls: Option<FeatureControls>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            new_inmate_search_window: DEFAULT_NEW_INMATE_SEARCH_WINDOW_SIZE,
            candidates_per_day: DEFAULT_CANDIDATES_PER_DAY,
            candidates_per_run: (DEFAULT_NEW_INMATE_SEARCH_WINDOW_SIZE + 1)
                * DEFAULT_CANDIDATES_PER_DAY,
            active_exclusion: ActiveExclusion::default(),
            feature_controls: None,
        }
    }
}

impl ScraperConfig {
    /// Load configuration from environment variables. Every variable is
    /// optional; malformed values are errors.
    pub fn from_env() -> Result<Self, ScraperError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ScraperError> {
        let heartbeat_secs = parse_var(&lookup, "CCJ_HEARTBEAT_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS);
        if heartbeat_secs == 0 {
            return Err(ScraperError::Config(
                "CCJ_HEARTBEAT_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        let window = parse_var(&lookup, "CCJ_NEW_INMATE_SEARCH_WINDOW_DAYS")?
            .unwrap_or(DEFAULT_NEW_INMATE_SEARCH_WINDOW_SIZE);
        if window > MAX_NEW_INMATE_SEARCH_WINDOW_SIZE {
            return Err(ScraperError::Config(format!(
                "CCJ_NEW_INMATE_SEARCH_WINDOW_DAYS must be at most {MAX_NEW_INMATE_SEARCH_WINDOW_SIZE}"
            )));
        }
        let per_day =
            parse_var(&lookup, "CCJ_CANDIDATES_PER_DAY")?.unwrap_or(DEFAULT_CANDIDATES_PER_DAY);
        if per_day == 0 || per_day > MAX_CANDIDATES_PER_DAY {
            return Err(ScraperError::Config(format!(
                "CCJ_CANDIDATES_PER_DAY must be between 1 and {MAX_CANDIDATES_PER_DAY}"
            )));
        }
        let per_run = parse_var(&lookup, "CCJ_CANDIDATES_PER_RUN")?
            .unwrap_or((window + 1) * per_day);
        let active_exclusion = match parse_var::<bool, _>(&lookup, "CCJ_EXCLUDE_ALL_ACTIVE")? {
            Some(true) => ActiveExclusion::AllActive,
            _ => ActiveExclusion::SearchWindow,
        };

        let build_dir = lookup("RAW_INMATE_DATA_BUILD_DIR").map(PathBuf::from);
        let release_dir = lookup("RAW_INMATE_DATA_RELEASE_DIR").map(PathBuf::from);
        let store = parse_var::<bool, _>(&lookup, "STORE_RAW_INMATE_DATA")?;
        let feature_controls = if build_dir.is_none() && release_dir.is_none() && store.is_none() {
            None
        } else {
            Some(FeatureControls {
                raw_inmate_data_build_dir: build_dir,
                raw_inmate_data_release_dir: release_dir,
                store_raw_inmate_data: store,
            })
        };

        Ok(Self {
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            new_inmate_search_window: window,
            candidates_per_day: per_day,
            candidates_per_run: per_run,
            active_exclusion,
            feature_controls,
        })
    }

    /// Log the effective settings.
    pub fn log_summary(&self) {
        info!(
            heartbeat_secs = self.heartbeat_interval.as_secs(),
            search_window_days = self.new_inmate_search_window,
            candidates_per_day = self.candidates_per_day,
            candidates_per_run = self.candidates_per_run,
            active_exclusion = ?self.active_exclusion,
            "Scraper configuration"
        );
        match &self.feature_controls {
            None => info!("Raw inmate data feature controls not set, snapshots disabled"),
            Some(controls) => {
                let missing = controls.missing_keys();
                if missing.is_empty() {
                    info!(?controls, "Raw inmate data feature controls");
                } else {
                    warn!(?missing, "Raw inmate data feature controls incomplete, snapshots disabled");
                }
            }
        }
    }
}

fn parse_var<T, L>(lookup: &L, key: &str) -> Result<Option<T>, ScraperError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ScraperError::Config(format!("{key}={raw:?}: {e}"))),
    }
}
