//! Server configuration from environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use contact_core::{ControllerTypeProfile, CorrelationSettings};

/// What to do when the polygon source cannot be loaded at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonPolicy {
    /// Abort startup.
    FailClosed,
    /// Keep running with sector tracking disabled.
    FailOpen,
}

impl FromStr for PolygonPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail_closed" | "closed" => Ok(PolygonPolicy::FailClosed),
            "fail_open" | "open" => Ok(PolygonPolicy::FailOpen),
            other => Err(format!("unknown polygon policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub database_max_connections: u32,
    pub polygon_path: PathBuf,
    pub polygon_policy: PolygonPolicy,
    pub polling_interval_secs: u64,
    pub window_secs: i64,
    pub timeout_secs: u64,
    pub batch_concurrency: usize,
    pub profile: ControllerTypeProfile,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = ControllerTypeProfile::default();
        let profile = ControllerTypeProfile {
            ground_nm: env_parse("CONTACT_THRESHOLD_GROUND_NM").unwrap_or(defaults.ground_nm),
            tower_nm: env_parse("CONTACT_THRESHOLD_TOWER_NM").unwrap_or(defaults.tower_nm),
            approach_nm: env_parse("CONTACT_THRESHOLD_APPROACH_NM")
                .unwrap_or(defaults.approach_nm),
            center_nm: env_parse("CONTACT_THRESHOLD_CENTER_NM").unwrap_or(defaults.center_nm),
            fss_nm: env_parse("CONTACT_THRESHOLD_FSS_NM").unwrap_or(defaults.fss_nm),
            default_nm: env_parse("CONTACT_THRESHOLD_DEFAULT_NM").unwrap_or(defaults.default_nm),
        };

        Self {
            database_path: env::var("CONTACT_DATABASE_PATH")
                .unwrap_or_else(|_| "data/contact.db".to_string()),
            database_max_connections: env_parse("CONTACT_DATABASE_MAX_CONNECTIONS").unwrap_or(5),
            polygon_path: env::var("CONTACT_POLYGON_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/sectors.json")),
            polygon_policy: env_parse("CONTACT_POLYGON_POLICY").unwrap_or(PolygonPolicy::FailOpen),
            polling_interval_secs: env_parse::<u64>("CONTACT_POLLING_INTERVAL_SECS")
                .unwrap_or(60)
                .max(1),
            window_secs: env_parse("CONTACT_WINDOW_SECS").unwrap_or(180),
            timeout_secs: env_parse("CONTACT_TIMEOUT_SECS").unwrap_or(30),
            batch_concurrency: env_parse::<usize>("CONTACT_BATCH_CONCURRENCY")
                .unwrap_or(8)
                .max(1),
            profile,
        }
    }

    pub fn correlation_settings(&self) -> CorrelationSettings {
        CorrelationSettings {
            window_seconds: self.window_secs,
            polling_interval_seconds: self.polling_interval_secs as i64,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let settings = CorrelationSettings::default();
        Self {
            database_path: "data/contact.db".to_string(),
            database_max_connections: 5,
            polygon_path: PathBuf::from("data/sectors.json"),
            polygon_policy: PolygonPolicy::FailOpen,
            polling_interval_secs: settings.polling_interval_seconds as u64,
            window_secs: settings.window_seconds,
            timeout_secs: 30,
            batch_concurrency: 8,
            profile: ControllerTypeProfile::default(),
        }
    }
}
