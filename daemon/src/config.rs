//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::capture::simulated::SimulatedBehavior;

const DEFAULT_CAMERAS: &str = "Integrated Camera,USB Camera";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Labels of the cameras the simulated backend exposes
    pub cameras: Vec<String>,

    /// Behavior of the simulated capture provider
    pub capture: SimulatedBehavior,

    /// Device queries the simulated directory fails before answering
    pub directory_failures: usize,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("camcycle");

        let socket_path = lookup("CAMCYCLE_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let cameras = lookup("CAMCYCLE_CAMERAS")
            .unwrap_or_else(|| DEFAULT_CAMERAS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(String::from)
            .collect();

        let defaults = SimulatedBehavior::default();
        let capture = SimulatedBehavior {
            deny_permission: parse_flag(&lookup, "CAMCYCLE_DENY_PERMISSION")?
                .unwrap_or(defaults.deny_permission),
            in_place: parse_flag(&lookup, "CAMCYCLE_IN_PLACE")?.unwrap_or(defaults.in_place),
            latency: match lookup("CAMCYCLE_CAPTURE_LATENCY_MS") {
                Some(ms) => Duration::from_millis(
                    ms.trim()
                        .parse()
                        .with_context(|| format!("invalid CAMCYCLE_CAPTURE_LATENCY_MS: {ms}"))?,
                ),
                None => defaults.latency,
            },
        };

        let directory_failures = match lookup("CAMCYCLE_DIRECTORY_FAILURES") {
            Some(count) => count
                .trim()
                .parse()
                .with_context(|| format!("invalid CAMCYCLE_DIRECTORY_FAILURES: {count}"))?,
            None => 0,
        };

        Ok(Self {
            socket_path,
            data_dir,
            cameras,
            capture,
            directory_failures,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        other => bail!("invalid {key}: {other}"),
    }
}
