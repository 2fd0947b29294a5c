//! Engine configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::{Error, Result, Target};

/// Unified configuration for [`crate::Engine`].
///
/// Every field is optional. An entirely empty config is valid and yields
/// a pure global-DIRECT engine: no ruleset, no GeoIP, heuristic-only porn
/// detection, every query answered `DIRECT`.
///
/// For each artifact a local file takes the place of a URL; specifying
/// both is a configuration error. Files load once with no background
/// task, URLs engage a download/cache/refresh manager.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Remote `.k2r` / `.k2r.gz` ruleset URL.
    #[serde(default)]
    pub rule_url: Option<String>,
    /// Local ruleset path; mutually exclusive with `rule_url`.
    #[serde(default)]
    pub rule_file: Option<PathBuf>,

    /// Remote MaxMind MMDB URL (`.mmdb` / `.mmdb.gz`).
    #[serde(default)]
    pub geoip_url: Option<String>,
    /// Local MMDB path; mutually exclusive with `geoip_url`.
    #[serde(default)]
    pub geoip_file: Option<PathBuf>,

    /// Remote PORNFST URL (`.fst` / `.fst.gz`).
    #[serde(default)]
    pub porn_url: Option<String>,
    /// Local PORNFST path; mutually exclusive with `porn_url`.
    #[serde(default)]
    pub porn_file: Option<PathBuf>,

    /// Directory for downloaded and decompressed artifacts.
    /// Defaults to `$HOME/.cache/k2route`.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// When true, skip the ruleset and answer `global_target`.
    #[serde(default)]
    pub is_global: bool,
    /// Target for global mode; `PROXY` when left unset. Also serves as
    /// the answer while no ruleset is loaded (`DIRECT` when unset).
    #[serde(default)]
    pub global_target: Option<Target>,
}

impl Config {
    /// Reject url+file conflicts.
    pub fn validate(&self) -> Result<()> {
        let conflicts = [
            (self.rule_url.is_some() && self.rule_file.is_some(), "rule"),
            (self.geoip_url.is_some() && self.geoip_file.is_some(), "geoip"),
            (self.porn_url.is_some() && self.porn_file.is_some(), "porn"),
        ];
        for (conflict, what) in conflicts {
            if conflict {
                return Err(Error::Config(format!(
                    "cannot set both {what}_url and {what}_file"
                )));
            }
        }
        Ok(())
    }

    /// The effective cache directory.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }
}

/// OS-appropriate user cache directory for this crate.
pub fn default_cache_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".cache").join("k2route"),
        None => std::env::temp_dir().join("k2route"),
    }
}
