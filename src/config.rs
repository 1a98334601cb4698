//! Configuration loading (spec.md §6). Parsing itself is a leaf
//! concern — this just discovers and deserializes the file, in the
//! search order `./attr-index.conf`, `~/.config/everarch/attr-index.conf`,
//! `/etc/everarch/attr-index.conf` — then lets CLI flags win.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const CONFIG_FILE_NAME: &str = "attr-index.conf";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 2362;
const DEFAULT_STORAGE_HOST: &str = "localhost";
const DEFAULT_STORAGE_PORT: u16 = 2361;
const DEFAULT_REINDEX_INTERVAL_SECS: u64 = 60;

/// Effective configuration for the attr-index service.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub storage_host: String,
    pub storage_port: u16,
    pub reindex_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state_dir_path: PathBuf::from("./attr-index-state"),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            storage_host: DEFAULT_STORAGE_HOST.to_string(),
            storage_port: DEFAULT_STORAGE_PORT,
            reindex_interval_secs: DEFAULT_REINDEX_INTERVAL_SECS,
        }
    }
}

/// On-disk shape of `attr-index.conf`. Every field is optional so a
/// partial file only overrides what it mentions; unmentioned fields
/// keep the built-in default, then the CLI override (§`CliOverrides`)
/// is applied last.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    state_dir_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    storage_host: Option<String>,
    storage_port: Option<u16>,
    reindex_interval_secs: Option<u64>,
}

impl RawConfig {
    fn apply_to(self, cfg: &mut Config) {
        if let Some(v) = self.state_dir_path {
            cfg.state_dir_path = v;
        }
        if let Some(v) = self.host {
            cfg.host = v;
        }
        if let Some(v) = self.port {
            cfg.port = v;
        }
        if let Some(v) = self.storage_host {
            cfg.storage_host = v;
        }
        if let Some(v) = self.storage_port {
            cfg.storage_port = v;
        }
        if let Some(v) = self.reindex_interval_secs {
            cfg.reindex_interval_secs = v;
        }
    }
}

/// Overrides taken from command-line flags; `None` leaves the
/// file/default value in place.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub state_dir_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub storage_host: Option<String>,
    pub storage_port: Option<u16>,
    pub reindex_interval_secs: Option<u64>,
}

impl CliOverrides {
    fn apply_to(self, cfg: &mut Config) {
        if let Some(v) = self.state_dir_path {
            cfg.state_dir_path = v;
        }
        if let Some(v) = self.host {
            cfg.host = v;
        }
        if let Some(v) = self.port {
            cfg.port = v;
        }
        if let Some(v) = self.storage_host {
            cfg.storage_host = v;
        }
        if let Some(v) = self.storage_port {
            cfg.storage_port = v;
        }
        if let Some(v) = self.reindex_interval_secs {
            cfg.reindex_interval_secs = v;
        }
    }
}

fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(format!("./{}", CONFIG_FILE_NAME))];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(
            Path::new(&home)
                .join(".config")
                .join("everarch")
                .join(CONFIG_FILE_NAME),
        );
    }
    paths.push(PathBuf::from("/etc/everarch").join(CONFIG_FILE_NAME));
    paths
}

/// Loads the first config file that exists among the search paths
/// (spec.md §6), falling back to built-in defaults if none exist, then
/// applies `overrides` on top.
pub fn load(overrides: CliOverrides) -> Result<Config> {
    let mut cfg = Config::default();

    for path in search_paths() {
        if path.is_file() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {:?}", path))?;
            let raw: RawConfig = toml::from_str(&contents)
                .with_context(|| format!("parsing config file {:?}", path))?;
            log::info!("loaded configuration from {:?}", path);
            raw.apply_to(&mut cfg);
            break;
        }
    }

    overrides.apply_to(&mut cfg);

    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_defaults() {
        let mut cfg = Config::default();
        let overrides = CliOverrides {
            port: Some(9999),
            ..Default::default()
        };
        overrides.apply_to(&mut cfg);
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.host, DEFAULT_HOST);
    }

    #[test]
    fn raw_config_partial_override() {
        let mut cfg = Config::default();
        let raw: RawConfig = toml::from_str("port = 4000\n").unwrap();
        raw.apply_to(&mut cfg);
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.storage_port, DEFAULT_STORAGE_PORT);
    }
}
