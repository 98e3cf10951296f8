use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

use crate::calculator::AngleMode;
use crate::storage::DEFAULT_STORAGE_KEY;
use crate::task::{DEFAULT_CATEGORY, Priority};
use crate::view::SortBy;

pub const CONFIG_ENV_VAR: &str = "TASKMASTERRC";
const CONFIG_FILE_NAME: &str = ".taskmasterrc";
const DEFAULT_DATA_DIR: &str = "~/.taskmaster";

#[derive(Debug, Clone)]
pub struct Config {
    map: HashMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut map = HashMap::new();
        for (key, value) in [
            ("data.location", DEFAULT_DATA_DIR),
            ("storage.key", DEFAULT_STORAGE_KEY),
            ("default.priority", "medium"),
            ("default.category", DEFAULT_CATEGORY),
            ("default.expiry_hours", "24"),
            ("default.sort", "created"),
            ("tick.seconds", "60"),
            ("calc.angle", "degrees"),
            ("color", "on"),
        ] {
            map.insert(key.to_string(), value.to_string());
        }

        Self {
            map,
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(config_override))]
    pub fn load(config_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = resolve_config_path(config_override)? {
            info!(config = %path.display(), "loading config");
            cfg.load_file(&path)?;
        } else {
            debug!("no config file found; using defaults");
        }

        Ok(cfg)
    }

    /// Parses `key = value` lines from `text`, resolving `include`
    /// directives against `base_dir`.
    pub fn parse_str(&mut self, text: &str, base_dir: &Path) -> anyhow::Result<()> {
        self.parse_lines(text, base_dir, Path::new("<inline>"))
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    /// `None` when unset; an error when set to something other than an
    /// on/off word.
    pub fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        self.map
            .get(key)
            .map(|v| parse_bool(v).ok_or_else(|| anyhow!("invalid {key} setting: {v}")))
            .transpose()
    }

    pub fn storage_key(&self) -> String {
        self.get("storage.key")
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_string())
    }

    pub fn default_priority(&self) -> anyhow::Result<Priority> {
        self.parsed("default.priority", Priority::Medium)
    }

    pub fn default_category(&self) -> String {
        self.get("default.category")
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }

    pub fn default_expiry_hours(&self) -> anyhow::Result<f64> {
        let hours: f64 = self.parsed("default.expiry_hours", 24.0)?;
        if !hours.is_finite() || hours <= 0.0 {
            return Err(anyhow!("default.expiry_hours must be positive, got {hours}"));
        }
        Ok(hours)
    }

    pub fn default_sort(&self) -> anyhow::Result<SortBy> {
        self.parsed("default.sort", SortBy::Created)
    }

    pub fn tick_period(&self) -> anyhow::Result<Duration> {
        let secs: u64 = self.parsed("tick.seconds", 60)?;
        if secs == 0 {
            return Err(anyhow!("tick.seconds must be at least 1"));
        }
        Ok(Duration::from_secs(secs))
    }

    pub fn angle_mode(&self) -> anyhow::Result<AngleMode> {
        self.parsed("calc.angle", AngleMode::Degrees)
    }

    fn parsed<T>(&self, key: &str, fallback: T) -> anyhow::Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.map.get(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map_err(|err| anyhow!("invalid value for {key}: {err}")),
            None => Ok(fallback),
        }
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        self.parse_lines(&text, &base_dir, &path)
    }

    fn parse_lines(&mut self, text: &str, base_dir: &Path, origin: &Path) -> anyhow::Result<()> {
        for (line_num, raw_line) in text.lines().enumerate() {
            let mut line = raw_line.trim();
            if let Some((before, _)) = line.split_once('#') {
                line = before.trim();
            }
            if line.is_empty() {
                continue;
            }

            if let Some(include_rest) = line.strip_prefix("include ") {
                let include_path = resolve_include_path(base_dir, include_rest.trim())?;
                debug!(
                    file = %origin.display(),
                    include = %include_path.display(),
                    line = line_num + 1,
                    "processing include"
                );

                if self.loaded_files.contains(&include_path) {
                    warn!(include = %include_path.display(), "include cycle; skipping");
                } else if include_path.exists() {
                    self.load_file(&include_path)?;
                } else {
                    warn!(include = %include_path.display(), "include file does not exist; skipping");
                }
                continue;
            }

            let (k, v) = line.split_once('=').ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    origin.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            let key = k.trim().to_string();
            let value = v.trim().to_string();
            trace!(key = %key, value = %value, "loaded config key");
            self.map.insert(key, value);
        }

        Ok(())
    }
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = if let Some(path) = override_dir {
        path.to_path_buf()
    } else if let Some(cfg_value) = cfg.get("data.location") {
        expand_tilde(Path::new(&cfg_value))
    } else {
        default_data_dir()?
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

#[tracing::instrument(skip(override_path))]
fn resolve_config_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        if env_path == "/dev/null" || env_path.is_empty() {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(env_path)));
    }

    let Some(home) = dirs::home_dir() else {
        warn!("cannot determine home directory; skipping config lookup");
        return Ok(None);
    };
    let candidate = home.join(CONFIG_FILE_NAME);
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    Ok(None)
}

fn default_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(home.join(".taskmaster"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.trim().is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let expanded = expand_tilde(Path::new(include));
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Some(true),
        "0" | "n" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::Config;
    use crate::calculator::AngleMode;
    use crate::task::Priority;
    use crate::view::SortBy;

    #[test]
    fn defaults_cover_every_setting() {
        let cfg = Config::default();
        assert_eq!(cfg.storage_key(), "taskMasterPro_tasks");
        assert_eq!(cfg.default_priority().expect("priority"), Priority::Medium);
        assert_eq!(cfg.default_category(), "Personal");
        assert_eq!(cfg.default_expiry_hours().expect("hours"), 24.0);
        assert_eq!(cfg.default_sort().expect("sort"), SortBy::Created);
        assert_eq!(cfg.tick_period().expect("tick"), Duration::from_secs(60));
        assert_eq!(cfg.angle_mode().expect("angle"), AngleMode::Degrees);
        assert_eq!(cfg.get_bool("color").expect("color"), Some(true));
    }

    #[test]
    fn parses_comments_and_overrides() {
        let mut cfg = Config::default();
        cfg.parse_str(
            "# taskmaster\n\
             default.priority = high   # urgent by default\n\
             default.category=Work\n\
             \n\
             tick.seconds = 5\n",
            Path::new("."),
        )
        .expect("parse");
        cfg.apply_overrides([("rc.default.category".to_string(), "Home".to_string())]);

        assert_eq!(cfg.default_priority().expect("priority"), Priority::High);
        assert_eq!(cfg.default_category(), "Home");
        assert_eq!(cfg.tick_period().expect("tick"), Duration::from_secs(5));
    }

    #[test]
    fn rejects_lines_without_equals_and_bad_values() {
        let mut cfg = Config::default();
        assert!(cfg.parse_str("just words", Path::new(".")).is_err());

        cfg.apply_overrides([
            ("default.expiry_hours".to_string(), "-1".to_string()),
            ("tick.seconds".to_string(), "0".to_string()),
            ("default.sort".to_string(), "alphabetical".to_string()),
            ("color".to_string(), "maybe".to_string()),
        ]);
        assert!(cfg.default_expiry_hours().is_err());
        assert!(cfg.tick_period().is_err());
        assert!(cfg.default_sort().is_err());
        assert!(cfg.get_bool("color").is_err());

        cfg.apply_overrides([("color".to_string(), "OFF".to_string())]);
        assert_eq!(cfg.get_bool("color").expect("color"), Some(false));
        assert_eq!(cfg.get_bool("no.such.key").expect("unset"), None);
    }

    #[test]
    fn follows_includes_relative_to_the_including_file() {
        let temp = tempdir().expect("tempdir");
        fs::write(temp.path().join("extra.rc"), "calc.angle = radians\n").expect("write include");
        let main = temp.path().join("main.rc");
        fs::write(&main, "include extra.rc\nstorage.key = mine\n").expect("write main");

        let cfg = Config::load(Some(&main)).expect("load");
        assert_eq!(cfg.angle_mode().expect("angle"), AngleMode::Radians);
        assert_eq!(cfg.storage_key(), "mine");
        assert_eq!(cfg.loaded_files.len(), 2);
    }
}
