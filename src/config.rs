//! Configuration for the process manager.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PROCESSMANAGER_HOME, PROCESSMANAGER_DATABASE,
//!    PROCESSMANAGER_HOST_NAME, PROCESSMANAGER_ALLOW_BREAKING_CHANGES,
//!    PROCESSMANAGER_ALLOW_UNDER_DEVELOPMENT)
//! 2. Config file (.processmanager/config.yaml)
//! 3. Defaults (~/.processmanager)
//!
//! Config file discovery:
//! - Searches current directory and parents for .processmanager/config.yaml
//! - Paths in config file are relative to the .processmanager/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::EngineSettings;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".processmanager";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    pub host_name: Option<String>,
    #[serde(default)]
    pub synchronization: Option<SynchronizationConfig>,
    #[serde(default)]
    pub environment: Option<EnvironmentConfig>,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory
    pub home: Option<String>,
    /// SQLite database file
    pub database: Option<String>,
    /// JSONL hand-off outbox
    pub outbox: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynchronizationConfig {
    pub allow_breaking_changes: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    pub allow_under_development: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub look_ahead_hours: Option<u32>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    pub database: PathBuf,
    pub outbox: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub engine: EngineSettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Parse a boolean environment flag
fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => anyhow::bail!("{} must be a boolean, got '{}'", name, other),
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    resolve_config(default_home, find_config_file(), |name| {
        std::env::var(name).ok()
    })
}

/// Merge defaults, an optional config file and the environment
fn resolve_config(
    default_home: PathBuf,
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let file = config_file.as_deref().map(load_config_file).transpose()?;
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let from_file = |value: Option<&String>| value.map(|v| resolve_path(config_dir, v));
    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    let home = env("PROCESSMANAGER_HOME")
        .map(PathBuf::from)
        .or_else(|| from_file(paths.home.as_ref()))
        .unwrap_or(default_home);

    let database = env("PROCESSMANAGER_DATABASE")
        .map(PathBuf::from)
        .or_else(|| from_file(paths.database.as_ref()))
        .unwrap_or_else(|| home.join("processmanager.db"));

    let outbox = from_file(paths.outbox.as_ref()).unwrap_or_else(|| home.join("outbox.jsonl"));

    let defaults = EngineSettings::default();

    let host_name = env("PROCESSMANAGER_HOST_NAME")
        .or_else(|| file.as_ref().and_then(|f| f.host_name.clone()))
        .unwrap_or(defaults.host_name);

    let allow_breaking_changes = match env("PROCESSMANAGER_ALLOW_BREAKING_CHANGES") {
        Some(value) => parse_flag("PROCESSMANAGER_ALLOW_BREAKING_CHANGES", &value)?,
        None => file
            .as_ref()
            .and_then(|f| f.synchronization.as_ref())
            .and_then(|s| s.allow_breaking_changes)
            .unwrap_or(defaults.allow_breaking_changes),
    };

    let allow_under_development = match env("PROCESSMANAGER_ALLOW_UNDER_DEVELOPMENT") {
        Some(value) => parse_flag("PROCESSMANAGER_ALLOW_UNDER_DEVELOPMENT", &value)?,
        None => file
            .as_ref()
            .and_then(|f| f.environment.as_ref())
            .and_then(|e| e.allow_under_development)
            .unwrap_or(defaults.allow_under_development),
    };

    let look_ahead_hours = file
        .as_ref()
        .and_then(|f| f.scheduler.as_ref())
        .and_then(|s| s.look_ahead_hours)
        .unwrap_or(defaults.look_ahead_hours);
    if look_ahead_hours == 0 {
        anyhow::bail!("scheduler.look_ahead_hours must be positive");
    }

    Ok(ResolvedConfig {
        home,
        database,
        outbox,
        config_file,
        engine: EngineSettings {
            host_name,
            allow_breaking_changes,
            allow_under_development,
            look_ahead_hours,
        },
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "{}", body).unwrap();
        config_path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(PathBuf::from("/srv/pm"), None, no_env).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/pm"));
        assert_eq!(config.database, PathBuf::from("/srv/pm/processmanager.db"));
        assert_eq!(config.outbox, PathBuf::from("/srv/pm/outbox.jsonl"));
        assert_eq!(config.engine, EngineSettings::default());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
host_name: calculations
paths:
  database: /var/lib/pm/pm.db
synchronization:
  allow_breaking_changes: true
scheduler:
  look_ahead_hours: 48
"#,
        );

        let config = resolve_config(PathBuf::from("/srv/pm"), Some(config_path), no_env).unwrap();
        assert_eq!(config.database, PathBuf::from("/var/lib/pm/pm.db"));
        assert_eq!(config.engine.host_name, "calculations");
        assert!(config.engine.allow_breaking_changes);
        assert!(!config.engine.allow_under_development);
        assert_eq!(config.engine.look_ahead_hours, 48);
    }

    #[test]
    fn test_environment_overrides_file() {
        let temp = TempDir::new().unwrap();
        let config_path = write_config(
            &temp,
            r#"
version: "1.0"
host_name: calculations
synchronization:
  allow_breaking_changes: true
"#,
        );
        let env: HashMap<&str, &str> = [
            ("PROCESSMANAGER_HOST_NAME", "measurements"),
            ("PROCESSMANAGER_ALLOW_BREAKING_CHANGES", "false"),
            ("PROCESSMANAGER_ALLOW_UNDER_DEVELOPMENT", "1"),
            ("PROCESSMANAGER_DATABASE", "/tmp/override.db"),
        ]
        .into_iter()
        .collect();

        let config = resolve_config(PathBuf::from("/srv/pm"), Some(config_path), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.engine.host_name, "measurements");
        assert!(!config.engine.allow_breaking_changes);
        assert!(config.engine.allow_under_development);
        assert_eq!(config.database, PathBuf::from("/tmp/override.db"));
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let result = resolve_config(PathBuf::from("/srv/pm"), None, |name| {
            (name == "PROCESSMANAGER_ALLOW_BREAKING_CHANGES").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
