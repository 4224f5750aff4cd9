//! Configuration loading and data folder resolution
//!
//! Resolution order for every setting that can come from more than one place:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file is not fatal: the service logs a
//! warning and starts on compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the data folder
pub const DATA_FOLDER_ENV: &str = "NUTRI_DATA_FOLDER";

/// Environment variable naming the TOML config file
pub const CONFIG_FILE_ENV: &str = "NUTRI_CONFIG";

/// Root of the TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database and archived uploads
    pub data_folder: Option<PathBuf>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub bpm: BpmConfig,
    pub intake: IntakeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5810,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file name, relative to the data folder unless absolute
    pub file_name: String,
    pub max_connections: u32,
    /// SQLite busy timeout applied to every pooled connection
    pub busy_timeout_ms: u64,
    /// Upper bound on retrying a write that hit "database is locked"
    pub max_lock_wait_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: "nutri.db".to_string(),
            max_connections: 8,
            busy_timeout_ms: 5000,
            max_lock_wait_ms: 5000,
        }
    }
}

/// Business-process engine connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BpmConfig {
    pub base_url: String,
    pub message_name: String,
    /// Static bearer token; `NUTRI_BPM_TOKEN` overrides it
    pub token: Option<String>,
    pub timeout_secs: u64,
    pub verify_tls: bool,
    /// Client-side request ceiling; 0 disables throttling
    pub requests_per_second: u32,
}

impl Default for BpmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7000/api".to_string(),
            message_name: "registrar_nutricion".to_string(),
            token: None,
            timeout_secs: 30,
            verify_tls: true,
            requests_per_second: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntakeConfig {
    /// Worksheet read in preference to the first one
    pub preferred_sheet: String,
    /// Largest accepted upload
    pub max_upload_bytes: usize,
    /// Copy uploads under `<data_folder>/uploads` when set
    pub archive_uploads: bool,
    pub default_sweep_limit: u32,
    pub max_sweep_limit: u32,
    pub default_retry_limit: u32,
    pub max_retry_limit: u32,
    pub max_page_size: u32,
    /// A reconciliation claim older than this is considered abandoned
    pub claim_ttl_secs: u64,
    /// Background sweep period; 0 disables the scheduler
    pub sweep_interval_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            preferred_sheet: "SEVEROS".to_string(),
            max_upload_bytes: 25 * 1024 * 1024,
            archive_uploads: false,
            default_sweep_limit: 50,
            max_sweep_limit: 500,
            default_retry_limit: 1000,
            max_retry_limit: 50_000,
            max_page_size: 200,
            claim_ttl_secs: 300,
            sweep_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

/// OS-dependent fallback values
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub data_folder: PathBuf,
    pub config_file: PathBuf,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let data_folder = if cfg!(target_os = "linux") {
            dirs::data_local_dir()
                .map(|d| d.join("nutri"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/nutri"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("nutri"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\nutri"))
        } else {
            dirs::data_dir()
                .map(|d| d.join("nutri"))
                .unwrap_or_else(|| PathBuf::from("./nutri_data"))
        };

        let config_file = dirs::config_dir()
            .map(|d| d.join("nutri").join("nutri-intake.toml"))
            .unwrap_or_else(|| PathBuf::from("nutri-intake.toml"));

        Self {
            data_folder,
            config_file,
        }
    }
}

/// Locate the TOML file: CLI → `NUTRI_CONFIG` → compiled default.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    CompiledDefaults::for_current_platform().config_file
}

/// Read the TOML file, falling back to defaults when it does not exist.
///
/// A file that exists but fails to parse is an error: silently ignoring a
/// typo in the BPM endpoint is worse than refusing to start.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Like [`load_toml_config`], but a missing file is created from the
/// defaults so operators have a template to edit. Failing to write it is
/// only a warning.
pub fn load_or_create_toml_config(path: &Path) -> Result<TomlConfig> {
    if path.exists() {
        return load_toml_config(path);
    }

    let config = TomlConfig::default();
    match write_toml_config(&config, path) {
        Ok(()) => info!("Wrote default configuration to {}", path.display()),
        Err(e) => warn!("Could not write default config to {}: {}", path.display(), e),
    }
    Ok(config)
}

/// Write the config atomically (temp file + rename).
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Data folder resolution across CLI, environment, TOML and compiled default
pub struct DataFolderResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> DataFolderResolver<'a> {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml: None,
        }
    }

    pub fn with_cli(mut self, cli_arg: Option<&'a Path>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    pub fn with_toml(mut self, toml: &'a TomlConfig) -> Self {
        self.toml = Some(toml);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        let env_value = std::env::var(DATA_FOLDER_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let toml_value = self.toml.and_then(|t| t.data_folder.clone());

        let sources: Vec<&str> = [
            self.cli_arg.map(|_| "command line"),
            env_value.as_ref().map(|_| "environment"),
            toml_value.as_ref().map(|_| "TOML"),
        ]
        .into_iter()
        .flatten()
        .collect();

        if sources.len() > 1 {
            warn!(
                "Data folder set in multiple sources: {}. Using {} (highest priority).",
                sources.join(", "),
                sources[0]
            );
        }

        if let Some(path) = self.cli_arg {
            return path.to_path_buf();
        }
        if let Some(path) = env_value {
            return path;
        }
        if let Some(path) = toml_value {
            return path;
        }
        CompiledDefaults::for_current_platform().data_folder
    }
}

impl Default for DataFolderResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}
