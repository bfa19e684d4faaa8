//! Configuration loading and root folder resolution
//!
//! Resolution priority for the root folder:
//! 1. Command-line argument (handled by the binary, passed in as an override)
//! 2. Environment variable (`GROVE_ROOT_FOLDER`, then `GROVE_ROOT`)
//! 3. TOML config file (`~/.config/grove/<module>.toml`)
//! 4. OS-dependent compiled default
//!
//! A missing or unreadable TOML file never stops startup: a warning is logged and
//! defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable names checked for the root folder, highest priority first
pub const ROOT_FOLDER_ENV_VARS: [&str; 2] = ["GROVE_ROOT_FOLDER", "GROVE_ROOT"];

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "grove.db";

/// Temporary upload directory inside the root folder
pub const UPLOADS_DIR_NAME: &str = "uploads";

/// Compiled-in defaults used when no other source provides a value
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub bind_address: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            log_file: None,
            bind_address: "127.0.0.1:5731".to_string(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/grove
        dirs::data_local_dir()
            .map(|d| d.join("grove"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/grove"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("grove"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/grove"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("grove"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\grove"))
    } else {
        PathBuf::from("./grove_data")
    }
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive (e.g. "info", "grove_ai=debug")
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Generation provider section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Model used for text and vision prompts
    pub model: String,
    pub embedding_model: String,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            requests_per_minute: 60,
            timeout_secs: 60,
        }
    }
}

/// Image hosting section (Cloudinary-compatible signed uploads)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageHostConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

/// Generation pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum cosine similarity for a semantic match.
    /// `None` accepts the best candidate whatever its score.
    pub similarity_threshold: Option<f32>,
    /// Attempts per record during crop detail enrichment
    pub enrichment_attempts: u32,
    /// Buffered events per notification room
    pub room_capacity: usize,
    /// Days of forecast averaged for auto-mode suggestions (max 16)
    pub weather_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: None,
            enrichment_attempts: 2,
            room_capacity: 100,
            weather_days: 16,
        }
    }
}

/// Contents of `<module>.toml`
///
/// Every field is optional so older files keep parsing as sections are added.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub ai: AiConfig,
    pub image_host: ImageHostConfig,
    pub pipeline: PipelineConfig,
}

/// Path of the TOML config file for a module, if a config directory exists
pub fn config_file_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("grove").join(format!("{}.toml", module_name)))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load the module's TOML config, degrading to defaults when it is missing or invalid
pub fn load_module_config(module_name: &str, explicit_path: Option<&Path>) -> TomlConfig {
    let path = match explicit_path.map(Path::to_path_buf).or_else(|| config_file_path(module_name)) {
        Some(path) => path,
        None => {
            warn!("No config directory available, using compiled defaults");
            return TomlConfig::default();
        }
    };

    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
        return TomlConfig::default();
    }

    match load_toml_config(&path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
            TomlConfig::default()
        }
    }
}

/// Write config atomically (temp file + rename)
///
/// The file can hold provider secrets, so on Unix it is restricted to 0600.
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = target.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, target)?;
    Ok(())
}

/// Resolve a secret from environment first, then TOML
///
/// Warns when both are set since the TOML value is then silently ignored.
pub fn resolve_secret(label: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| !v.trim().is_empty());
    let toml_value = toml_value.filter(|v| !v.trim().is_empty());

    if env_value.is_some() && toml_value.is_some() {
        warn!("{} found in both {} and TOML config. Using environment.", label, env_var);
    }

    if let Some(value) = env_value {
        info!("{} loaded from environment variable", label);
        return Some(value);
    }

    toml_value.map(|value| {
        info!("{} loaded from TOML config", label);
        value.to_string()
    })
}

/// Root folder resolution following the documented priority order
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
        }
    }

    /// Resolve using environment, TOML, then the compiled default
    pub fn resolve(&self) -> PathBuf {
        self.resolve_with_override(None)
    }

    /// Resolve with an explicit (command-line) override taking top priority
    pub fn resolve_with_override(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        for var in ROOT_FOLDER_ENV_VARS {
            if let Ok(path) = std::env::var(var) {
                if !path.is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(config_path) = config_file_path(&self.module_name) {
            if config_path.exists() {
                match load_toml_config(&config_path) {
                    Ok(TomlConfig { root_folder: Some(root), .. }) => return root,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Ignoring unreadable config while resolving root folder"),
                }
            }
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder layout on first start
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn uploads_path(&self) -> PathBuf {
        self.root_folder.join(UPLOADS_DIR_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Create the root and uploads directories (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.uploads_path())?;
        Ok(())
    }
}
