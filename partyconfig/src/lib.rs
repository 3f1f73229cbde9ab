//! # MusicParty Configuration Module
//!
//! This module provides configuration management for MusicParty, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use partyconfig::get_config;
//!
//! let config = get_config();
//!
//! let port = config.get_http_port();
//! let cache_dir = config.get_cache_dir()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};
use std::{env, fs, path::Path, sync::Arc};
use tracing::info;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("musicparty.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load MusicParty configuration"));
}

const ENV_CONFIG_DIR: &str = "MUSICPARTY_CONFIG";
const ENV_PREFIX: &str = "MUSICPARTY_CONFIG__";
const CONFIG_DIR_NAME: &str = ".musicparty";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

const DEFAULT_QUEUE_MAX_SIZE: usize = 1000;
const DEFAULT_HISTORY_SIZE: usize = 50;
const DEFAULT_DUPLICATE_POLICY: &str = "reject_track";
const DEFAULT_AUTO_DJ: bool = true;

const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;
const DEFAULT_CONTROL_COOLDOWN_MS: u64 = 1000;
const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_IDLE_RESET_TIMEOUT_SECS: u64 = 2 * 60 * 60;
const DEFAULT_IDLE_CHECK_INTERVAL_SECS: u64 = 10 * 60;
const DEFAULT_PLAYLIST_IMPORT_LIMIT: usize = 100;

const DEFAULT_CACHE_DIR: &str = "cache_media";
const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 1024;
const DEFAULT_DOWNLOAD_COOLDOWN_SECS: u64 = 3;
const DEFAULT_DOWNLOAD_QUEUE_CAPACITY: usize = 256;

const DEFAULT_PROXY_MAX_CONTENT_MB: u64 = 50;
const DEFAULT_PROXY_READY_TIMEOUT_MS: u64 = 5000;

const DEFAULT_STREAM_ENABLED: bool = false;
const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_STREAM_BITRATE: &str = "128k";
const DEFAULT_STREAM_CHUNK_SIZE: usize = 4096;
const DEFAULT_TOKEN_TTL_HOURS: u64 = 24;
const DEFAULT_TOKEN_IDLE_HOURS: u64 = 4;

const DEFAULT_CATALOG_PATH: &str = "catalog.yaml";

/// Macro to generate a getter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().map(|v| v as usize).unwrap_or($default),
                _ => $default,
            }
        }
    };
}

/// Macro to generate a getter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => n.as_u64().unwrap_or($default),
                Ok(Value::String(s)) => s.trim().parse().unwrap_or($default),
                _ => $default,
            }
        }
    };
}

/// Macro to generate a getter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }
    };
}

/// Macro to generate a getter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) => s,
                Ok(Value::Number(n)) => n.to_string(),
                _ => $default.to_string(),
            }
        }
    };
}

/// Configuration manager for MusicParty
///
/// Holds the merged YAML tree (embedded defaults, `config.yaml`, environment
/// overrides) and writes it back on every modification.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data.lock().clone()),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("Le chemin spécifié n'est pas un répertoire"));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `MUSICPARTY_CONFIG` environment variable
    /// 3. `.musicparty` in the current directory
    /// 4. `.musicparty` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Un fichier vide se lit comme Null : on garde alors les valeurs par défaut
        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = {
            let data = self.data.lock();
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "http_port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let new_key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(new_key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Résout un chemin relatif ou absolu et crée le répertoire si nécessaire
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);

        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Résout un fichier relatif au répertoire de configuration
    fn resolve_file(&self, file_path: &str) -> String {
        let path = Path::new(file_path);
        if path.is_absolute() {
            file_path.to_string()
        } else {
            Path::new(&self.config_dir)
                .join(path)
                .to_string_lossy()
                .to_string()
        }
    }

    /// Récupère un répertoire géré par la configuration
    ///
    /// Le répertoire peut être absolu ou relatif au répertoire de configuration.
    /// Il sera créé s'il n'existe pas.
    fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<String> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_value(path, Value::String(default.to_string()))?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    /// Gets the HTTP port from configuration
    ///
    /// Returns the configured HTTP port, or the default port (8080) if not configured or invalid.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    tracing::warn!("Invalid HTTP port '{}', using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => s.parse::<u16>().unwrap_or_else(|_| {
                tracing::warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                DEFAULT_HTTP_PORT
            }),
            Ok(_) => {
                tracing::warn!(
                    "HTTP port not a number or string, using default {}",
                    DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
            Err(err) => {
                tracing::warn!(
                    "Failed to get HTTP port: {}, using default {}",
                    err,
                    DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
        }
    }

    /// Gets the public base URL of the server
    ///
    /// Falls back to `http://localhost:{port}` when not configured.
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.is_empty() => s.trim_end_matches('/').to_string(),
            _ => format!("http://localhost:{}", self.get_http_port()),
        }
    }

    impl_usize_config!(
        get_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    // ----- file d'attente -----

    impl_usize_config!(
        get_queue_max_size,
        &["party", "queue", "max_size"],
        DEFAULT_QUEUE_MAX_SIZE
    );

    impl_usize_config!(
        get_history_size,
        &["party", "queue", "history_size"],
        DEFAULT_HISTORY_SIZE
    );

    impl_string_config!(
        get_duplicate_policy,
        &["party", "queue", "duplicate_policy"],
        DEFAULT_DUPLICATE_POLICY
    );

    impl_bool_config!(
        get_auto_dj,
        &["party", "queue", "auto_dj"],
        DEFAULT_AUTO_DJ
    );

    // ----- lecteur -----

    impl_u64_config!(
        get_tick_interval_ms,
        &["party", "player", "tick_interval_ms"],
        DEFAULT_TICK_INTERVAL_MS
    );

    impl_u64_config!(
        get_control_cooldown_ms,
        &["party", "player", "control_cooldown_ms"],
        DEFAULT_CONTROL_COOLDOWN_MS
    );

    impl_u64_config!(
        get_resolve_timeout_secs,
        &["party", "player", "resolve_timeout_secs"],
        DEFAULT_RESOLVE_TIMEOUT_SECS
    );

    impl_u64_config!(
        get_idle_reset_timeout_secs,
        &["party", "player", "idle_reset_timeout_secs"],
        DEFAULT_IDLE_RESET_TIMEOUT_SECS
    );

    impl_u64_config!(
        get_idle_check_interval_secs,
        &["party", "player", "idle_check_interval_secs"],
        DEFAULT_IDLE_CHECK_INTERVAL_SECS
    );

    impl_usize_config!(
        get_playlist_import_limit,
        &["party", "player", "playlist_import_limit"],
        DEFAULT_PLAYLIST_IMPORT_LIMIT
    );

    // ----- cache média -----

    /// Répertoire du cache média (créé si besoin)
    pub fn get_cache_dir(&self) -> Result<String> {
        self.get_managed_dir(&["party", "cache", "directory"], DEFAULT_CACHE_DIR)
    }

    impl_u64_config!(
        get_cache_max_size_mb,
        &["party", "cache", "max_size_mb"],
        DEFAULT_CACHE_MAX_SIZE_MB
    );

    impl_u64_config!(
        get_download_cooldown_secs,
        &["party", "cache", "download_cooldown_secs"],
        DEFAULT_DOWNLOAD_COOLDOWN_SECS
    );

    impl_usize_config!(
        get_download_queue_capacity,
        &["party", "cache", "queue_capacity"],
        DEFAULT_DOWNLOAD_QUEUE_CAPACITY
    );

    // ----- proxy -----

    impl_u64_config!(
        get_proxy_max_content_mb,
        &["party", "proxy", "max_content_length_mb"],
        DEFAULT_PROXY_MAX_CONTENT_MB
    );

    impl_u64_config!(
        get_proxy_ready_timeout_ms,
        &["party", "proxy", "ready_timeout_ms"],
        DEFAULT_PROXY_READY_TIMEOUT_MS
    );

    impl_string_config!(
        get_proxy_referer,
        &["party", "proxy", "referer"],
        ""
    );

    // ----- diffusion live -----

    impl_bool_config!(
        get_stream_enabled,
        &["party", "stream", "enabled"],
        DEFAULT_STREAM_ENABLED
    );

    impl_string_config!(
        get_ffmpeg_path,
        &["party", "stream", "ffmpeg_path"],
        DEFAULT_FFMPEG_PATH
    );

    impl_string_config!(
        get_stream_bitrate,
        &["party", "stream", "bitrate"],
        DEFAULT_STREAM_BITRATE
    );

    impl_usize_config!(
        get_stream_chunk_size,
        &["party", "stream", "chunk_size"],
        DEFAULT_STREAM_CHUNK_SIZE
    );

    impl_u64_config!(
        get_stream_token_ttl_hours,
        &["party", "stream", "token_ttl_hours"],
        DEFAULT_TOKEN_TTL_HOURS
    );

    impl_u64_config!(
        get_stream_token_idle_hours,
        &["party", "stream", "token_idle_hours"],
        DEFAULT_TOKEN_IDLE_HOURS
    );

    // ----- administration -----

    impl_string_config!(
        get_admin_password,
        &["party", "admin", "password"],
        ""
    );

    // ----- sources -----

    /// Chemin du catalogue YAML, relatif au répertoire de configuration
    pub fn get_catalog_path(&self) -> String {
        let raw = match self.get_value(&["sources", "catalog", "path"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => DEFAULT_CATALOG_PATH.to_string(),
        };
        self.resolve_file(&raw)
    }
}

/// Returns the global configuration instance
///
/// The singleton is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from external are merged into default
/// - For scalars and sequences, external values replace default values
/// - A null external document leaves the defaults untouched
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (_, Value::Null) => {}
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn load(dir: &TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn defaults_are_loaded_from_embedded_yaml() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);

        assert_eq!(config.get_http_port(), 8080);
        assert_eq!(config.get_queue_max_size(), 1000);
        assert_eq!(config.get_history_size(), 50);
        assert_eq!(config.get_control_cooldown_ms(), 1000);
        assert_eq!(config.get_cache_max_size_mb(), 1024);
        assert_eq!(config.get_stream_chunk_size(), 4096);
        assert!(!config.get_stream_enabled());
        assert_eq!(config.get_duplicate_policy(), "reject_track");
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn external_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "party:\n  queue:\n    MAX_SIZE: 3\n  stream:\n    enabled: true\n",
        )
        .unwrap();
        let config = load(&dir);

        assert_eq!(config.get_queue_max_size(), 3);
        assert!(config.get_stream_enabled());
        // clés non surchargées conservées
        assert_eq!(config.get_history_size(), 50);
    }

    #[test]
    fn set_value_persists_to_disk() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);
        config
            .set_value(&["party", "admin", "password"], Value::String("secret".into()))
            .unwrap();

        let reloaded = load(&dir);
        assert_eq!(reloaded.get_admin_password(), "secret");
    }

    #[test]
    fn managed_dir_is_relative_to_config_dir() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);
        let cache = config.get_cache_dir().unwrap();

        assert!(Path::new(&cache).starts_with(dir.path()));
        assert!(Path::new(&cache).is_dir());
    }

    #[test]
    fn base_url_falls_back_to_localhost() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir);
        assert_eq!(config.get_base_url(), "http://localhost:8080");

        config
            .set_value(&["host", "base_url"], Value::String("https://party.example/".into()))
            .unwrap();
        assert_eq!(config.get_base_url(), "https://party.example");
    }

    #[test]
    fn merge_replaces_scalars_and_keeps_missing_keys() {
        let mut base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let ext: Value = serde_yaml::from_str("b:\n  c: 5\n").unwrap();
        merge_yaml(&mut base, &ext);

        let b = &base["b"];
        assert_eq!(b["c"], Value::Number(5.into()));
        assert_eq!(b["d"], Value::Number(3.into()));
        assert_eq!(base["a"], Value::Number(1.into()));
    }
}
