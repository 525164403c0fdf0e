//! Persisted user settings
//!
//! Settings live in a small key-value file (default `~/.mldata.cfg`):
//! - Lines starting with # are comments
//! - Empty lines are ignored
//! - Format: key = value, key=value or key value (space separated)
//! - Values can be quoted with "" or ''
//!
//! A `ConfigStore` is an explicit value handed to the cache manager, not a
//! process-wide global.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::utils::ConfigError;

/// Settings file name in the home directory
pub const SETTINGS_FILE_NAME: &str = ".mldata.cfg";

/// Cache directory name in the home directory
pub const BASE_DIR_NAME: &str = ".mldata";

/// Default MNIST mirror
pub const DEFAULT_MIRROR: &str = "https://ossci-datasets.s3.amazonaws.com/mnist/";

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF_MS: u64 = 1000;

/// Known settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigOption {
    BaseDir,
    Mirror,
    FetchTimeoutSecs,
    FetchAttempts,
    FetchBackoffMs,
    CacheValidation,
}

impl ConfigOption {
    pub const ALL: [ConfigOption; 6] = [
        ConfigOption::BaseDir,
        ConfigOption::Mirror,
        ConfigOption::FetchTimeoutSecs,
        ConfigOption::FetchAttempts,
        ConfigOption::FetchBackoffMs,
        ConfigOption::CacheValidation,
    ];

    /// Name used in the settings file
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigOption::BaseDir => "base_dir",
            ConfigOption::Mirror => "mirror",
            ConfigOption::FetchTimeoutSecs => "fetch_timeout_secs",
            ConfigOption::FetchAttempts => "fetch_attempts",
            ConfigOption::FetchBackoffMs => "fetch_backoff_ms",
            ConfigOption::CacheValidation => "cache_validation",
        }
    }

    /// Built-in default
    pub fn default_value(&self) -> String {
        match self {
            ConfigOption::BaseDir => default_base_dir().display().to_string(),
            ConfigOption::Mirror => DEFAULT_MIRROR.to_string(),
            ConfigOption::FetchTimeoutSecs => DEFAULT_FETCH_TIMEOUT_SECS.to_string(),
            ConfigOption::FetchAttempts => DEFAULT_FETCH_ATTEMPTS.to_string(),
            ConfigOption::FetchBackoffMs => DEFAULT_FETCH_BACKOFF_MS.to_string(),
            ConfigOption::CacheValidation => ValidationMode::Header.as_str().to_string(),
        }
    }

    /// Check a value and return its normalized form
    ///
    /// Does not touch the filesystem; see [`ConfigStore::set`] for the
    /// base directory creation check.
    pub fn normalize(&self, value: &str) -> Result<String, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            option: self.as_str().to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let value = value.trim();
        if value.chars().any(char::is_control) {
            return Err(invalid("control characters are not allowed"));
        }

        match self {
            ConfigOption::BaseDir => {
                if value.is_empty() {
                    return Err(invalid("path must not be empty"));
                }
                Ok(expand_home(value).display().to_string())
            }
            ConfigOption::Mirror => {
                let url = url::Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
                if !matches!(url.scheme(), "http" | "https" | "file") {
                    return Err(invalid("scheme must be http, https or file"));
                }
                // Keep a trailing slash so file names join under the path
                let mut s = url.to_string();
                if !s.ends_with('/') {
                    s.push('/');
                }
                Ok(s)
            }
            ConfigOption::FetchTimeoutSecs | ConfigOption::FetchBackoffMs => {
                let n: u64 = value.parse().map_err(|_| invalid("expected an integer"))?;
                if n == 0 && *self == ConfigOption::FetchTimeoutSecs {
                    return Err(invalid("timeout must be positive"));
                }
                Ok(n.to_string())
            }
            ConfigOption::FetchAttempts => {
                let n: u32 = value.parse().map_err(|_| invalid("expected an integer"))?;
                if n == 0 {
                    return Err(invalid("at least one attempt is required"));
                }
                Ok(n.to_string())
            }
            ConfigOption::CacheValidation => value
                .parse::<ValidationMode>()
                .map(|m| m.as_str().to_string())
                .map_err(|_| invalid("expected 'header' or 'checksum'")),
        }
    }
}

impl FromStr for ConfigOption {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('-', "_");
        ConfigOption::ALL
            .iter()
            .copied()
            .find(|opt| opt.as_str() == name)
            .ok_or_else(|| ConfigError::UnknownOption(s.to_string()))
    }
}

impl fmt::Display for ConfigOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// How the cache decides an existing file is still good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// File length and header match the expected layout
    Header,
    /// Header check plus SHA-256 against the sidecar recorded at fetch time
    Checksum,
}

impl ValidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationMode::Header => "header",
            ValidationMode::Checksum => "checksum",
        }
    }
}

impl FromStr for ValidationMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "header" | "size" => Ok(ValidationMode::Header),
            "checksum" | "sha256" => Ok(ValidationMode::Checksum),
            _ => Err(()),
        }
    }
}

/// Default settings file path (`~/.mldata.cfg`)
pub fn default_settings_path() -> PathBuf {
    home_dir().join(SETTINGS_FILE_NAME)
}

/// Default cache directory (`~/.mldata`)
pub fn default_base_dir() -> PathBuf {
    home_dir().join(BASE_DIR_NAME)
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if value == "~" => home_dir(),
        None => PathBuf::from(value),
    }
}

/// User settings backed by a key-value file
#[derive(Debug)]
pub struct ConfigStore {
    /// Settings file location
    path: PathBuf,
    /// User overrides; options absent here use their defaults
    overrides: RwLock<BTreeMap<ConfigOption, String>>,
    /// Values for this process only (command-line flags), never persisted
    session: RwLock<BTreeMap<ConfigOption, String>>,
    /// Error hit while loading, if the store fell back to defaults
    load_error: Option<ConfigError>,
}

impl ConfigStore {
    /// Open the settings file, falling back to defaults if it is corrupt
    ///
    /// A missing file is not an error. An unreadable or corrupt file is
    /// logged as a warning and kept available through [`load_warning`].
    ///
    /// [`load_warning`]: ConfigStore::load_warning
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        match Self::try_open(path.clone()) {
            Ok(store) => store,
            Err(e) => {
                warn!("{}; using built-in defaults", e);
                Self {
                    path,
                    overrides: RwLock::new(BTreeMap::new()),
                    session: RwLock::new(BTreeMap::new()),
                    load_error: Some(e),
                }
            }
        }
    }

    /// Open the settings file at its default location
    pub fn open_default() -> Self {
        Self::open(default_settings_path())
    }

    /// Open the settings file, failing on unreadable or corrupt content
    pub fn try_open<P: Into<PathBuf>>(path: P) -> Result<Self, ConfigError> {
        let path = path.into();
        let overrides = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Unreadable {
                path: path.clone(),
                source,
            })?;
            parse_settings(&content, &path)?
        } else {
            debug!("No settings file at {}, using defaults", path.display());
            BTreeMap::new()
        };

        Ok(Self {
            path,
            overrides: RwLock::new(overrides),
            session: RwLock::new(BTreeMap::new()),
            load_error: None,
        })
    }

    /// Settings file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Error that forced a fallback to defaults, if any
    pub fn load_warning(&self) -> Option<&ConfigError> {
        self.load_error.as_ref()
    }

    /// Effective value: session value, then user override, then default
    pub fn get(&self, option: ConfigOption) -> String {
        if let Some(v) = self.session.read().get(&option) {
            return v.clone();
        }
        self.overrides
            .read()
            .get(&option)
            .cloned()
            .unwrap_or_else(|| option.default_value())
    }

    /// Whether the option differs from its default
    pub fn is_overridden(&self, option: ConfigOption) -> bool {
        self.session.read().contains_key(&option) || self.overrides.read().contains_key(&option)
    }

    /// Apply a validated value for this process without touching the file
    pub fn set_for_session(&self, option: ConfigOption, value: &str) -> Result<(), ConfigError> {
        let value = option.normalize(value)?;
        self.session.write().insert(option, value);
        Ok(())
    }

    /// Validate, persist, then apply a new value
    ///
    /// The in-process value only changes once the settings file has been
    /// replaced, so a failed write leaves both unchanged.
    pub fn set(&self, option: ConfigOption, value: &str) -> Result<(), ConfigError> {
        let value = option.normalize(value)?;

        if option == ConfigOption::BaseDir {
            fs::create_dir_all(&value).map_err(|e| ConfigError::InvalidValue {
                option: option.as_str().to_string(),
                value: value.clone(),
                reason: format!("cannot create directory: {}", e),
            })?;
        }

        let mut overrides = self.overrides.write();
        let mut updated = overrides.clone();
        updated.insert(option, value);
        self.persist(&updated)?;
        *overrides = updated;

        debug!("Set {} in {}", option, self.path.display());
        Ok(())
    }

    /// Remove a user override, restoring the default
    pub fn unset(&self, option: ConfigOption) -> Result<(), ConfigError> {
        let mut overrides = self.overrides.write();
        if !overrides.contains_key(&option) {
            return Ok(());
        }
        let mut updated = overrides.clone();
        updated.remove(&option);
        self.persist(&updated)?;
        *overrides = updated;
        Ok(())
    }

    /// All options with their effective values and whether each is overridden
    pub fn entries(&self) -> Vec<(ConfigOption, String, bool)> {
        ConfigOption::ALL
            .iter()
            .map(|&opt| (opt, self.get(opt), self.is_overridden(opt)))
            .collect()
    }

    // === Typed accessors ===

    pub fn base_dir(&self) -> PathBuf {
        PathBuf::from(self.get(ConfigOption::BaseDir))
    }

    pub fn mirror(&self) -> String {
        self.get(ConfigOption::Mirror)
    }

    pub fn fetch_timeout(&self) -> Duration {
        let secs = self
            .get(ConfigOption::FetchTimeoutSecs)
            .parse()
            .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn fetch_attempts(&self) -> u32 {
        self.get(ConfigOption::FetchAttempts)
            .parse()
            .unwrap_or(DEFAULT_FETCH_ATTEMPTS)
    }

    pub fn fetch_backoff(&self) -> Duration {
        let ms = self
            .get(ConfigOption::FetchBackoffMs)
            .parse()
            .unwrap_or(DEFAULT_FETCH_BACKOFF_MS);
        Duration::from_millis(ms)
    }

    pub fn validation_mode(&self) -> ValidationMode {
        self.get(ConfigOption::CacheValidation)
            .parse()
            .unwrap_or(ValidationMode::Header)
    }

    /// Write the settings file atomically (temp file, then rename)
    fn persist(&self, overrides: &BTreeMap<ConfigOption, String>) -> Result<(), ConfigError> {
        let write_failed = |source| ConfigError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(write_failed)?;

        let mut tmp = NamedTempFile::new_in(&parent).map_err(write_failed)?;
        writeln!(tmp, "# mldata settings").map_err(write_failed)?;
        for (option, value) in overrides {
            writeln!(tmp, "{} = \"{}\"", option, value).map_err(write_failed)?;
        }
        tmp.as_file().sync_all().map_err(write_failed)?;
        tmp.persist(&self.path)
            .map_err(|e| write_failed(e.error))?;
        Ok(())
    }
}

/// Parse settings file content
fn parse_settings(content: &str, path: &Path) -> Result<BTreeMap<ConfigOption, String>, ConfigError> {
    let mut overrides = BTreeMap::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let corrupt = |reason: String| ConfigError::Corrupt {
            path: path.to_path_buf(),
            line: line_num + 1,
            reason,
        };

        let (key, value) = parse_line(line).map_err(corrupt)?;
        let option = match key.parse::<ConfigOption>() {
            Ok(opt) => opt,
            Err(_) => {
                warn!(
                    "Ignoring unknown option '{}' on line {} of {}",
                    key,
                    line_num + 1,
                    path.display()
                );
                continue;
            }
        };
        let value = option.normalize(&value).map_err(|e| corrupt(e.to_string()))?;
        overrides.insert(option, value);
    }

    Ok(overrides)
}

/// Parse a single line into key-value pair
fn parse_line(line: &str) -> Result<(String, String), String> {
    // Try key=value format first
    if let Some(eq_pos) = line.find('=') {
        let key = line[..eq_pos].trim();
        let value = line[eq_pos + 1..].trim();
        if key.is_empty() {
            return Err("Empty key".to_string());
        }
        return Ok((key.to_string(), unquote(value)));
    }

    // key value format (space separated)
    let parts: Vec<&str> = line.splitn(2, char::is_whitespace).collect();
    if parts.len() < 2 {
        return Err(format!(
            "Invalid format: expected 'key = value' or 'key value', got '{}'",
            line
        ));
    }

    Ok((parts[0].trim().to_string(), unquote(parts[1])))
}

/// Remove surrounding quotes from a value
fn unquote(value: &str) -> String {
    let value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}
