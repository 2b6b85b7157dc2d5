//! Configuration file discovery and loading.
//!
//! The storage configuration is read from `config.yaml` in the data
//! directory, then environment overrides are applied on top.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::environment::EnvironmentConfig;
use crate::config::schema::StorageConfig;
use crate::error::{Error, Result};

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Loads storage configuration.
///
/// # Examples
///
/// ```no_run
/// use cipherstore::config::ConfigLoader;
/// use std::path::Path;
///
/// let config = ConfigLoader::load(Path::new("/tmp/cipherstore")).unwrap();
/// println!("database at {}", config.database_path().display());
/// ```
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the configuration for `data_dir`.
    ///
    /// Precedence (highest to lowest):
    /// 1. `CIPHERSTORE_*` environment variables
    /// 2. `<data_dir>/config.yaml`
    /// 3. Built-in defaults
    ///
    /// The data directory itself always comes from the argument, whatever
    /// the file says.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, if
    /// an environment override is malformed, or if the result fails
    /// validation.
    pub fn load(data_dir: &Path) -> Result<StorageConfig> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::load_file(&path)?
        } else {
            StorageConfig::default()
        };
        config.data_dir = data_dir.to_path_buf();

        EnvironmentConfig::apply_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and parses a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the YAML is invalid.
    pub fn load_file(path: &Path) -> Result<StorageConfig> {
        let contents = fs::read_to_string(path).map_err(|e| Error::Validation {
            field: format!("{}", path.display()),
            message: format!("Failed to read configuration file: {e}"),
        })?;

        serde_yaml::from_str(&contents).map_err(|e| Error::Validation {
            field: format!("{}", path.display()),
            message: format!("Invalid YAML: {e}"),
        })
    }

    /// Returns the default data directory (`~/.cipherstore`).
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn default_data_dir() -> Result<PathBuf> {
        home::home_dir()
            .map(|home| home.join(".cipherstore"))
            .ok_or_else(|| Error::Validation {
                field: "home_directory".into(),
                message: "Cannot determine home directory".into(),
            })
    }

    /// Resolves the data directory from `CIPHERSTORE_DATA_DIR` or the
    /// default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset and the home directory
    /// cannot be determined.
    pub fn resolve_data_dir() -> Result<PathBuf> {
        match std::env::var(EnvironmentConfig::DATA_DIR) {
            Ok(dir) => Ok(PathBuf::from(dir)),
            Err(_) => Self::default_data_dir(),
        }
    }
}
