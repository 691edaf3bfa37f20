//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Bootstrap configuration loaded from a TOML file
///
/// These settings cannot change during runtime; the service must restart to
/// pick up changes. Everything else (timeouts, endpoints) has built-in
/// defaults overridable per field.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Root folder for captured data and the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP server port
    #[serde(default)]
    pub port: Option<u16>,

    /// Platform location bridge endpoint (optional)
    #[serde(default)]
    pub location_endpoint: Option<String>,

    /// Location resolution timeout in milliseconds
    #[serde(default)]
    pub location_timeout_ms: Option<u64>,
}

impl TomlConfig {
    /// Load the TOML config from the platform config directory, if present.
    ///
    /// A missing file is not an error; a malformed file is.
    pub fn load() -> Result<Self> {
        let Some(path) = config_file_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Platform config file path (`<config dir>/wavecap/config.toml`)
fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wavecap").join("config.toml"))
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("wavecap"))
        .unwrap_or_else(|| PathBuf::from("./wavecap_data"))
}

/// Create the root folder if missing and return the database path inside it.
pub fn ensure_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)
        .map_err(|e| Error::Config(format!("Failed to create root folder {}: {}", root.display(), e)))?;
    Ok(root.join("wavecap.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_argument_wins() {
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = resolve_root_folder(
            Some(Path::new("/from/cli")),
            "WAVECAP_TEST_UNSET_VAR",
            &toml,
        );
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn toml_used_when_cli_and_env_absent() {
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = resolve_root_folder(None, "WAVECAP_TEST_UNSET_VAR", &toml);
        assert_eq!(resolved, PathBuf::from("/from/toml"));
    }

    #[test]
    fn falls_back_to_os_default() {
        let resolved = resolve_root_folder(None, "WAVECAP_TEST_UNSET_VAR", &TomlConfig::default());
        assert!(resolved.ends_with("wavecap") || resolved.ends_with("wavecap_data"));
    }

    #[test]
    fn ensure_root_folder_creates_and_returns_db_path() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("root");
        let db = ensure_root_folder(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(db, root.join("wavecap.db"));
    }
}
