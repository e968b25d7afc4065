//! Root folder and config file resolution

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `root_folder` key of the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/rlstats (or /var/lib/rlstats for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("rlstats"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/rlstats"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("rlstats"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/rlstats"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("rlstats"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\rlstats"))
    } else {
        PathBuf::from("./rlstats_data")
    }
}

/// Default location of a service's TOML file: `<config dir>/rlstats/<service>.toml`
pub fn default_config_path(service_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rlstats").join(format!("{}.toml", service_name)))
}

/// Read and deserialize a TOML file; a missing file yields `None`
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)?;
    let value = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    Ok(Some(value))
}

/// Ensure the root folder exists and return the database path inside it
pub fn prepare_root_folder(root_folder: &Path, database_file: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(root_folder)?;
    Ok(root_folder.join(database_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
    }

    #[test]
    fn test_cli_argument_wins() {
        let cli = PathBuf::from("/tmp/from-cli");
        let toml = PathBuf::from("/tmp/from-toml");
        let resolved = resolve_root_folder(
            Some(cli.as_path()),
            "RLSTATS_TEST_UNSET_VARIABLE",
            Some(toml.as_path()),
        );
        assert_eq!(resolved, cli);
    }

    #[test]
    fn test_toml_used_when_no_cli_or_env() {
        let toml = PathBuf::from("/tmp/from-toml");
        let resolved = resolve_root_folder(None, "RLSTATS_TEST_UNSET_VARIABLE", Some(toml.as_path()));
        assert_eq!(resolved, toml);
    }

    #[test]
    fn test_load_toml_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = load_toml(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_toml_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "name = ").unwrap();
        let err = load_toml::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        std::fs::write(&path, "name = \"ok\"").unwrap();
        let loaded: Sample = load_toml(&path).unwrap().unwrap();
        assert_eq!(loaded.name, "ok");
    }
}
