// src/infra/paths.rs — XDG-compliant path management
//
// All paths respect the CADLOOP_HOME environment variable for isolation.
// When CADLOOP_HOME is set, config and data live under that directory.
// When unset, config uses ~/.cadloop/ and data uses XDG_DATA_HOME/cadloop.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

fn cadloop_home() -> Option<PathBuf> {
    std::env::var_os("CADLOOP_HOME").map(PathBuf::from)
}

/// Configuration directory: $CADLOOP_HOME/ or ~/.cadloop/
pub fn config_dir() -> PathBuf {
    if let Some(home) = cadloop_home() {
        return home;
    }
    match BaseDirs::new() {
        Some(base) => base.home_dir().join(".cadloop"),
        None => PathBuf::from(".cadloop"),
    }
}

/// Data directory: $CADLOOP_HOME/data/ or ~/.local/share/cadloop/
pub fn data_dir() -> PathBuf {
    if let Some(home) = cadloop_home() {
        return home.join("data");
    }
    match ProjectDirs::from("", "", "cadloop") {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("cadloop.db")
}

/// Per-attempt working directories (executor output, snapshots).
pub fn workspace_dir() -> PathBuf {
    data_dir().join("work")
}

pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Create the data and workspace directories if missing.
pub fn ensure_dirs() -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir())?;
    std::fs::create_dir_all(workspace_dir())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path_under_data_dir() {
        let db = db_path();
        assert!(db.starts_with(data_dir()));
        assert_eq!(db.file_name().and_then(|n| n.to_str()), Some("cadloop.db"));
    }

    #[test]
    fn test_config_file_name() {
        assert!(config_file_path().ends_with("config.toml"));
    }

    #[test]
    fn test_workspace_under_data_dir() {
        assert!(workspace_dir().starts_with(data_dir()));
    }
}
