use std::path::PathBuf;

use directories::ProjectDirs;

use crate::meta::NAME;

pub struct Directory {}

impl Directory {
    #[cfg(not(feature = "portable"))]
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("dev", "copilot", NAME)
    }

    /// Return path adjacent to the executable
    #[cfg(feature = "portable")]
    fn project_dirs() -> Option<ProjectDirs> {
        let exe = std::env::current_exe().ok()?;
        let dir = exe.parent()?.join("copilot-data");
        ProjectDirs::from_path(dir)
    }

    /// Get the path to the config directory, creating it if missing
    pub fn config_directory() -> Option<PathBuf> {
        let dir = Self::project_dirs()?.config_dir().to_path_buf();
        Self::ensure(dir)
    }

    /// Get the path to the log directory, creating it if missing
    pub fn logs_directory() -> Option<PathBuf> {
        let dir = Self::project_dirs()?.data_local_dir().join("logs");
        Self::ensure(dir)
    }

    /// Default location of the widget config file
    pub fn config_file() -> Option<PathBuf> {
        Self::config_directory().map(|dir| dir.join(format!("{NAME}.toml")))
    }

    fn ensure(dir: PathBuf) -> Option<PathBuf> {
        if !dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::error!("Failed to create {}: {}", dir.display(), e);
                return None;
            }
        }
        Some(dir)
    }
}
