use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn db_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("wordassoc");
            Some(state_dir.join("sessions.db"))
        } else {
            ProjectDirs::from("", "", "wordassoc")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("sessions.db"))
        }
    }

    pub fn config_path() -> PathBuf {
        ProjectDirs::from("", "", "wordassoc")
            .map(|pd| pd.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("wordassoc_config.json"))
    }
}
