//! Settings persistence.

use anyhow::Result;
use shared::settings::CoordinatorSettings;
use std::path::{Path, PathBuf};

/// Get the config file path
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut p| {
        p.push("page_chat");
        p.push("settings.json");
        p
    })
}

/// Load settings from `path`, or defaults when missing or unreadable.
/// The flag tells whether the file was used.
pub fn load_settings_or_default(path: Option<&Path>) -> (CoordinatorSettings, bool) {
    if let Some(path) = path {
        if let Ok(contents) = std::fs::read_to_string(path) {
            match serde_json::from_str::<CoordinatorSettings>(&contents) {
                Ok(settings) => return (settings, true),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring invalid settings file")
                }
            }
        }
    }
    (CoordinatorSettings::default(), false)
}

/// Save settings to disk
pub fn save_settings(path: &Path, settings: &CoordinatorSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)?;
    Ok(())
}
