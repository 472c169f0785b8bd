//! Persisted connection settings for the CLI.
//!
//! A small JSON file remembers the endpoint, credential and sampling knobs
//! between runs. The credential is base64-encoded on disk; this only keeps it
//! out of casual view and is not encryption.
//!
//! The bookmarking pipeline never reads this file. The CLI loads it, merges
//! it with flags, and hands the result to the library as a
//! [`crate::config::ModelConfig`].

use crate::config::ModelConfig;
use crate::error::BookmarkError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default file name, resolved against the working directory.
pub const SETTINGS_FILE: &str = "pdf_marker_config.json";

/// Format version written into every saved file.
pub const SETTINGS_VERSION: &str = "1.0";

/// On-disk representation. Every field is optional so that files written by
/// older versions (or edited by hand) still load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dpi: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    json_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

/// Settings as loaded from disk, with the credential already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model: ModelConfig,
    pub version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            version: SETTINGS_VERSION.to_string(),
        }
    }
}

/// Path of the settings file in the current working directory.
pub fn default_path() -> PathBuf {
    PathBuf::from(SETTINGS_FILE)
}

fn obfuscate(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    STANDARD.encode(key.as_bytes())
}

fn deobfuscate(encoded: &str) -> String {
    if encoded.is_empty() {
        return String::new();
    }
    match STANDARD
        .decode(encoded.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(key) => key,
        None => {
            warn!("Stored API key could not be decoded; ignoring it");
            String::new()
        }
    }
}

/// Load settings from `path`.
///
/// Returns `Ok(None)` when the file does not exist. Keys missing from the
/// file take their defaults.
pub fn load(path: &Path) -> Result<Option<Settings>, BookmarkError> {
    if !path.exists() {
        info!("No settings file at {}", path.display());
        return Ok(None);
    }

    let text = std::fs::read_to_string(path).map_err(|e| BookmarkError::Settings {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let file: SettingsFile =
        serde_json::from_str(&text).map_err(|e| BookmarkError::Settings {
            path: path.to_path_buf(),
            detail: format!("invalid JSON: {e}"),
        })?;

    let defaults = ModelConfig::default();
    let settings = Settings {
        model: ModelConfig {
            base_url: file.base_url.unwrap_or(defaults.base_url),
            api_key: file
                .api_key
                .as_deref()
                .map(deobfuscate)
                .unwrap_or(defaults.api_key),
            model: file.model.unwrap_or(defaults.model),
            dpi: file.dpi.unwrap_or(defaults.dpi),
            max_tokens: file.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: file.temperature.unwrap_or(defaults.temperature),
            json_mode: file.json_mode.unwrap_or(defaults.json_mode),
        },
        version: file.version.unwrap_or_else(|| SETTINGS_VERSION.to_string()),
    };

    info!("Settings loaded from {}", path.display());
    Ok(Some(settings))
}

/// Save `model` to `path`, overwriting any previous file.
pub fn save(path: &Path, model: &ModelConfig) -> Result<(), BookmarkError> {
    let file = SettingsFile {
        base_url: Some(model.base_url.clone()),
        api_key: Some(obfuscate(&model.api_key)),
        model: Some(model.model.clone()),
        dpi: Some(model.dpi),
        max_tokens: Some(model.max_tokens),
        temperature: Some(model.temperature),
        json_mode: Some(model.json_mode),
        version: Some(SETTINGS_VERSION.to_string()),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| BookmarkError::Internal(format!("settings serialisation: {e}")))?;

    std::fs::write(path, json).map_err(|e| BookmarkError::Settings {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    info!("Settings saved to {}", path.display());
    Ok(())
}

/// Delete the settings file. A missing file is not an error.
pub fn clear(path: &Path) -> Result<(), BookmarkError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("Settings file {} removed", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BookmarkError::Settings {
            path: path.to_path_buf(),
            detail: e.to_string(),
        }),
    }
}

pub fn exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_restores_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let model = ModelConfig {
            api_key: "sk-test-123".into(),
            model: "gpt-4o".into(),
            dpi: 200,
            ..ModelConfig::default()
        };

        save(&path, &model).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-test-123"), "key must not be stored verbatim");
        assert!(raw.contains("\"version\": \"1.0\""));

        let loaded = load(&path).unwrap().expect("file exists");
        assert_eq!(loaded.model, model);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"model": "gpt-4o-mini"}"#).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.model.model, "gpt-4o-mini");
        assert_eq!(loaded.model.dpi, 300);
        assert_eq!(loaded.model.base_url, "https://api.deepseek.com");
        assert_eq!(loaded.version, "1.0");
    }

    #[test]
    fn undecodable_key_becomes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"api_key": "%%%not base64%%%"}"#).unwrap();
        assert_eq!(load(&path).unwrap().unwrap().model.api_key, "");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load(&path), Err(BookmarkError::Settings { .. })));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        save(&path, &ModelConfig::default()).unwrap();
        assert!(exists(&path));
        clear(&path).unwrap();
        assert!(!exists(&path));
        clear(&path).unwrap();
    }
}
