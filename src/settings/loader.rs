//! Settings loading and environment variable interpolation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::schema::TraqSettings;

/// Get the path to the global settings file.
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".traq")
        .join("settings.toml")
}

/// Load settings from the given path, falling back to defaults when the file
/// does not exist. `$VAR` / `${VAR}` references in credential fields are
/// resolved against the environment.
pub async fn load(path: &Path) -> Result<TraqSettings> {
    if !path.exists() {
        tracing::debug!("settings file not found at {:?}, using defaults", path);
        return Ok(TraqSettings::default());
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read settings file")?;

    let mut settings: TraqSettings =
        toml::from_str(&contents).context("Failed to deserialize settings")?;

    resolve_env_vars(&mut settings);

    tracing::info!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Resolve `$ENV_VAR` references in string fields.
fn resolve_env_vars(settings: &mut TraqSettings) {
    fn resolve_opt(value: &mut Option<String>) {
        if let Some(v) = value {
            if let Some(resolved) = resolve_env_ref(v) {
                *v = resolved;
            }
        }
    }

    resolve_opt(&mut settings.synthesis.api_key);
    resolve_opt(&mut settings.analysis.api_key);
}

/// Resolve a single `$VAR` or `${VAR}` reference. Returns `None` when the
/// value is not a reference or the variable is unset.
fn resolve_env_ref(value: &str) -> Option<String> {
    let name = if let Some(rest) = value.strip_prefix("${") {
        rest.strip_suffix('}')?
    } else {
        value.strip_prefix('$')?
    };
    match std::env::var(name) {
        Ok(resolved) => Some(resolved),
        Err(_) => {
            tracing::warn!("environment variable '{name}' referenced in settings is not set");
            None
        }
    }
}
