//! Layered environment configuration for the Foundry services.
//!
//! [`load_and_apply`] fills the process environment from two file layers with
//! first-wins precedence: **existing env > project `.env` > XDG
//! `config.toml`**. A layer never overwrites a key that is already set, so the
//! highest-priority source always sticks. After loading, build the typed
//! service settings with [`Settings::from_env`]; required variables have **no
//! defaults** and a missing one fails startup.

mod settings;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use settings::{LogFormat, Settings, SettingsError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("parse {0}: {1}")]
    Parse(PathBuf, String),
}

/// Parses one `.env`-style line into a key/value pair.
///
/// Accepts `KEY=VALUE` with an optional `export ` prefix. Keys are restricted
/// to `[A-Za-z0-9_]`. Surrounding quotes are stripped from the value; double
/// quotes additionally unescape `\"`. Returns `None` for blank lines, comments,
/// lines without `=`, and malformed keys.
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let line = line
        .strip_prefix("export ")
        .map(str::trim_start)
        .unwrap_or(line);
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, raw) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let raw = raw.trim();
    let value = match raw.as_bytes() {
        [b'"', .., b'"'] => raw[1..raw.len() - 1].replace("\\\"", "\""),
        [b'\'', .., b'\''] => raw[1..raw.len() - 1].to_string(),
        _ => raw.to_string(),
    };
    Some((key.to_string(), value))
}

/// Key/value pairs from `<dir>/.env`, in file order. Missing file is an empty
/// layer, not an error.
fn env_file_layer(dir: &Path) -> Result<Vec<(String, String)>, LoadError> {
    let path = dir.join(".env");
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| LoadError::Read(path.clone(), e))?;
    Ok(content.lines().filter_map(parse_env_line).collect())
}

/// Key/value pairs from the `[env]` table of
/// `$XDG_CONFIG_HOME/<app_name>/config.toml`. Missing platform config dir,
/// missing file or missing table all yield an empty layer; malformed TOML is an
/// error. Non-string values are rendered with their TOML display form.
fn xdg_layer(app_name: &str) -> Result<Vec<(String, String)>, LoadError> {
    let Some(base) = dirs::config_dir() else {
        return Ok(Vec::new());
    };
    let path = base.join(app_name).join("config.toml");
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| LoadError::Read(path.clone(), e))?;
    let table: toml::Table = content
        .parse()
        .map_err(|e: toml::de::Error| LoadError::Parse(path.clone(), e.to_string()))?;
    let mut pairs = Vec::new();
    if let Some(toml::Value::Table(env)) = table.get("env") {
        for (key, value) in env {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push((key.clone(), value));
        }
    }
    Ok(pairs)
}

/// Loads the project `.env` and the XDG `config.toml` `[env]` table into the
/// process environment.
///
/// Layers apply in priority order and a key is only set when still unset, so
/// the effective precedence is existing env > `.env` > XDG.
///
/// * `app_name`: e.g. `"foundry"`; selects `~/.config/<app_name>/config.toml`.
/// * `override_dir`: look for `.env` here instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let project_dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().map_err(|e| LoadError::Read(PathBuf::from("."), e))?,
    };
    for layer in [env_file_layer(&project_dir)?, xdg_layer(app_name)?] {
        for (key, value) in layer {
            if std::env::var_os(&key).is_none() {
                std::env::set_var(&key, value);
            }
        }
    }
    Ok(())
}
