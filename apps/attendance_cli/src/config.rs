use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "attendance.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_base_url: String,
    pub refresh_interval_secs: u64,
    pub geolocation_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub default_latitude: Option<f64>,
    pub default_longitude: Option<f64>,
    /// Only ever read from the environment, never from the config file.
    pub token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".into(),
            refresh_interval_secs: 15,
            geolocation_timeout_secs: 10,
            http_timeout_secs: 30,
            default_latitude: None,
            default_longitude: None,
            token: None,
        }
    }
}

impl Settings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_secs(self.geolocation_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    api_base_url: Option<String>,
    refresh_interval_secs: Option<u64>,
    geolocation_timeout_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    default_latitude: Option<f64>,
    default_longitude: Option<f64>,
}

/// Defaults, then the config file, then environment variables.
///
/// An explicit `path` must exist; the default file is optional.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let raw = match path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?,
        ),
        None => fs::read_to_string(DEFAULT_CONFIG_FILE).ok(),
    };
    if let Some(raw) = raw {
        apply_file(&mut settings, &raw)?;
    }

    apply_env(&mut settings, |key| std::env::var(key).ok())?;
    validate(&settings)?;
    Ok(settings)
}

fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("invalid config file")?;

    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.refresh_interval_secs {
        settings.refresh_interval_secs = v;
    }
    if let Some(v) = file_cfg.geolocation_timeout_secs {
        settings.geolocation_timeout_secs = v;
    }
    if let Some(v) = file_cfg.http_timeout_secs {
        settings.http_timeout_secs = v;
    }
    if file_cfg.default_latitude.is_some() {
        settings.default_latitude = file_cfg.default_latitude;
    }
    if file_cfg.default_longitude.is_some() {
        settings.default_longitude = file_cfg.default_longitude;
    }
    Ok(())
}

fn apply_env(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    let first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

    if let Some(v) = first(&["APP__API_BASE_URL", "ATTENDANCE_API_URL"]) {
        settings.api_base_url = v;
    }
    if let Some(v) = first(&["APP__REFRESH_INTERVAL_SECS"]) {
        settings.refresh_interval_secs = parse_env("APP__REFRESH_INTERVAL_SECS", &v)?;
    }
    if let Some(v) = first(&["APP__GEOLOCATION_TIMEOUT_SECS"]) {
        settings.geolocation_timeout_secs = parse_env("APP__GEOLOCATION_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = first(&["APP__HTTP_TIMEOUT_SECS"]) {
        settings.http_timeout_secs = parse_env("APP__HTTP_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = first(&["APP__DEFAULT_LATITUDE"]) {
        settings.default_latitude = Some(parse_env("APP__DEFAULT_LATITUDE", &v)?);
    }
    if let Some(v) = first(&["APP__DEFAULT_LONGITUDE"]) {
        settings.default_longitude = Some(parse_env("APP__DEFAULT_LONGITUDE", &v)?);
    }
    if let Some(v) = first(&["ATTENDANCE_TOKEN"]) {
        if !v.trim().is_empty() {
            settings.token = Some(v);
        }
    }
    Ok(())
}

fn parse_env<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid value for {key}: '{raw}' ({err})"))
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    if settings.refresh_interval_secs == 0 {
        bail!("refresh_interval_secs must be positive");
    }
    if settings.geolocation_timeout_secs == 0 {
        bail!("geolocation_timeout_secs must be positive");
    }
    if settings.http_timeout_secs == 0 {
        bail!("http_timeout_secs must be positive");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
