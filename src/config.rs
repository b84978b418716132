//! Settings resolution.
//!
//! Each field is resolved in priority order:
//! 1. CLI flag
//! 2. JSON config file (`--config`, else `<config dir>/erp-bootstrap/config.json`)
//! 3. `ERP_*` environment variables
//! 4. built-in default
//!
//! The password has no default.
use crate::cli::{CheckArgs, ConnectionArgs};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_USERNAME: &str = "Administrator";
pub const DEFAULT_COMPANY: &str = "Your Company Name";
pub const DEFAULT_MOUNT: &str = "mint";
pub const DEFAULT_COUNTRY: &str = "Canada";

const ENV_BASE_URL: &str = "ERP_BASE_URL";
const ENV_USERNAME: &str = "ERP_USERNAME";
const ENV_PASSWORD: &str = "ERP_PASSWORD";
const ENV_COMPANY: &str = "ERP_COMPANY";

const CONFIG_DIR_NAME: &str = "erp-bootstrap";
const CONFIG_FILE_NAME: &str = "config.json";

/// On-disk config. Every field is optional so a file can carry just the
/// values that differ per environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub mount: Option<String>,
    /// `null` disables the country check.
    #[serde(default, deserialize_with = "deserialize_present")]
    pub expected_country: Option<Option<String>>,
    #[serde(default)]
    pub existing_is_success: Option<bool>,
}

// Distinguishes `"expected_country": null` from an absent key.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

/// Fully resolved connection and run settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub company: String,
    pub timeout: Option<Duration>,
    pub mount: String,
    pub expected_country: Option<String>,
    pub existing_is_success: bool,
}

/// Config file plus environment snapshot, the two layers under the CLI.
#[derive(Debug, Default)]
pub struct Sources {
    pub file: ConfigFile,
    pub env: BTreeMap<String, String>,
}

impl Sources {
    /// Load the config file (explicit or default location) and capture
    /// the `ERP_*` environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = match config_path {
            Some(path) => read_config_file(path)?,
            None => match default_config_path().filter(|path| path.is_file()) {
                Some(path) => read_config_file(&path)?,
                None => ConfigFile::default(),
            },
        };
        let env = [ENV_BASE_URL, ENV_USERNAME, ENV_PASSWORD, ENV_COMPANY]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Ok(Self { file, env })
    }

    fn env(&self, key: &str) -> Option<String> {
        self.env
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Resolve the company name alone; used by commands without a session.
    pub fn company(&self, flag: Option<&str>) -> String {
        pick(flag, self.file.company.as_deref(), self.env(ENV_COMPANY))
            .unwrap_or_else(|| DEFAULT_COMPANY.to_string())
    }

    /// Resolve every setting needed to open a session and run checks.
    pub fn resolve(
        &self,
        connection: &ConnectionArgs,
        checks: &CheckArgs,
        strict_existing: bool,
    ) -> Result<Settings> {
        let base_url = pick(
            connection.base_url.as_deref(),
            self.file.base_url.as_deref(),
            self.env(ENV_BASE_URL),
        )
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let username = pick(
            connection.username.as_deref(),
            self.file.username.as_deref(),
            self.env(ENV_USERNAME),
        )
        .unwrap_or_else(|| DEFAULT_USERNAME.to_string());
        let password = pick(
            connection.password.as_deref(),
            self.file.password.as_deref(),
            self.env(ENV_PASSWORD),
        )
        .ok_or_else(|| {
            anyhow!("no password configured (use --password, a config file, or {ENV_PASSWORD})")
        })?;
        let timeout_secs = connection.timeout_secs.or(self.file.timeout_secs);
        let mount = pick(checks.mount.as_deref(), self.file.mount.as_deref(), None)
            .unwrap_or_else(|| DEFAULT_MOUNT.to_string());
        let expected_country = if checks.no_country_check {
            None
        } else if let Some(country) = checks.expect_country.as_deref() {
            Some(country.trim().to_string())
        } else {
            match &self.file.expected_country {
                Some(value) => value.as_deref().map(|country| country.trim().to_string()),
                None => Some(DEFAULT_COUNTRY.to_string()),
            }
        };
        let existing_is_success = !strict_existing && self.file.existing_is_success.unwrap_or(true);

        let settings = Settings {
            base_url: normalize_base_url(&base_url)?,
            username,
            password,
            company: self.company(connection.company.as_deref()),
            timeout: timeout_secs.map(Duration::from_secs),
            mount: mount.trim_matches('/').to_string(),
            expected_country,
            existing_is_success,
        };
        validate_settings(&settings)?;
        Ok(settings)
    }
}

fn pick(flag: Option<&str>, file: Option<&str>, env: Option<String>) -> Option<String> {
    flag.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            file.map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
        .or(env)
}

/// Parse an http(s) URL with a host; the result has no trailing slash.
fn normalize_base_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid base_url {raw:?}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "base_url must start with http:// or https:// (got {raw:?})"
        ));
    }
    if url.host().is_none() {
        return Err(anyhow!("base_url has no host (got {raw:?})"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(anyhow!("base_url must not carry a query or fragment (got {raw:?})"));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Default config location, e.g. `~/.config/erp-bootstrap/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load a config file, rejecting unknown keys.
pub fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let config: ConfigFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    Ok(config)
}

/// Reject settings that cannot produce a usable session.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    normalize_base_url(&settings.base_url)?;
    if settings.username.trim().is_empty() {
        return Err(anyhow!("username must be non-empty"));
    }
    if settings.company.trim().is_empty() {
        return Err(anyhow!("company must be non-empty"));
    }
    if settings
        .expected_country
        .as_deref()
        .is_some_and(|country| country.trim().is_empty())
    {
        return Err(anyhow!(
            "expected country must be non-empty (use --no-country-check to skip the check)"
        ));
    }
    if settings.timeout == Some(Duration::ZERO) {
        return Err(anyhow!("timeout_secs must be greater than zero"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
