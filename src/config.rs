use std::path::PathBuf;
use std::time::Duration;

use crate::cache::expand_user;

pub const DEFAULT_BASE_URL: &str = "https://cebs-ext.niehs.nih.gov/cahs/file/download/lapd/";
pub const DEFAULT_NOTES_URL: &str = "https://cebs-ext.niehs.nih.gov/cahs/file/lapd/pages/notes/";
pub const DEFAULT_CACHE_DIR: &str = "~/lapdMouse";
pub const MANIFEST_FILE_NAME: &str = "allfiles.json";
pub const PROBE_FILE: &str = "m01/MD5SUMS";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Where the archive's file manifest comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
    Url(String),
    File(PathBuf),
}

impl ManifestLocation {
    /// Anything with a URL scheme is fetched, everything else is read from disk.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::File(expand_user(trimmed))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    pub base_url: String,
    pub manifest: ManifestLocation,
    pub cache_root: PathBuf,
    pub notes_url: String,
    pub probe_file: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

/// Values given on the command line; they win over the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub manifest: Option<String>,
    pub cache_root: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let base_url = DEFAULT_BASE_URL.to_string();
        Self {
            manifest: ManifestLocation::Url(format!("{base_url}{MANIFEST_FILE_NAME}")),
            base_url,
            cache_root: expand_user(DEFAULT_CACHE_DIR),
            notes_url: DEFAULT_NOTES_URL.to_string(),
            probe_file: PROBE_FILE.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ArchiveConfig {
    pub fn from_env() -> Self {
        Self::from_overrides(&ConfigOverrides::default())
    }

    pub fn from_overrides(overrides: &ConfigOverrides) -> Self {
        let mut config = Self::default();

        if let Some(base) = overrides
            .base_url
            .clone()
            .or_else(|| env_value("LAPDMOUSE_BASE_URL"))
        {
            config.base_url = normalize_base_url(&base);
        }

        config.manifest = match overrides
            .manifest
            .clone()
            .or_else(|| env_value("LAPDMOUSE_MANIFEST"))
        {
            Some(value) => ManifestLocation::parse(&value),
            None => ManifestLocation::Url(format!("{}{MANIFEST_FILE_NAME}", config.base_url)),
        };

        if let Some(cache) = overrides
            .cache_root
            .clone()
            .or_else(|| env_value("LAPDMOUSE_CACHE_DIR"))
        {
            config.cache_root = expand_user(&cache);
        }

        if let Some(secs) = configured_timeout_secs() {
            config.request_timeout = Duration::from_secs(secs);
        }

        config
    }

    pub fn notes_url(&self, dataset: &str) -> String {
        format!("{}{dataset}_notes.pdf", self.notes_url)
    }
}

/// Base URLs are always kept with exactly one trailing slash so that remote
/// names can be appended directly.
pub fn normalize_base_url(value: &str) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    format!("{trimmed}/")
}

fn env_value(name: &str) -> Option<String> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn configured_timeout_secs() -> Option<u64> {
    let value = env_value("LAPDMOUSE_HTTP_TIMEOUT_SECS")?.parse::<u64>().ok()?;
    if value == 0 {
        return None;
    }
    Some(value)
}
