use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::config::{ArchiveConfig, ManifestLocation};
use crate::error::ArchiveError;
use crate::transfer::{build_http_client, http_get_bytes, probe_url};

/// One file or folder of the remote archive.
///
/// `name` is relative to the directory it was listed from and always uses
/// forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modification_timestamp: Option<i64>,
}

impl RemoteEntry {
    pub fn file(name: &str, size: u64, modification_timestamp: i64) -> Self {
        Self {
            name: name.to_string(),
            is_folder: false,
            size: Some(size),
            modification_timestamp: Some(modification_timestamp),
        }
    }

    pub fn folder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_folder: true,
            size: None,
            modification_timestamp: None,
        }
    }
}

/// Directory listing capability of a remote archive.
///
/// Implementations never fail: an unreachable or unreadable index lists as
/// empty, which callers treat the same as a missing directory.
pub trait RemoteIndex {
    /// Lists entries below `path` (`""` or `"."` is the archive root). With
    /// `depth == 0` only direct children are returned, each extra level of
    /// depth admits one more path separator in the relative name.
    fn list_directory(&self, path: &str, depth: usize) -> Vec<RemoteEntry>;

    /// Lightweight reachability check. Never panics or errors.
    fn can_access(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Url(String),
    File(PathBuf),
    Entries(Vec<RemoteEntry>),
}

impl From<ManifestLocation> for ManifestSource {
    fn from(location: ManifestLocation) -> Self {
        match location {
            ManifestLocation::Url(url) => Self::Url(url),
            ManifestLocation::File(path) => Self::File(path),
        }
    }
}

/// Remote index backed by a static JSON manifest of every archive entry.
/// The manifest is loaded on first use and filtered in memory per query.
pub struct ManifestIndex {
    source: ManifestSource,
    client: Client,
    probe_url: String,
    manifest: Mutex<Option<Arc<[RemoteEntry]>>>,
}

impl ManifestIndex {
    pub fn new(config: &ArchiveConfig) -> anyhow::Result<Self> {
        Self::with_source(config, config.manifest.clone().into())
    }

    pub fn with_source(config: &ArchiveConfig, source: ManifestSource) -> anyhow::Result<Self> {
        Ok(Self {
            source,
            client: build_http_client(config)?,
            probe_url: probe_url(&config.base_url, &config.probe_file),
            manifest: Mutex::new(None),
        })
    }

    fn entries(&self) -> Option<Arc<[RemoteEntry]>> {
        let mut cached = match self.manifest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entries) = cached.as_ref() {
            return Some(Arc::clone(entries));
        }

        match self.load_manifest() {
            Ok(entries) => {
                log::debug!("Loaded archive manifest with {} entries", entries.len());
                let entries: Arc<[RemoteEntry]> = entries.into();
                *cached = Some(Arc::clone(&entries));
                Some(entries)
            }
            Err(err) => {
                log::warn!("{err}");
                None
            }
        }
    }

    fn load_manifest(&self) -> Result<Vec<RemoteEntry>, ArchiveError> {
        match &self.source {
            ManifestSource::Entries(entries) => Ok(entries.clone()),
            ManifestSource::File(path) => {
                let text = fs::read_to_string(path).map_err(|err| {
                    ArchiveError::IndexUnavailable(format!(
                        "could not read manifest {}: {err}",
                        path.display()
                    ))
                })?;
                parse_manifest(text.as_bytes())
            }
            ManifestSource::Url(url) => {
                let bytes = http_get_bytes(&self.client, url).map_err(|err| {
                    ArchiveError::IndexUnavailable(format!(
                        "could not fetch manifest {url}: {err:#}"
                    ))
                })?;
                parse_manifest(&bytes)
            }
        }
    }
}

impl RemoteIndex for ManifestIndex {
    fn list_directory(&self, path: &str, depth: usize) -> Vec<RemoteEntry> {
        match self.entries() {
            Some(entries) => filter_entries(&entries, path, depth),
            None => Vec::new(),
        }
    }

    fn can_access(&self) -> bool {
        match self.client.get(&self.probe_url).send() {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::warn!(
                    "Archive probe {} returned HTTP {}",
                    self.probe_url,
                    response.status()
                );
                false
            }
            Err(err) => {
                log::warn!("Archive probe {} failed: {err}", self.probe_url);
                false
            }
        }
    }
}

pub fn parse_manifest(bytes: &[u8]) -> Result<Vec<RemoteEntry>, ArchiveError> {
    let entries = serde_json::from_slice::<Vec<RemoteEntry>>(bytes).map_err(|err| {
        ArchiveError::IndexUnavailable(format!("manifest is not a valid entry list: {err}"))
    })?;
    Ok(entries)
}

/// Selects the entries below `path`, at most `depth` separators deep, and
/// rewrites their names relative to `path`.
pub fn filter_entries(entries: &[RemoteEntry], path: &str, depth: usize) -> Vec<RemoteEntry> {
    let dir = normalize_remote_path(path);
    entries
        .iter()
        .filter_map(|entry| {
            let full = normalize_remote_path(&entry.name);
            let relative = if dir.is_empty() {
                full.as_str()
            } else {
                full.strip_prefix(dir.as_str())?.strip_prefix('/')?
            };
            if relative.is_empty() || relative.matches('/').count() > depth {
                return None;
            }
            Some(RemoteEntry {
                name: relative.to_string(),
                ..entry.clone()
            })
        })
        .collect()
}

/// Forward slashes, no leading `./` or `/`, no trailing `/`; root is `""`.
pub fn normalize_remote_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let segments = unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>();
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<RemoteEntry> {
        vec![
            RemoteEntry::folder("m01"),
            RemoteEntry::file("m01/Lobes.nrrd", 2048, 1_500_000_000_000),
            RemoteEntry::folder("m01/extra"),
            RemoteEntry::file("m01/extra/notes.txt", 12, 1_500_000_000_000),
            RemoteEntry::folder("m02"),
            RemoteEntry::file("m02/AirwayTree.meta", 512, 1_500_000_000_000),
            RemoteEntry::file("m010/Lobes.nrrd", 4096, 1_500_000_000_000),
        ]
    }

    fn index_over(entries: Vec<RemoteEntry>) -> ManifestIndex {
        ManifestIndex::with_source(&ArchiveConfig::default(), ManifestSource::Entries(entries))
            .expect("client should build")
    }

    #[test]
    fn root_depth_zero_lists_top_level_only() {
        let listed = filter_entries(&sample_entries(), "", 0);
        let names = listed.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["m01", "m02"]);
        assert_eq!(filter_entries(&sample_entries(), ".", 0), listed);
    }

    #[test]
    fn depth_bounds_separator_count() {
        for depth in 0..3 {
            for entry in filter_entries(&sample_entries(), "", depth) {
                assert!(entry.name.matches('/').count() <= depth, "{}", entry.name);
            }
        }
        let listed = filter_entries(&sample_entries(), "m01", 0);
        let names = listed.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Lobes.nrrd", "extra"]);

        let deeper = filter_entries(&sample_entries(), "m01", 1);
        assert!(deeper.iter().any(|e| e.name == "extra/notes.txt"));
    }

    #[test]
    fn directory_prefix_respects_path_components() {
        let listed = filter_entries(&sample_entries(), "m01/", 5);
        assert!(listed.iter().all(|e| !e.name.contains("m010")));
        assert_eq!(listed.len(), 3);
    }

    #[test]
    fn manifest_json_decodes_camel_case_fields() {
        let json = br#"[
            {"name": "m01", "isFolder": true, "size": null, "modificationTimestamp": null},
            {"name": "m01/Lobes.nrrd", "isFolder": false, "size": 10, "modificationTimestamp": 1500000000000}
        ]"#;
        let entries = parse_manifest(json).expect("manifest should parse");
        assert_eq!(entries[0], RemoteEntry::folder("m01"));
        assert_eq!(entries[1], RemoteEntry::file("m01/Lobes.nrrd", 10, 1_500_000_000_000));
    }

    #[test]
    fn invalid_manifest_is_index_unavailable() {
        let err = parse_manifest(b"{not json").expect_err("should fail");
        assert!(matches!(err, ArchiveError::IndexUnavailable(_)));
    }

    #[test]
    fn missing_manifest_lists_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = ManifestIndex::with_source(
            &ArchiveConfig::default(),
            ManifestSource::File(dir.path().join("allfiles.json")),
        )
        .expect("client should build");
        assert!(index.list_directory("", 0).is_empty());
    }

    #[test]
    fn manifest_file_is_filtered_per_query() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("allfiles.json");
        let json = serde_json::to_vec(&sample_entries()).expect("serialize");
        std::fs::write(&path, json).expect("write manifest");

        let index = ManifestIndex::with_source(&ArchiveConfig::default(), ManifestSource::File(path))
            .expect("client should build");
        assert_eq!(index.list_directory("m02", 0).len(), 1);
        assert_eq!(index.list_directory("missing", 3), Vec::new());
    }

    #[test]
    fn in_memory_index_lists_entries() {
        let index = index_over(sample_entries());
        let listed = index.list_directory("m02", 0);
        assert_eq!(listed, vec![RemoteEntry::file("AirwayTree.meta", 512, 1_500_000_000_000)]);
    }

    #[test]
    fn unreachable_archive_is_not_accessible() {
        let config = ArchiveConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            connect_timeout: std::time::Duration::from_secs(2),
            ..ArchiveConfig::default()
        };
        let index = ManifestIndex::with_source(&config, ManifestSource::Entries(Vec::new()))
            .expect("client should build");
        assert!(!index.can_access());
    }

    #[test]
    fn remote_paths_are_normalized() {
        assert_eq!(normalize_remote_path("./m01//Lobes.nrrd"), "m01/Lobes.nrrd");
        assert_eq!(normalize_remote_path("m01\\sub\\"), "m01/sub");
        assert_eq!(normalize_remote_path("."), "");
    }
}
