use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{local_path_for, CacheItem, LocalStatus};
use crate::download::DownloadTask;
use crate::error::{ArchiveError, Result};
use crate::remote::RemoteIndex;

/// Files picked when a whole dataset is requested, matched by substring in
/// this order.
pub const DEFAULT_FILES: [&str; 5] = [
    "AutofluorescentSub4.mha",
    "AerosolNormalizedSub4.mha",
    "Lobes.nrrd",
    "AirwayOutlets.vtk",
    "AirwayWallDeposition.vtk",
];

/// How a local file is meant to be opened, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Volume,
    Labelmap,
    Mesh,
    Tree,
    Measurements,
    Unsupported,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("mha") => FileKind::Volume,
            Some("nrrd") => FileKind::Labelmap,
            Some("vtk") => FileKind::Mesh,
            Some("meta") => FileKind::Tree,
            Some("csv") => FileKind::Measurements,
            _ => FileKind::Unsupported,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFile {
    pub name: String,
    pub size: Option<u64>,
    pub remote: bool,
}

/// Remote top-level folders merged with the dataset folders already in the
/// local cache.
pub fn list_datasets(index: &dyn RemoteIndex, cache_root: &Path) -> Vec<String> {
    let mut datasets = index
        .list_directory("", 0)
        .into_iter()
        .filter(|entry| entry.is_folder)
        .map(|entry| entry.name)
        .collect::<BTreeSet<_>>();

    match fs::read_dir(cache_root) {
        Ok(entries) => {
            for entry in entries.flatten() {
                if entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false) {
                    if let Some(name) = entry.file_name().to_str() {
                        datasets.insert(name.to_string());
                    }
                }
            }
        }
        Err(err) => log::debug!("No local cache at {}: {err}", cache_root.display()),
    }

    datasets.into_iter().collect()
}

/// Files directly inside `dataset`: remote ones first, in listing order,
/// followed by local-only files. Hidden local files are ignored.
pub fn list_dataset_files(
    index: &dyn RemoteIndex,
    cache_root: &Path,
    dataset: &str,
) -> Vec<DatasetFile> {
    let mut files = index
        .list_directory(dataset, 0)
        .into_iter()
        .filter(|entry| !entry.is_folder)
        .map(|entry| DatasetFile {
            name: entry.name,
            size: entry.size,
            remote: true,
        })
        .collect::<Vec<_>>();
    let known = files
        .iter()
        .map(|file| file.name.clone())
        .collect::<BTreeSet<_>>();

    let Some(local_dir) = local_path_for(cache_root, dataset) else {
        return files;
    };
    let Ok(entries) = fs::read_dir(local_dir) else {
        return files;
    };
    let mut local_only = entries
        .flatten()
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            let name = entry.file_name().to_str()?.to_string();
            if !metadata.is_file() || name.starts_with('.') || known.contains(&name) {
                return None;
            }
            Some(DatasetFile {
                name,
                size: Some(metadata.len()),
                remote: false,
            })
        })
        .collect::<Vec<_>>();
    local_only.sort_by(|a, b| a.name.cmp(&b.name));
    files.extend(local_only);
    files
}

pub fn default_selection(files: &[DatasetFile]) -> Vec<String> {
    let mut selected = Vec::new();
    for pattern in DEFAULT_FILES {
        for file in files {
            if file.name.contains(pattern) && !selected.contains(&file.name) {
                selected.push(file.name.clone());
            }
        }
    }
    selected
}

/// Files whose name would land outside `{cache_root}/{dataset}` get no task.
pub fn download_tasks(dataset: &str, files: &[String], cache_root: &Path) -> Vec<DownloadTask> {
    files
        .iter()
        .filter_map(|file| {
            let remote_name = format!("{dataset}/{file}");
            Some(DownloadTask {
                local_name: local_path_for(cache_root, &remote_name)?,
                remote_name,
                is_folder: false,
            })
        })
        .collect()
}

/// Removes the local copies of `files`; returns how many were removed.
pub fn delete_files(cache_root: &Path, dataset: &str, files: &[String]) -> Result<usize> {
    let mut removed = 0;
    for file in files {
        let Some(path) = local_path_for(cache_root, &format!("{dataset}/{file}")) else {
            continue;
        };
        if !path.is_file() {
            continue;
        }
        log::info!("Deleting file {}", path.display());
        fs::remove_file(&path).map_err(|err| ArchiveError::io(&path, err))?;
        removed += 1;
    }
    Ok(removed)
}

/// Deletes local copies that are out of date so the next download run
/// fetches them again. Returns the removed paths.
pub fn invalidate_stale(items: &[CacheItem]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for item in items {
        if item.is_folder || item.status != LocalStatus::RequireUpdate {
            continue;
        }
        log::info!("Removing stale copy {}", item.local_path.display());
        fs::remove_file(&item.local_path).map_err(|err| ArchiveError::io(&item.local_path, err))?;
        removed.push(item.local_path.clone());
    }
    Ok(removed)
}
