use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::remote::{normalize_remote_path, RemoteEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocalStatus {
    Downloaded,
    RequireDownload,
    RequireUpdate,
}

impl LocalStatus {
    pub const ALL: [LocalStatus; 3] = [
        LocalStatus::Downloaded,
        LocalStatus::RequireDownload,
        LocalStatus::RequireUpdate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LocalStatus::Downloaded => "downloaded",
            LocalStatus::RequireDownload => "require download",
            LocalStatus::RequireUpdate => "require update",
        }
    }
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A remote entry paired with its resolved local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub remote_name: String,
    pub local_path: PathBuf,
    pub is_folder: bool,
    pub size: Option<u64>,
    pub status: LocalStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub count: usize,
    pub bytes: u64,
}

impl Tally {
    fn add(&mut self, size: Option<u64>) {
        self.count += 1;
        self.bytes += size.unwrap_or(0);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total: Tally,
    pub by_status: BTreeMap<LocalStatus, Tally>,
}

impl Summary {
    pub fn status(&self, status: LocalStatus) -> Tally {
        self.by_status.get(&status).copied().unwrap_or_default()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matching files/folders: total={}", self.total.count)?;
        if self.total.count > 0 {
            write!(f, "({})", human_readable_size(Some(self.total.bytes)))?;
        }
        for status in LocalStatus::ALL {
            let tally = self.status(status);
            write!(f, ", {status}={}", tally.count)?;
            if tally.count > 0 {
                write!(f, "({})", human_readable_size(Some(tally.bytes)))?;
            }
        }
        Ok(())
    }
}

/// Local path of `remote_name` under `local_root`, with forward slashes
/// turned into the host separator. `None` when a segment is `..`, a root or
/// a drive prefix, since the result would leave `local_root`.
pub fn local_path_for(local_root: &Path, remote_name: &str) -> Option<PathBuf> {
    let mut path = local_root.to_path_buf();
    for segment in normalize_remote_path(remote_name).split('/') {
        if segment.is_empty() {
            continue;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => {
                log::warn!("Ignoring {remote_name}: segment {segment:?} escapes the cache");
                return None;
            }
        }
    }
    Some(path)
}

/// Entries whose name escapes `local_root` are reported as
/// `RequireDownload`; nothing is ever fetched for them.
pub fn classify(entry: &RemoteEntry, local_root: &Path) -> LocalStatus {
    match local_path_for(local_root, &entry.name) {
        Some(path) => classify_path(entry, &resolve_local_path(&path)),
        None => LocalStatus::RequireDownload,
    }
}

/// Status of `entry` against an already resolved local path.
pub fn classify_path(entry: &RemoteEntry, local_path: &Path) -> LocalStatus {
    let Ok(metadata) = fs::metadata(local_path) else {
        return LocalStatus::RequireDownload;
    };
    if entry.is_folder {
        return LocalStatus::Downloaded;
    }

    if let Some(remote_size) = entry.size {
        if remote_size != metadata.len() {
            return LocalStatus::RequireUpdate;
        }
    }

    if let Some(remote_ms) = entry.modification_timestamp {
        let local_ms = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as i128);
        if let Some(local_ms) = local_ms {
            if i128::from(remote_ms) > local_ms {
                return LocalStatus::RequireUpdate;
            }
        }
    }

    LocalStatus::Downloaded
}

/// Pairs entries with their local copies. Entries that would resolve
/// outside `local_root` are left out.
pub fn reconcile(entries: &[RemoteEntry], local_root: &Path) -> Vec<CacheItem> {
    entries
        .iter()
        .filter_map(|entry| {
            let local_path = resolve_local_path(&local_path_for(local_root, &entry.name)?);
            let status = classify_path(entry, &local_path);
            Some(CacheItem {
                remote_name: entry.name.clone(),
                local_path,
                is_folder: entry.is_folder,
                size: entry.size,
                status,
            })
        })
        .collect()
}

/// Counts and sizes per status. Items resolving to the same local file are
/// counted once.
pub fn summarize(items: &[CacheItem]) -> Summary {
    let mut by_status = LocalStatus::ALL
        .iter()
        .map(|status| (*status, Tally::default()))
        .collect::<BTreeMap<_, _>>();
    let mut total = Tally::default();
    let mut seen = BTreeSet::<&Path>::new();

    for item in items {
        if !seen.insert(item.local_path.as_path()) {
            continue;
        }
        total.add(item.size);
        by_status.entry(item.status).or_default().add(item.size);
    }

    Summary { total, by_status }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_user(value: &str) -> PathBuf {
    let rest = if value == "~" {
        Some("")
    } else {
        value
            .strip_prefix("~/")
            .or_else(|| value.strip_prefix("~\\"))
    };
    match (rest, home::home_dir()) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

/// Expands `~`, makes the path absolute and resolves symlinks and `..`
/// segments. Missing trailing components are appended to the resolved
/// deepest existing ancestor.
pub fn resolve_local_path(path: &Path) -> PathBuf {
    let expanded = match path.to_str() {
        Some(text) => expand_user(text),
        None => path.to_path_buf(),
    };
    if let Ok(real) = fs::canonicalize(&expanded) {
        return real;
    }

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    };
    let normalized = normalize_lexically(&absolute);

    let mut tail = Vec::new();
    let mut current = normalized.clone();
    loop {
        if let Ok(real) = fs::canonicalize(&current) {
            return tail
                .iter()
                .rev()
                .fold(real, |resolved, part| resolved.join(part));
        }
        match (current.file_name().map(|name| name.to_os_string()), current.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                current = parent.to_path_buf();
            }
            _ => return normalized,
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

pub fn human_readable_size(size: Option<u64>) -> String {
    let Some(size) = size else {
        return String::new();
    };
    let size = size as f64;
    let units = ["KB", "MB", "GB", "TB"];
    let mut text = format!("{size:.1} B");
    for (power, unit) in units.iter().enumerate() {
        let scale = 1024f64.powi(power as i32 + 1);
        if size > scale {
            text = format!("{:.1} {unit}", size / scale);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_millis() as i64
    }

    fn long_ago_ms() -> i64 {
        1_000_000_000_000
    }

    #[test]
    fn missing_file_requires_download() {
        let root = tempfile::tempdir().expect("tempdir");
        let entry = RemoteEntry::file("m01/Lobes.nrrd", 10, long_ago_ms());
        assert_eq!(classify(&entry, root.path()), LocalStatus::RequireDownload);
    }

    #[test]
    fn matching_file_is_downloaded_and_classification_is_stable() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("m01")).expect("mkdir");
        fs::write(root.path().join("m01/Lobes.nrrd"), [0u8; 10]).expect("write");
        let entry = RemoteEntry::file("m01/Lobes.nrrd", 10, long_ago_ms());

        let first = classify(&entry, root.path());
        let second = classify(&entry, root.path());
        assert_eq!(first, LocalStatus::Downloaded);
        assert_eq!(first, second);
    }

    #[test]
    fn size_mismatch_requires_update() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::write(root.path().join("Lobes.nrrd"), [0u8; 7]).expect("write");
        let entry = RemoteEntry::file("Lobes.nrrd", 10, long_ago_ms());
        assert_eq!(classify(&entry, root.path()), LocalStatus::RequireUpdate);
    }

    #[test]
    fn newer_remote_copy_requires_update() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::write(root.path().join("Lobes.nrrd"), [0u8; 10]).expect("write");
        let future = now_ms() + 24 * 3600 * 1000;
        let entry = RemoteEntry::file("Lobes.nrrd", 10, future);
        assert_eq!(classify(&entry, root.path()), LocalStatus::RequireUpdate);
    }

    #[test]
    fn folders_are_never_stale() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("m01")).expect("mkdir");
        let entry = RemoteEntry {
            name: "m01".to_string(),
            is_folder: true,
            size: Some(999),
            modification_timestamp: Some(now_ms() + 24 * 3600 * 1000),
        };
        assert_eq!(classify(&entry, root.path()), LocalStatus::Downloaded);
    }

    #[test]
    fn download_then_reclassify_end_to_end() {
        let root = tempfile::tempdir().expect("tempdir");
        let manifest = vec![
            RemoteEntry::file("A/f1.txt", 10, long_ago_ms()),
            RemoteEntry::folder("A"),
        ];
        for entry in &manifest {
            assert_eq!(classify(entry, root.path()), LocalStatus::RequireDownload);
        }

        fs::create_dir_all(root.path().join("A")).expect("mkdir");
        fs::write(root.path().join("A").join("f1.txt"), b"0123456789").expect("write");

        for entry in &manifest {
            assert_eq!(classify(entry, root.path()), LocalStatus::Downloaded);
        }
    }

    #[test]
    fn summary_handles_empty_groups() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, Tally::default());
        for status in LocalStatus::ALL {
            assert_eq!(summary.status(status), Tally::default());
        }
        assert_eq!(
            summary.to_string(),
            "Matching files/folders: total=0, downloaded=0, require download=0, require update=0"
        );
    }

    #[test]
    fn summary_groups_counts_and_bytes() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::write(root.path().join("a.txt"), [0u8; 4]).expect("write");
        let entries = vec![
            RemoteEntry::file("a.txt", 4, long_ago_ms()),
            RemoteEntry::file("b.txt", 2048, long_ago_ms()),
            RemoteEntry::file("c.txt", 10, long_ago_ms()),
        ];
        let items = reconcile(&entries, root.path());
        let summary = summarize(&items);

        assert_eq!(summary.total, Tally { count: 3, bytes: 2062 });
        assert_eq!(
            summary.status(LocalStatus::Downloaded),
            Tally { count: 1, bytes: 4 }
        );
        assert_eq!(
            summary.status(LocalStatus::RequireDownload),
            Tally { count: 2, bytes: 2058 }
        );
        assert_eq!(summary.status(LocalStatus::RequireUpdate), Tally::default());
    }

    #[cfg(unix)]
    #[test]
    fn entries_sharing_a_real_path_count_once() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("real")).expect("mkdir");
        std::os::unix::fs::symlink(root.path().join("real"), root.path().join("alias"))
            .expect("symlink");

        let entries = vec![
            RemoteEntry::file("real/x.csv", 5, long_ago_ms()),
            RemoteEntry::file("alias/x.csv", 5, long_ago_ms()),
        ];
        let items = reconcile(&entries, root.path());
        assert_eq!(items[0].local_path, items[1].local_path);
        assert_eq!(summarize(&items).total.count, 1);
    }

    #[test]
    fn relative_segments_are_resolved() {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("m01")).expect("mkdir");
        let direct = resolve_local_path(&root.path().join("m01").join("x.txt"));
        let dotted = resolve_local_path(&root.path().join("m01").join("..").join("m01").join("x.txt"));
        assert_eq!(direct, dotted);
    }

    #[test]
    fn local_path_uses_host_separators() {
        let path = local_path_for(Path::new("cache"), "m01/sub/Lobes.nrrd");
        assert_eq!(
            path,
            Some(Path::new("cache").join("m01").join("sub").join("Lobes.nrrd"))
        );
    }

    #[test]
    fn names_climbing_out_of_the_cache_are_refused() {
        let root = Path::new("cache");
        assert_eq!(local_path_for(root, "m01/../../escaped.txt"), None);
        assert_eq!(local_path_for(root, "..\\outside.txt"), None);
        assert_eq!(
            local_path_for(root, "/m01/Lobes.nrrd"),
            Some(root.join("m01").join("Lobes.nrrd"))
        );
    }

    #[test]
    fn escaping_entries_are_left_out_of_reconcile() {
        let root = tempfile::tempdir().expect("tempdir");
        let cache = root.path().join("cache");
        fs::create_dir_all(&cache).expect("mkdir");
        fs::write(root.path().join("secret.txt"), [0u8; 3]).expect("write");
        let entries = vec![
            RemoteEntry::file("../secret.txt", 3, long_ago_ms()),
            RemoteEntry::file("m01/Lobes.nrrd", 3, long_ago_ms()),
        ];

        let items = reconcile(&entries, &cache);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].remote_name, "m01/Lobes.nrrd");
        assert_eq!(classify(&entries[0], &cache), LocalStatus::RequireDownload);
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = home::home_dir() {
            assert_eq!(expand_user("~/lapdMouse"), home.join("lapdMouse"));
        }
        assert_eq!(expand_user("/data/lapd"), PathBuf::from("/data/lapd"));
    }

    #[test]
    fn sizes_render_with_binary_units() {
        assert_eq!(human_readable_size(None), "");
        assert_eq!(human_readable_size(Some(512)), "512.0 B");
        assert_eq!(human_readable_size(Some(2048)), "2.0 KB");
        assert_eq!(human_readable_size(Some(3 * 1024 * 1024)), "3.0 MB");
    }
}
