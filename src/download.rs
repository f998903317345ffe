use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::resolve_local_path;
use crate::error::ArchiveError;
use crate::transfer::{partial_path, Transfer};

/// One requested file or folder of a download batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub remote_name: String,
    pub local_name: PathBuf,
    pub is_folder: bool,
}

#[derive(Debug)]
pub struct DownloadFailure {
    pub local_name: PathBuf,
    pub error: ArchiveError,
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "download failed for file {}: {}",
            self.local_name.display(),
            self.error
        )
    }
}

/// Progress notifications emitted between work items of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { index: usize, total: usize, remote_name: String },
    Finished { index: usize, elapsed: Duration },
    Skipped { index: usize },
    FolderCreated { index: usize },
    Failed { index: usize },
    Cancelled { remaining: usize },
}

/// Shared cancellation flag, checked once per batch item.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Routes Ctrl-C to this token so a batch stops before its next file
    /// instead of the process dying mid-transfer. Only one handler can be
    /// installed per process.
    pub fn cancel_on_interrupt(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            log::warn!("Interrupted, stopping after the current file");
            token.cancel();
        })
    }
}

pub struct DownloadOrchestrator<'a, T: Transfer + ?Sized> {
    transfer: &'a T,
}

impl<'a, T: Transfer + ?Sized> DownloadOrchestrator<'a, T> {
    pub fn new(transfer: &'a T) -> Self {
        Self { transfer }
    }

    pub fn run<C>(&self, tasks: &[DownloadTask], cancel: C) -> Vec<DownloadFailure>
    where
        C: FnMut() -> bool,
    {
        self.run_with_progress(tasks, cancel, |_| {})
    }

    /// Downloads `tasks` in order. Existing local files are never fetched
    /// again, a failed file is recorded and the batch moves on, and a
    /// cancellation stops before the next item while keeping finished files.
    pub fn run_with_progress<C, P>(
        &self,
        tasks: &[DownloadTask],
        mut cancel: C,
        mut on_event: P,
    ) -> Vec<DownloadFailure>
    where
        C: FnMut() -> bool,
        P: FnMut(DownloadEvent),
    {
        let mut failures = Vec::new();
        let total = tasks.len();

        for (index, task) in tasks.iter().enumerate() {
            if cancel() {
                log::info!("Download cancelled with {} item(s) left", total - index);
                on_event(DownloadEvent::Cancelled {
                    remaining: total - index,
                });
                break;
            }

            let local_path = resolve_local_path(&task.local_name);

            if task.is_folder {
                match fs::create_dir_all(&local_path) {
                    Ok(()) => on_event(DownloadEvent::FolderCreated { index }),
                    Err(err) => {
                        log::warn!("Could not create folder {}: {err}", local_path.display());
                        on_event(DownloadEvent::Failed { index });
                        failures.push(DownloadFailure {
                            local_name: task.local_name.clone(),
                            error: ArchiveError::io(&local_path, err),
                        });
                    }
                }
                continue;
            }

            if local_path.exists() {
                log::debug!("Skipping {}: already present", local_path.display());
                on_event(DownloadEvent::Skipped { index });
                continue;
            }

            log::info!("Downloading {} -> {}", task.remote_name, local_path.display());
            on_event(DownloadEvent::Started {
                index,
                total,
                remote_name: task.remote_name.clone(),
            });

            let started = Instant::now();
            match self.transfer.download(&task.remote_name, &local_path) {
                Ok(()) => {
                    let elapsed = started.elapsed();
                    log::info!(
                        "Downloaded {} in {} (mm:ss)",
                        task.remote_name,
                        format_elapsed(elapsed)
                    );
                    on_event(DownloadEvent::Finished { index, elapsed });
                }
                Err(error) => {
                    log::warn!("Download of {} failed: {error}", task.remote_name);
                    remove_partial_download(&local_path);
                    on_event(DownloadEvent::Failed { index });
                    failures.push(DownloadFailure {
                        local_name: task.local_name.clone(),
                        error,
                    });
                }
            }
        }

        failures
    }
}

fn remove_partial_download(local_path: &Path) {
    for candidate in [local_path.to_path_buf(), partial_path(local_path)] {
        if candidate.is_file() {
            if let Err(err) = fs::remove_file(&candidate) {
                log::warn!(
                    "Could not remove partial download {}: {err}",
                    candidate.display()
                );
            }
        }
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
