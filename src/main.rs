use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Result};

use lapdmouse::cache::{human_readable_size, local_path_for, reconcile, summarize};
use lapdmouse::config::ArchiveConfig;
use lapdmouse::dataset::{self, FileKind};
use lapdmouse::download::{format_elapsed, CancellationToken, DownloadEvent, DownloadOrchestrator};
use lapdmouse::geometry::{measurements_to_mesh, tree_to_mesh, Mesh};
use lapdmouse::launch::{self, Command, LaunchRequest};
use lapdmouse::measurements::MeasurementTable;
use lapdmouse::remote::{ManifestIndex, RemoteIndex};
use lapdmouse::scene::{self, DisplayHint, InMemoryRegistry};
use lapdmouse::transfer::HttpDownloader;
use lapdmouse::tree::read_tree;
use lapdmouse::vtk::save_mesh;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let request = match launch::parse_launch_request_from_args(&cli_args) {
        Ok(Some(request)) => request,
        Ok(None) => {
            println!("{}", launch::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("Argument error: {err}\n\n{}", launch::USAGE);
            return ExitCode::from(2);
        }
    };

    match run(request) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(request: LaunchRequest) -> Result<ExitCode> {
    let config = ArchiveConfig::from_overrides(&request.overrides);
    log::debug!("Using archive {} and cache {}", config.base_url, config.cache_root.display());

    match request.command {
        Command::Probe => {
            let index = ManifestIndex::new(&config)?;
            if index.can_access() {
                println!("Archive reachable at {}", config.base_url);
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Could not access archive at {}", config.base_url);
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Datasets => {
            let index = ManifestIndex::new(&config)?;
            for name in dataset::list_datasets(&index, &config.cache_root) {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Files { dataset } => {
            let index = ManifestIndex::new(&config)?;
            println!("Notes: {}", config.notes_url(&dataset));
            for file in dataset::list_dataset_files(&index, &config.cache_root, &dataset) {
                let present = local_path_for(&config.cache_root, &format!("{dataset}/{}", file.name))
                    .map_or(false, |local| local.exists());
                let state = match (present, file.remote) {
                    (true, true) => "downloaded",
                    (true, false) => "local only",
                    (false, _) => "available",
                };
                println!(
                    "{state:<12} {:>10}  {}",
                    human_readable_size(file.size),
                    file.name
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { path, depth } => {
            let index = ManifestIndex::new(&config)?;
            let entries = index.list_directory(&path, depth);
            let items = reconcile(&entries, &cache_dir(&config, &path)?);
            for item in &items {
                println!(
                    "{:<16} {:>10}  {}",
                    item.status.label(),
                    human_readable_size(item.size),
                    item.remote_name
                );
            }
            println!("{}", summarize(&items));
            Ok(ExitCode::SUCCESS)
        }
        Command::Download {
            dataset,
            files,
            use_defaults,
            update,
        } => download(&config, &dataset, files, use_defaults, update),
        Command::Delete { dataset, files } => {
            let removed = dataset::delete_files(&config.cache_root, &dataset, &files)?;
            println!("Deleted {removed} file(s) from {dataset}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Mesh { input, output } => {
            convert_to_mesh(&input, &output)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn download(
    config: &ArchiveConfig,
    dataset: &str,
    mut files: Vec<String>,
    use_defaults: bool,
    update: bool,
) -> Result<ExitCode> {
    let index = ManifestIndex::new(config)?;

    if use_defaults {
        let listed = dataset::list_dataset_files(&index, &config.cache_root, dataset);
        files.extend(dataset::default_selection(&listed));
    }

    if update {
        let entries = index.list_directory(dataset, 0);
        let items = reconcile(&entries, &cache_dir(config, dataset)?);
        let wanted = files.iter().cloned().collect::<BTreeSet<_>>();
        let stale = items
            .into_iter()
            .filter(|item| wanted.is_empty() || wanted.contains(&item.remote_name))
            .collect::<Vec<_>>();
        for path in dataset::invalidate_stale(&stale)? {
            log::info!("Queued {} for re-download", path.display());
        }
        if files.is_empty() {
            files.extend(
                entries
                    .iter()
                    .filter(|entry| !entry.is_folder)
                    .map(|entry| entry.name.clone()),
            );
        }
    }

    let mut seen = BTreeSet::new();
    files.retain(|file| seen.insert(file.clone()));
    if files.is_empty() {
        println!("Nothing to download for {dataset}");
        return Ok(ExitCode::SUCCESS);
    }

    let tasks = dataset::download_tasks(dataset, &files, &config.cache_root);
    let transfer = HttpDownloader::new(config)?;
    let token = CancellationToken::new();
    if let Err(err) = token.cancel_on_interrupt() {
        log::warn!("Ctrl-C will abort immediately: {err}");
    }
    let failures = DownloadOrchestrator::new(&transfer).run_with_progress(
        &tasks,
        || token.is_cancelled(),
        |event| match event {
            DownloadEvent::Started {
                index,
                total,
                remote_name,
            } => println!("[{}/{total}] {remote_name}", index + 1),
            DownloadEvent::Finished { elapsed, .. } => {
                println!("        done in {}", format_elapsed(elapsed));
            }
            DownloadEvent::Skipped { index } => {
                println!(
                    "[{}/{}] {} already present",
                    index + 1,
                    tasks.len(),
                    tasks[index].remote_name
                );
            }
            DownloadEvent::Cancelled { remaining } => {
                println!("Cancelled with {remaining} file(s) left");
            }
            DownloadEvent::FolderCreated { .. } | DownloadEvent::Failed { .. } => {}
        },
    );

    if failures.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    for failure in &failures {
        eprintln!("{failure}");
    }
    Ok(ExitCode::FAILURE)
}

fn cache_dir(config: &ArchiveConfig, path: &str) -> Result<PathBuf> {
    match local_path_for(&config.cache_root, path) {
        Some(dir) => Ok(dir),
        None => bail!("{path} does not name a folder inside the cache"),
    }
}

fn convert_to_mesh(input: &Path, output: &Path) -> Result<()> {
    let mesh: Mesh = match FileKind::from_path(input) {
        FileKind::Tree => tree_to_mesh(&read_tree(input)?),
        FileKind::Measurements => measurements_to_mesh(&MeasurementTable::read(input)?),
        _ => bail!(
            "Can't build a mesh from {}: expected a .meta tree or .csv table",
            input.display()
        ),
    };
    if mesh.is_empty() {
        log::warn!("{} produced no geometry", input.display());
    }

    let mut registry = InMemoryRegistry::default();
    scene::register_well_known(&mut registry);
    if let Some(hint) = DisplayHint::for_mesh(&mesh) {
        log::info!(
            "Display with {} on the {} table, opacity {}, under {}",
            hint.active_scalar.as_str(),
            hint.color_table,
            hint.opacity,
            hint.transform
        );
    }

    save_mesh(&mesh, output)
}
