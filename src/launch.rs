use std::path::PathBuf;

use crate::config::ConfigOverrides;

pub const USAGE: &str = "\
usage: lapdmouse [--cache DIR] [--base-url URL] [--manifest URL|FILE] <command>

commands:
  probe                                    check that the archive is reachable
  datasets                                 list remote and cached datasets
  files <dataset>                          list the files of a dataset
  status [path] [--depth N]                summarize cache status below a path
  download <dataset> [files...] [--default] [--update]
                                           download files into the cache
  delete <dataset> <files...>              remove cached files
  mesh <input.meta|input.csv> <output.vtk> convert a tree or table to a mesh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Probe,
    Datasets,
    Files {
        dataset: String,
    },
    Status {
        path: String,
        depth: usize,
    },
    Download {
        dataset: String,
        files: Vec<String>,
        use_defaults: bool,
        update: bool,
    },
    Delete {
        dataset: String,
        files: Vec<String>,
    },
    Mesh {
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub overrides: ConfigOverrides,
    pub command: Command,
}

/// `Ok(None)` when no command was given or help was requested.
pub fn parse_launch_request_from_args(args: &[String]) -> Result<Option<LaunchRequest>, String> {
    let mut overrides = ConfigOverrides::default();
    let mut positional = Vec::<String>::new();
    let mut depth = None::<usize>;
    let mut use_defaults = false;
    let mut update = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (flag, inline_value) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value_for = |name: &str| -> Result<String, String> {
            let value = match inline_value.clone() {
                Some(value) => value,
                None => iter
                    .next()
                    .cloned()
                    .ok_or_else(|| format!("Missing value after {name}."))?,
            };
            if value.trim().is_empty() {
                return Err(format!("{name} needs a non-empty value."));
            }
            Ok(value.trim().to_string())
        };

        match flag {
            "-h" | "--help" => return Ok(None),
            "--cache" | "--cache-dir" => overrides.cache_root = Some(value_for(flag)?),
            "--base-url" => overrides.base_url = Some(value_for(flag)?),
            "--manifest" => overrides.manifest = Some(value_for(flag)?),
            "--depth" => {
                let raw = value_for(flag)?;
                let parsed = raw
                    .parse::<usize>()
                    .map_err(|_| "--depth must be a non-negative integer.".to_string())?;
                depth = Some(parsed);
            }
            "--default" | "--defaults" => use_defaults = true,
            "--update" => update = true,
            other if other.starts_with("--") => {
                return Err(format!("Unknown option {other}."));
            }
            _ => positional.push(arg.clone()),
        }
    }

    let Some((name, rest)) = positional.split_first() else {
        return Ok(None);
    };

    let command = match name.as_str() {
        "probe" => {
            expect_arity(name, rest, 0, 0)?;
            Command::Probe
        }
        "datasets" => {
            expect_arity(name, rest, 0, 0)?;
            Command::Datasets
        }
        "files" => {
            expect_arity(name, rest, 1, 1)?;
            Command::Files {
                dataset: rest[0].clone(),
            }
        }
        "status" => {
            expect_arity(name, rest, 0, 1)?;
            Command::Status {
                path: rest.first().cloned().unwrap_or_default(),
                depth: depth.unwrap_or(0),
            }
        }
        "download" => {
            let Some((dataset, files)) = rest.split_first() else {
                return Err("download needs a dataset name.".to_string());
            };
            if files.is_empty() && !use_defaults && !update {
                return Err(
                    "download needs file names, --default, or --update.".to_string(),
                );
            }
            Command::Download {
                dataset: dataset.clone(),
                files: files.to_vec(),
                use_defaults,
                update,
            }
        }
        "delete" => {
            let Some((dataset, files)) = rest.split_first() else {
                return Err("delete needs a dataset name.".to_string());
            };
            if files.is_empty() {
                return Err("delete needs at least one file name.".to_string());
            }
            Command::Delete {
                dataset: dataset.clone(),
                files: files.to_vec(),
            }
        }
        "mesh" => {
            expect_arity(name, rest, 2, 2)?;
            Command::Mesh {
                input: PathBuf::from(&rest[0]),
                output: PathBuf::from(&rest[1]),
            }
        }
        other => return Err(format!("Unknown command {other}.")),
    };

    if depth.is_some() && !matches!(command, Command::Status { .. }) {
        return Err("--depth only applies to status.".to_string());
    }
    if (use_defaults || update) && !matches!(command, Command::Download { .. }) {
        return Err("--default and --update only apply to download.".to_string());
    }

    Ok(Some(LaunchRequest { overrides, command }))
}

fn expect_arity(name: &str, rest: &[String], min: usize, max: usize) -> Result<(), String> {
    if rest.len() < min {
        return Err(format!("{name} is missing an argument."));
    }
    if rest.len() > max {
        return Err(format!("{name} got unexpected argument {}.", rest[max]));
    }
    Ok(())
}
