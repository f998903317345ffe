use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use reqwest::blocking::Client;

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};

/// Downloads are streamed in pieces of this size so that multi-gigabyte
/// volumes never sit in memory.
pub const CHUNK_SIZE: usize = 1024 * 1024;

const PARTIAL_SUFFIX: &str = ".part";

/// Fetches a single remote resource into a local file.
pub trait Transfer {
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()>;
}

/// Plain HTTP(S) GET of `{base_url}{remote_path}`.
pub struct HttpDownloader {
    client: Client,
    base_url: String,
}

impl HttpDownloader {
    pub fn new(config: &ArchiveConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_http_client(config)?,
            base_url: config.base_url.clone(),
        })
    }

    pub fn url_for(&self, remote_path: &str) -> String {
        remote_url(&self.base_url, remote_path)
    }
}

impl Transfer for HttpDownloader {
    fn download(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let url = self.url_for(remote_path);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| ArchiveError::Transfer {
                url: url.clone(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Transfer {
                url,
                reason: format!("HTTP {status}"),
            });
        }

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).map_err(|err| ArchiveError::io(parent, err))?;
        }

        let written = stream_to_file(response, &url, local_path)?;
        log::debug!("Wrote {written} bytes from {url} to {}", local_path.display());
        Ok(())
    }
}

pub fn build_http_client(config: &ArchiveConfig) -> anyhow::Result<Client> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
        .context("Could not initialize HTTP client for the data archive")
}

pub fn http_get_bytes(client: &Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("HTTP request failed for {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {status} for {url}");
    }

    response
        .bytes()
        .map(|body| body.to_vec())
        .with_context(|| format!("Could not read response body from {url}"))
}

pub fn remote_url(base_url: &str, remote_path: &str) -> String {
    let relative = remote_path.replace('\\', "/");
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        relative.trim_start_matches('/')
    )
}

pub fn probe_url(base_url: &str, probe_file: &str) -> String {
    remote_url(base_url, probe_file)
}

/// Sibling path a download is written to before it replaces `destination`.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(PARTIAL_SUFFIX);
    destination.with_file_name(name)
}

/// Copies `reader` into `destination` in `CHUNK_SIZE` pieces. The data lands
/// in a `.part` sibling first and is renamed over `destination` only once
/// the stream is exhausted. Read failures are transfer errors against
/// `source_url`; create, write and rename failures are I/O errors.
pub fn stream_to_file<R: Read>(reader: R, source_url: &str, destination: &Path) -> Result<u64> {
    let partial = partial_path(destination);
    let result = write_partial(reader, source_url, &partial, destination);
    if result.is_err() && partial.exists() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_partial<R: Read>(
    mut reader: R,
    source_url: &str,
    partial: &Path,
    destination: &Path,
) -> Result<u64> {
    let file = File::create(partial).map_err(|err| ArchiveError::io(partial, err))?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(ArchiveError::Transfer {
                    url: source_url.to_string(),
                    reason: err.to_string(),
                })
            }
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|err| ArchiveError::io(partial, err))?;
        written += read as u64;
    }
    writer.flush().map_err(|err| ArchiveError::io(partial, err))?;
    drop(writer);
    fs::rename(partial, destination).map_err(|err| ArchiveError::io(destination, err))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};

    const SOURCE: &str = "https://example.org/lapd/m01/file";

    /// Serves `response` to a single connection on a local port and returns
    /// the matching archive config.
    fn serve_once(response: &'static [u8]) -> (ArchiveConfig, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let read = stream.read(&mut buf).expect("read request");
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }
            stream.write_all(response).expect("write response");
        });
        let config = ArchiveConfig {
            base_url: format!("http://127.0.0.1:{port}/"),
            connect_timeout: std::time::Duration::from_secs(5),
            request_timeout: std::time::Duration::from_secs(10),
            ..ArchiveConfig::default()
        };
        (config, handle)
    }

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"head");
            Ok(4)
        }
    }

    #[test]
    fn remote_url_joins_base_and_path() {
        assert_eq!(
            remote_url("https://example.org/lapd/", "m01/Lobes.nrrd"),
            "https://example.org/lapd/m01/Lobes.nrrd"
        );
        assert_eq!(
            remote_url("https://example.org/lapd", "/m01\\Lobes.nrrd"),
            "https://example.org/lapd/m01/Lobes.nrrd"
        );
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/cache/m01/Lobes.nrrd")),
            PathBuf::from("/cache/m01/Lobes.nrrd.part")
        );
    }

    #[test]
    fn stream_spanning_several_chunks_is_written_whole() {
        let dir = tempfile::tempdir().expect("tempdir");
        let destination = dir.path().join("volume.mha");
        let payload = (0..(CHUNK_SIZE * 2 + 17))
            .map(|i| (i % 251) as u8)
            .collect::<Vec<_>>();

        let written = stream_to_file(Cursor::new(payload.clone()), SOURCE, &destination)
            .expect("stream should succeed");

        assert_eq!(written, payload.len() as u64);
        assert_eq!(fs::read(&destination).expect("read back"), payload);
        assert!(!partial_path(&destination).exists());
    }

    #[test]
    fn completed_stream_replaces_previous_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let destination = dir.path().join("notes.txt");
        fs::write(&destination, b"an older and longer copy").expect("seed");

        stream_to_file(Cursor::new(b"new".to_vec()), SOURCE, &destination).expect("stream");
        assert_eq!(fs::read(&destination).expect("read back"), b"new");
    }

    #[test]
    fn interrupted_stream_leaves_no_file_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let destination = dir.path().join("broken.nrrd");

        let err = stream_to_file(FailingReader { sent: false }, SOURCE, &destination)
            .expect_err("stream should fail");

        match err {
            ArchiveError::Transfer { url, reason } => {
                assert_eq!(url, SOURCE);
                assert!(reason.contains("connection reset"), "{reason}");
            }
            other => panic!("expected a transfer error, got {other:?}"),
        }
        assert!(!destination.exists());
        assert!(!partial_path(&destination).exists());
    }

    #[test]
    fn error_status_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, server) = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\nConnection: close\r\n\r\nnot found",
        );
        let downloader = HttpDownloader::new(&config).expect("client should build");
        let destination = dir.path().join("m01").join("Lobes.nrrd");

        let err = downloader
            .download("m01/Lobes.nrrd", &destination)
            .expect_err("404 should fail");
        server.join().expect("server thread");

        match err {
            ArchiveError::Transfer { reason, .. } => assert!(reason.contains("404"), "{reason}"),
            other => panic!("expected a transfer error, got {other:?}"),
        }
        assert!(!destination.exists());
        assert!(!partial_path(&destination).exists());
        assert!(!dir.path().join("m01").exists());
    }

    #[test]
    fn success_creates_missing_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, server) = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        );
        let downloader = HttpDownloader::new(&config).expect("client should build");
        let destination = dir.path().join("m01").join("nested").join("notes.txt");

        downloader
            .download("m01/nested/notes.txt", &destination)
            .expect("download should succeed");
        server.join().expect("server thread");

        assert_eq!(fs::read(&destination).expect("read back"), b"hello");
        assert!(!partial_path(&destination).exists());
    }

    #[test]
    fn unreachable_host_is_a_transfer_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ArchiveConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            connect_timeout: std::time::Duration::from_secs(2),
            ..ArchiveConfig::default()
        };
        let downloader = HttpDownloader::new(&config).expect("client should build");
        let destination = dir.path().join("m01").join("Lobes.nrrd");

        let err = downloader
            .download("m01/Lobes.nrrd", &destination)
            .expect_err("download should fail");

        assert!(matches!(err, ArchiveError::Transfer { .. }));
        assert!(!destination.exists());
    }
}
