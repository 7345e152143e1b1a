//! Photo dereferencing.
//!
//! A `PHOTO_REF` tag carries a location; uploading needs the image itself
//! as web-safe base64. Unreachable references yield `None`, never an error:
//! a missing photo is not worth failing an import over.

use crate::error::{Result, SyncError};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use reqwest::blocking::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Upper bound on one photo download.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves a photo reference to upload-ready bytes.
pub trait PhotoSource {
    /// Web-safe base64 image bytes, or `None` when unreachable.
    fn fetch(&self, reference: &str) -> Option<String>;
}

/// Reads `file://` URLs and plain paths from the local filesystem.
///
/// Relative paths resolve against `base_dir` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FilePhotoSource {
    base_dir: Option<PathBuf>,
}

impl FilePhotoSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        if reference.is_empty() {
            return None;
        }
        let raw = match reference.split_once("://") {
            Some(("file", rest)) => rest,
            Some(_) => return None,
            None => reference,
        };
        let path = Path::new(raw);
        match &self.base_dir {
            Some(base) if path.is_relative() => Some(base.join(path)),
            _ => Some(path.to_path_buf()),
        }
    }
}

impl PhotoSource for FilePhotoSource {
    fn fetch(&self, reference: &str) -> Option<String> {
        let path = self.resolve(reference)?;
        match fs::read(&path) {
            Ok(bytes) if !bytes.is_empty() => Some(URL_SAFE.encode(bytes)),
            Ok(_) => {
                debug!(path = %path.display(), "Photo file is empty");
                None
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Photo unreachable");
                None
            }
        }
    }
}

/// Downloads `http://` and `https://` references; everything else goes to
/// the wrapped [`FilePhotoSource`].
#[derive(Debug, Clone)]
pub struct HttpPhotoSource {
    client: Client,
    files: FilePhotoSource,
}

impl HttpPhotoSource {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(files: FilePhotoSource, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                SyncError::Other(anyhow::Error::new(err).context("building photo HTTP client"))
            })?;
        Ok(Self { client, files })
    }

    fn download(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(err) => {
                debug!(url, error = %err, "Photo unreachable");
                return None;
            }
        };
        let status = response.status();
        if !status.is_success() {
            debug!(url, status = status.as_u16(), "Photo request refused");
            return None;
        }
        match response.bytes() {
            Ok(bytes) if !bytes.is_empty() => Some(URL_SAFE.encode(bytes)),
            Ok(_) => {
                debug!(url, "Photo response is empty");
                None
            }
            Err(err) => {
                debug!(url, error = %err, "Photo body unreadable");
                None
            }
        }
    }
}

impl PhotoSource for HttpPhotoSource {
    fn fetch(&self, reference: &str) -> Option<String> {
        if is_http(reference) {
            self.download(reference)
        } else {
            self.files.fetch(reference)
        }
    }
}

fn is_http(reference: &str) -> bool {
    reference.split_once("://").is_some_and(|(scheme, _)| {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fetch_file_url_and_path() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("ada.png");
        fs::write(&image, b"\x89PNG\r\n").unwrap();
        let source = FilePhotoSource::new();

        let expected = URL_SAFE.encode(b"\x89PNG\r\n");
        let url = format!("file://{}", image.display());
        assert_eq!(source.fetch(&url).as_deref(), Some(expected.as_str()));
        assert_eq!(
            source.fetch(&image.display().to_string()).as_deref(),
            Some(expected.as_str())
        );
    }

    #[test]
    fn test_relative_paths_use_base_dir() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.png"), b"img").unwrap();
        let source = FilePhotoSource::with_base_dir(temp.path());
        assert!(source.fetch("a.png").is_some());
        assert!(FilePhotoSource::new().fetch("definitely-missing.png").is_none());
    }

    #[test]
    fn test_unreachable_references() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("empty.png"), b"").unwrap();
        let source = FilePhotoSource::with_base_dir(temp.path());

        assert!(source.fetch("").is_none());
        assert!(source.fetch("empty.png").is_none());
        assert!(source.fetch("https://example.org/a.png").is_none());
        assert!(source.fetch("store://people/c1/photo").is_none());
    }

    /// Serve `count` requests: `/ada.png` gets image bytes, anything else 404.
    fn serve(count: usize) -> (String, std::thread::JoinHandle<()>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let handle = std::thread::spawn(move || {
            for _ in 0..count {
                let request = server.recv().unwrap();
                if request.url() == "/ada.png" {
                    request
                        .respond(tiny_http::Response::from_data(b"\x89PNG\r\n".to_vec()))
                        .unwrap();
                } else {
                    request.respond(tiny_http::Response::empty(tiny_http::StatusCode(404))).unwrap();
                }
            }
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn test_http_reference_downloaded() {
        let (base, server) = serve(2);
        let source = HttpPhotoSource::new(FilePhotoSource::new(), FETCH_TIMEOUT).unwrap();

        let expected = URL_SAFE.encode(b"\x89PNG\r\n");
        assert_eq!(
            source.fetch(&format!("{base}/ada.png")).as_deref(),
            Some(expected.as_str())
        );
        assert!(source.fetch(&format!("{base}/missing.png")).is_none());
        server.join().unwrap();
    }

    #[test]
    fn test_http_source_falls_back_to_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.png"), b"img").unwrap();
        let source =
            HttpPhotoSource::new(FilePhotoSource::with_base_dir(temp.path()), FETCH_TIMEOUT)
                .unwrap();
        assert!(source.fetch("a.png").is_some());
        assert!(source.fetch("store://people/c1/photo").is_none());
        // Nothing listens on port 9 of the loopback interface.
        assert!(source.fetch("http://127.0.0.1:9/a.png").is_none());
    }

    #[test]
    fn test_is_http() {
        assert!(is_http("https://example.org/a.png"));
        assert!(is_http("HTTP://example.org/a.png"));
        assert!(!is_http("file:///a.png"));
        assert!(!is_http("a.png"));
    }
}
