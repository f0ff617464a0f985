//! Input resolution: turn a path, URL or byte buffer into a local PDF file.
//!
//! pdfium opens documents by path, so URLs are downloaded into a `TempDir`
//! and byte buffers are written to a `NamedTempFile`. Both are owned by the
//! returned [`ResolvedInput`] and deleted when it is dropped, on success and
//! on every error path. The `%PDF` magic is checked up front so a wrong file
//! fails with [`ScriptError::NotAPdf`] instead of a pdfium error.

use crate::error::ScriptError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF available on the local file system for as long as this value lives.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local { id: String, path: PathBuf },
    /// Input was a URL, downloaded into a temp directory.
    Downloaded {
        id: String,
        path: PathBuf,
        _temp_dir: TempDir,
    },
    /// Input was a byte buffer, written to a temp file.
    Materialized { id: String, file: NamedTempFile },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } | ResolvedInput::Downloaded { path, .. } => path,
            ResolvedInput::Materialized { file, .. } => file.path(),
        }
    }

    /// Identifier reported as the result's source.
    pub fn id(&self) -> &str {
        match self {
            ResolvedInput::Local { id, .. }
            | ResolvedInput::Downloaded { id, .. }
            | ResolvedInput::Materialized { id, .. } => id,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, ScriptError> {
    if input.trim().is_empty() {
        return Err(ScriptError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Write `bytes` to a temp file after checking the PDF magic.
pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<ResolvedInput, ScriptError> {
    check_magic(Path::new(name), bytes)?;

    let mut file = tempfile::Builder::new()
        .prefix("pdf2script-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| ScriptError::Internal(format!("tempfile: {e}")))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| ScriptError::Internal(format!("tempfile write: {e}")))?;

    debug!("Materialised {} ({} bytes) at {}", name, bytes.len(), file.path().display());
    Ok(ResolvedInput::Materialized {
        id: name.to_string(),
        file,
    })
}

fn check_magic(path: &Path, bytes: &[u8]) -> Result<(), ScriptError> {
    if bytes.len() < 4 || &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ScriptError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, ScriptError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(ScriptError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            let n = f.read(&mut magic).unwrap_or(0);
            check_magic(&path, &magic[..n])?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ScriptError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ScriptError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local {
        id: file_id(&path),
        path,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, ScriptError> {
    info!("Downloading PDF from: {}", url);

    let failed = |reason: String| ScriptError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ScriptError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| ScriptError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    check_magic(&file_path, &bytes)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| ScriptError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        id: filename,
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL if it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
