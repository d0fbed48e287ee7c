use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use uuid::Uuid;

const POINTER_PREFIX: &str = "blob:";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid blob path: {0}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPointer(String);

impl BlobPointer {
    pub fn parse(raw: &str) -> Result<Self, BlobError> {
        raw.strip_prefix(POINTER_PREFIX)
            .filter(|rest| !rest.is_empty())
            .map(|_| Self(raw.to_string()))
            .ok_or_else(|| BlobError::InvalidPath(raw.to_string()))
    }

    pub fn relative_path(&self) -> &str {
        self.0.strip_prefix(POINTER_PREFIX).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BlobPointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where raw provider payloads live. Writing the same path twice replaces
/// the content, so a retried write is harmless.
pub trait BlobStore: Send + Sync {
    fn write_blob(&self, path: &str, bytes: &[u8]) -> Result<BlobPointer, BlobError>;

    fn read_blob(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError>;
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, BlobError> {
        let relative_path = Path::new(relative);
        let escapes = relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if relative.is_empty() || escapes {
            return Err(BlobError::InvalidPath(relative.to_string()));
        }
        Ok(self.root.join(relative_path))
    }
}

impl BlobStore for FsBlobStore {
    fn write_blob(&self, path: &str, bytes: &[u8]) -> Result<BlobPointer, BlobError> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| BlobError::InvalidPath(path.to_string()))?;
        std::fs::create_dir_all(parent).map_err(|source| BlobError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| BlobError::InvalidPath(path.to_string()))?;
        let temp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let write_result = std::fs::File::create(&temp)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|_| std::fs::rename(&temp, &target));
        if let Err(source) = write_result {
            let _ = std::fs::remove_file(&temp);
            return Err(BlobError::Io {
                path: target,
                source,
            });
        }

        Ok(BlobPointer(format!("{POINTER_PREFIX}{path}")))
    }

    fn read_blob(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError> {
        let target = self.resolve(pointer.relative_path())?;
        std::fs::read(&target).map_err(|source| BlobError::Io {
            path: target,
            source,
        })
    }
}

fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// `<project>/<yyyy>/<mm>/<message id>.json`; undated messages land under
/// `<project>/undated/`.
pub fn raw_content_path(
    project_id: &str,
    sent_at: Option<&DateTime<Utc>>,
    provider_message_id: &str,
) -> String {
    let project = path_segment(project_id);
    let file = format!("{}.json", path_segment(provider_message_id));
    match sent_at {
        Some(sent_at) => format!(
            "{project}/{:04}/{:02}/{file}",
            sent_at.year(),
            sent_at.month()
        ),
        None => format!("{project}/undated/{file}"),
    }
}
