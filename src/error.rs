use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("remote index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("transfer failed for {url}: {reason}")]
    Transfer { url: String, reason: String },

    #[error("malformed tube record (ID {id:?}): {reason}")]
    MalformedRecord { id: Option<i64>, reason: String },

    #[error("measurement table matches no known column set")]
    UnclassifiableSchema,

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
