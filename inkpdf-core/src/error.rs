use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::annotation::AnnotationKind;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("page {page} is out of range for a document with {page_count} pages")]
    InvalidPage { page: usize, page_count: usize },

    #[error("cannot add to layer {0:?}: no such layer")]
    InvalidLayer(String),

    #[error("layer {0:?} already exists")]
    DuplicateLayer(String),

    #[error("layer name must not be empty")]
    EmptyLayerName,

    #[error("unknown layer {0:?}")]
    UnknownLayer(String),

    #[error("annotation store {path:?} is corrupt: {reason}")]
    CorruptStore { path: PathBuf, reason: String },

    #[error("I/O failure on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to render page {page}: {reason}")]
    RenderFailure { page: usize, reason: String },

    #[error("{edit} edit does not apply to a {kind} annotation")]
    GeometryMismatch {
        edit: &'static str,
        kind: AnnotationKind,
    },
}

impl AnnotationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorruptStore {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
