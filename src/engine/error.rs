//! Error taxonomy for the archive engine.
//!
//! The teacher (`chiro2001-rfs`) returns `anyhow::Result` everywhere and
//! never types its errors, but callers here need a closed set of semantic
//! kinds they can match on, so this crate follows the `thiserror` idiom
//! used elsewhere in the pack (e.g. `hyrax_err`) instead.

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ImgError {
    #[error("not a recognizable IMG archive: {detail}")]
    Format { detail: String },

    #[error("no entry named {name:?}")]
    NotFound { name: String },

    #[error("an entry named {name:?} already exists")]
    DuplicateName { name: String },

    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("access denied: {detail}")]
    Access { detail: String },

    #[error("internal invariant violated: {detail}")]
    Invariant { detail: String },
}

pub type Result<T> = std::result::Result<T, ImgError>;

// img_driver's `Backend` constructors return `anyhow::Result`; this is the
// one seam where that boundary meets the engine's typed taxonomy.
impl From<anyhow::Error> for ImgError {
    fn from(err: anyhow::Error) -> Self {
        ImgError::Io(io::Error::new(io::ErrorKind::Other, err.to_string()))
    }
}
