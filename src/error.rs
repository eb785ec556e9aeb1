use std::path::PathBuf;

use thiserror::Error;

/// Failures the rest of the crate needs to tell apart. They travel inside
/// `anyhow::Error` and are recovered with `downcast_ref::<StoryError>()`.
#[derive(Debug, Error)]
pub enum StoryError {
    /// Caller bug: playback was opened on an empty set or past its end.
    #[error("start index {index} is out of bounds for {len} stories")]
    InvalidIndex { index: usize, len: usize },

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("story id {0} already exists")]
    DuplicateId(String),
}

impl StoryError {
    pub fn kind(err: &anyhow::Error) -> Option<&StoryError> {
        err.downcast_ref::<StoryError>()
    }
}
