use std::io;

use thiserror::Error;

/// Failures of a single upload attempt. Nothing in this crate retries on any of these.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The multipart headers could not be built. Local and fatal for the attempt.
    #[error("failed to build multipart frame: {0}")]
    Frame(String),

    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The file source failed part way through. The request was still terminated with the
    /// closing boundary, so the server may have seen a short body.
    #[error("reading file failed after {streamed} bytes: {source}")]
    SourceRead {
        streamed: u64,
        #[source]
        source: io::Error,
    },

    #[error("file source yielded {streamed} bytes but {declared} were declared")]
    SizeMismatch { declared: u64, streamed: u64 },

    #[error("json unmarshal returns error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("upload failed: no file found in response")]
    EmptyResponse,

    #[error("upload producer stopped unexpectedly: {0}")]
    Producer(String),

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// True when the failure came from the network or the remote endpoint rather than from
    /// the local file source or the multipart framing.
    pub fn is_transport(&self) -> bool {
        matches!(self, UploadError::Transport(_))
    }
}
