use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to stage raw inmate data at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to publish raw inmate data to {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid jail id: {0}")]
    InvalidJailId(String),

    #[error("Notification bus closed while waiting for an event")]
    BusClosed,

    #[error("Response channel closed before a reply arrived")]
    ResponseChannelClosed,

    #[error("Controller is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl ScraperError {
    /// True for failures caused by the snapshot directories rather than by
    /// configuration or collaborators.
    pub fn is_filesystem(&self) -> bool {
        matches!(self, Self::Staging { .. } | Self::Publish { .. })
    }
}
