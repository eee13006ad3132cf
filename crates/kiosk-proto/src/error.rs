//! Error taxonomy for the content engine.
//!
//! Descriptor-level failures (transport, parse, empty, association) stop
//! rotation and are surfaced to the operator. `MediaFetch` is always absorbed
//! by the leaf that produced it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::Target;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("request failed: {reason}")]
    Transport { reason: String },

    #[error("malformed content: {0}")]
    Parse(String),

    #[error("no content returned for {target}")]
    EmptyContent { target: Target },

    #[error("media download failed for {url}: {reason}")]
    MediaFetch { url: String, reason: String },

    #[error("no playable content: {0}")]
    Association(String),

    #[error(transparent)]
    Storage(#[from] std::io::Error),
}

/// Serializable discriminant of [`EngineError`], published in state snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Parse,
    EmptyContent,
    MediaFetch,
    Association,
    Storage,
}

impl EngineError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn media_fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MediaFetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Transport { .. } => ErrorKind::Transport,
            EngineError::Parse(_) => ErrorKind::Parse,
            EngineError::EmptyContent { .. } => ErrorKind::EmptyContent,
            EngineError::MediaFetch { .. } => ErrorKind::MediaFetch,
            EngineError::Association(_) => ErrorKind::Association,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// True for failures that must halt rotation rather than stay local to a leaf.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EngineError::MediaFetch { .. })
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::transport(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_fetch_is_the_only_local_failure() {
        assert!(!EngineError::media_fetch("http://x/a.png", "404").is_fatal());
        assert!(EngineError::transport("down").is_fatal());
        assert!(EngineError::Parse("bad".into()).is_fatal());
        assert!(EngineError::Association("nothing".into()).is_fatal());
    }

    #[test]
    fn empty_content_names_the_target() {
        let err = EngineError::EmptyContent {
            target: Target::Menu { id: "7".into() },
        };
        assert_eq!(err.kind(), ErrorKind::EmptyContent);
        assert!(err.to_string().contains("menu 7"));
    }
}
