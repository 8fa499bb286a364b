//! Resolution errors
//!
//! Rule-definition errors live in [`crate::rule::RuleError`], transport
//! errors in [`crate::fetch::TransportError`].

use crate::fetch::TransportError;

/// A hover session could not produce something to display.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no rule produced a URL for {url}")]
    NotFound { url: String },
    #[error("nothing found on {url}")]
    NothingExtracted { url: String },
    #[error("gallery at {url} is empty")]
    EmptyGallery { url: String },
    #[error("gallery extraction failed: {0}")]
    Gallery(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ResolveError {
    /// Whether the controller may try the next fallback URL.
    pub fn allows_fallback(&self) -> bool {
        matches!(self, ResolveError::Transport(_))
    }
}
