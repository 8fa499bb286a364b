//! Fetch collaborator contracts
//!
//! The core never performs network I/O. It describes requests with these
//! types and receives the outcome back as controller events.

use std::time::Duration;

use crate::types::Size;

/// HTTP method of a document request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// A remote document request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
    /// Header overrides, e.g. a spoofed `Referer`.
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            body: None,
            headers: Vec::new(),
            timeout,
        }
    }

    /// Switch to POST with `body`.
    pub fn with_post(mut self, body: impl Into<String>) -> Self {
        self.method = Method::Post;
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A completed document response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub text: String,
    /// URL after redirects; relative references resolve against it.
    pub final_url: String,
    pub status: u16,
}

impl FetchResponse {
    /// Turn HTTP error statuses into a [`TransportError`].
    pub fn check(self, requested: &str) -> Result<Self, TransportError> {
        if self.status >= 400 {
            Err(TransportError::Status {
                url: requested.to_string(),
                status: self.status,
            })
        } else {
            Ok(self)
        }
    }
}

/// A binary asset (image/video) request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// Download through a same-origin fetch and display the blob.
    pub via_fetch: bool,
    /// No credentials or referer.
    pub anonymous: bool,
}

/// What the host reports once an asset has loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedAsset {
    /// Intrinsic dimensions; empty when the host could not read them.
    pub natural: Size,
    /// Downloaded size, when the host knows it.
    pub byte_len: Option<u64>,
}

/// Transport failure while fetching a document or asset.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request timed out: {url}")]
    Timeout { url: String },
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
    /// The element reported an error loading the media.
    #[error("cannot decode {url}")]
    Decode { url: String },
    /// Gallery asset below the plausibility threshold.
    #[error("asset too small ({bytes} bytes): {url}")]
    TooSmall { url: String, bytes: u64 },
}

impl TransportError {
    pub fn url(&self) -> &str {
        match self {
            TransportError::Status { url, .. }
            | TransportError::Timeout { url }
            | TransportError::Network { url, .. }
            | TransportError::Decode { url }
            | TransportError::TooSmall { url, .. } => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_check() {
        let ok = FetchResponse {
            text: String::new(),
            final_url: "https://x/".into(),
            status: 200,
        };
        assert!(ok.check("https://x/").is_ok());

        let missing = FetchResponse {
            text: String::new(),
            final_url: "https://x/a".into(),
            status: 404,
        };
        let err = missing.check("https://x/a").unwrap_err();
        assert_eq!(err, TransportError::Status { url: "https://x/a".into(), status: 404 });
        assert_eq!(err.url(), "https://x/a");
    }

    #[test]
    fn post_builder() {
        let req = FetchRequest::get("https://x/api", Duration::from_secs(5))
            .with_post("id=1")
            .with_header("Referer", "https://x/");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body.as_deref(), Some("id=1"));
        assert_eq!(req.headers.len(), 1);
    }
}
