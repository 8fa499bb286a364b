//! Cross-frame view size protocol
//!
//! A controller running in a nested frame asks the enclosing frame for its
//! visible size:
//!
//! ```text
//! child  -> parent   requestViewSize
//! parent -> child    viewSize:<w>:<h>
//! ```

use std::fmt;
use std::str::FromStr;

use crate::types::Size;

const REQUEST: &str = "requestViewSize";
const REPLY_PREFIX: &str = "viewSize:";

/// A frame protocol message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameMessage {
    RequestViewSize,
    ViewSize(Size),
}

/// Error type for frame messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("not a frame message: {0}")]
    Unknown(String),
    #[error("invalid view size: {0}")]
    BadSize(String),
}

impl FromStr for FrameMessage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == REQUEST {
            return Ok(FrameMessage::RequestViewSize);
        }
        let rest = s
            .strip_prefix(REPLY_PREFIX)
            .ok_or_else(|| ParseError::Unknown(s.to_string()))?;
        let (w, h) = rest
            .split_once(':')
            .ok_or_else(|| ParseError::BadSize(rest.to_string()))?;
        let parse = |v: &str| -> Result<f64, ParseError> {
            v.parse::<f64>()
                .ok()
                .filter(|n| n.is_finite() && *n > 0.0)
                .ok_or_else(|| ParseError::BadSize(rest.to_string()))
        };
        Ok(FrameMessage::ViewSize(Size::new(parse(w)?, parse(h)?)))
    }
}

impl fmt::Display for FrameMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameMessage::RequestViewSize => f.write_str(REQUEST),
            FrameMessage::ViewSize(size) => write!(f, "{}{}:{}", REPLY_PREFIX, size.w, size.h),
        }
    }
}
