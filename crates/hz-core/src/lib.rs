//! Hoverzoom Core Library
//!
//! This crate resolves the thing under the pointer (a link, a thumbnail, a
//! video) to a full-size media URL, and drives the popup that shows it.
//!
//! # Architecture
//!
//! Resolution is data driven: an ordered [`RuleSet`] of host rules, each
//! compiled lazily on first use, is walked by the [`RuleMatcher`]. Rules may
//! rewrite the URL, extract it from a fetched page, or expand it into a
//! gallery. The interaction [`Controller`] is sans-IO: it consumes hover and
//! completion events and returns effects for the host to execute, so the same
//! state machine runs in a browser binding and in the CLI.
//!
//! # Modules
//!
//! - `pattern`: Filter-style URL patterns (`||host^`, `|prefix`, `*`)
//! - `url`: Host extraction and URL absolutization
//! - `dom`: Node abstraction over parsed HTML and fetched documents
//! - `expr`: Sandboxed expression language for rule fields
//! - `rule`: Host rule schema and compilation
//! - `substitute`: The `s` directive
//! - `gallery`: Gallery directives and deferred gallery resolution
//! - `native`: Registry of named native functions
//! - `rules`: The ordered, lazily compiled rule set
//! - `matcher`: Rule matching
//! - `placement`: Scale ladder and popup placement
//! - `navigator`: Gallery index arithmetic
//! - `frame`: Cross-frame view size protocol
//! - `fetch`: Fetch collaborator contracts
//! - `config`: Controller configuration
//! - `controller`: The popup state machine
//! - `types`: Shared type definitions

pub mod config;
pub mod controller;
pub mod dom;
pub mod error;
pub mod expr;
pub mod fetch;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod native;
pub mod navigator;
pub mod pattern;
pub mod placement;
pub mod rule;
pub mod rules;
pub mod substitute;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use config::{Config, ConfigError, ConfigStore};
pub use controller::{Controller, Effect, Event, Hover, Key, Phase, RequestId, Status, TimerId};
pub use error::ResolveError;
pub use fetch::{AssetRequest, FetchRequest, FetchResponse, LoadedAsset, TransportError};
pub use frame::FrameMessage;
pub use gallery::{GalleryFuture, GalleryInput};
pub use matcher::{FindOptions, RuleMatcher};
pub use native::FunctionTable;
pub use pattern::{Pattern, PatternError, PatternSet};
pub use rule::{HostRule, RuleDiagnostic, RuleError};
pub use rules::RuleSet;
pub use types::{GalleryItem, GalleryItems, MatchResult, Point, Rect, RuleId, Size};
