//! Hoverzoom Rule Compiler
//!
//! This crate imports JSON rule lists into validated host rules, reporting
//! every rejected entry individually, and ships the built-in rule list with
//! the native functions it references.

pub mod builtin;
pub mod natives;
pub mod optimizer;
pub mod parser;

pub use builtin::{builtin_rules, load_rule_set, LoadedRules};
pub use natives::builtin_functions;
pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{export_rules, import_rules, ImportReport};
