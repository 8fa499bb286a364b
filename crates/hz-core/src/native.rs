//! Registry of Rust functions that rules can reference by name
//!
//! `{"native": "name"}` in a rule's `s` or `g` field resolves through a
//! [`FunctionTable`] at compile time. An unknown name is a rule error.

use std::collections::HashMap;
use std::fmt;

use crate::gallery::{GalleryFuture, GalleryInput};
use crate::rule::RuleError;
use crate::substitute::{Outcome, SubstInput};

pub type NativeSubstitution = fn(&SubstInput<'_>) -> Outcome;
pub type NativeGallery = fn(&GalleryInput<'_>) -> GalleryFuture;

/// A resolved native function plus its registered name.
#[derive(Clone)]
pub struct NativeFn<F: Copy> {
    name: String,
    func: F,
}

impl<F: Copy> NativeFn<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> F {
        self.func
    }
}

impl<F: Copy> fmt::Debug for NativeFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native({})", self.name)
    }
}

/// Named substitution and gallery functions.
#[derive(Clone, Default)]
pub struct FunctionTable {
    substitutions: HashMap<String, NativeSubstitution>,
    galleries: HashMap<String, NativeGallery>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_substitution(&mut self, name: &str, func: NativeSubstitution) -> &mut Self {
        self.substitutions.insert(name.to_string(), func);
        self
    }

    pub fn register_gallery(&mut self, name: &str, func: NativeGallery) -> &mut Self {
        self.galleries.insert(name.to_string(), func);
        self
    }

    pub fn substitution(&self, name: &str) -> Result<NativeFn<NativeSubstitution>, RuleError> {
        self.substitutions
            .get(name)
            .map(|&func| NativeFn {
                name: name.to_string(),
                func,
            })
            .ok_or_else(|| RuleError::UnknownNative(name.to_string()))
    }

    pub fn gallery(&self, name: &str) -> Result<NativeFn<NativeGallery>, RuleError> {
        self.galleries
            .get(name)
            .map(|&func| NativeFn {
                name: name.to_string(),
                func,
            })
            .ok_or_else(|| RuleError::UnknownNative(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .substitutions
            .keys()
            .chain(self.galleries.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable").field("names", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GalleryItems;

    fn upper(input: &SubstInput<'_>) -> Outcome {
        Outcome::Urls(vec![input.url.to_uppercase()])
    }

    fn empty(_: &GalleryInput<'_>) -> GalleryFuture {
        GalleryFuture::Ready(Ok(GalleryItems::default()))
    }

    #[test]
    fn lookup_by_name() {
        let mut table = FunctionTable::new();
        table.register_substitution("upper", upper).register_gallery("empty", empty);

        assert_eq!(table.substitution("upper").unwrap().name(), "upper");
        assert!(table.gallery("empty").is_ok());
        assert_eq!(table.names(), vec!["empty", "upper"]);
        assert_eq!(
            table.gallery("upper").unwrap_err(),
            RuleError::UnknownNative("upper".to_string())
        );
    }
}
