use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;

/// Separator placed between parameter values.
const SEPARATOR: char = '_';
/// Escape character for values containing [`SEPARATOR`] or itself.
const ESCAPE: char = '\\';

/// The key of a cached value within a partition.
///
/// A key is derived from a set of named parameters. Parameters are ordered by name and only their
/// values end up in the key, so the parameter names of a partition form part of its schema: every
/// call site of one partition must use the same names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl CacheKey {
    /// Create a [`CacheKeyBuilder`] to add parameters one at a time.
    pub fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder::default()
    }

    /// Derives a key from an unordered set of named scalar parameters.
    ///
    /// Two parameter sets that are equal as sets yield the same key, regardless of the order
    /// they are passed in. If a name appears more than once, the last value wins.
    pub fn derive<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: fmt::Display,
    {
        params
            .into_iter()
            .fold(Self::builder(), |builder, (name, value)| {
                builder.param(name, value)
            })
            .build()
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(any(feature = "test", test))]
    pub fn for_testing(key: impl Into<String>) -> Self {
        Self(key.into().into())
    }
}

/// A builder for [`CacheKey`]s.
///
/// Values are rendered through [`Display`](fmt::Display), which must be **stable**: a value that
/// renders differently between releases leads to bad cache reuse.
#[derive(Debug, Default, Clone)]
pub struct CacheKeyBuilder {
    params: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    /// Adds a named parameter, replacing any previous value of the same name.
    pub fn param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let mut key = String::new();
        for (i, value) in self.params.values().enumerate() {
            if i > 0 {
                key.push(SEPARATOR);
            }
            write_escaped(&mut key, value);
        }
        CacheKey(key.into())
    }
}

fn write_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        // writing a `char` into a `String` never fails
        let _ = out.write_char(c);
    }
}
