//! Repository names, tags, and manifest references.

use std::fmt;

use camino::Utf8Path;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 128;

/// A validated repository name, such as `library/alpine`.
///
/// Names are one or more `/`-separated components of lowercase alphanumerics,
/// joined inside a component by `.`, `_`, `__` or runs of `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Repository(String);

impl Repository {
    /// Validate a repository name.
    pub fn parse(name: &str) -> RegistryResult<Self> {
        if name.is_empty() || name.len() > MAX_NAME_LEN || !name.split('/').all(valid_component) {
            return Err(RegistryError::InvalidRepository(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn as_path(&self) -> &Utf8Path {
        Utf8Path::new(&self.0)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let mut i = 0;

    loop {
        let start = i;
        while i < bytes.len() && alnum(bytes[i]) {
            i += 1;
        }
        if i == start {
            return false;
        }
        if i == bytes.len() {
            return true;
        }

        match bytes[i] {
            b'.' => i += 1,
            b'_' => {
                i += 1;
                if bytes.get(i) == Some(&b'_') {
                    i += 1;
                }
            }
            b'-' => {
                while bytes.get(i) == Some(&b'-') {
                    i += 1;
                }
            }
            _ => return false,
        }
    }
}

/// A validated tag name: `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// Whether `value` is a syntactically valid tag.
    pub fn is_valid(value: &str) -> bool {
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        value.len() <= MAX_TAG_LEN
            && (first.is_ascii_alphanumeric() || first == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    }

    /// Validate a tag name.
    pub fn parse(value: &str) -> RegistryResult<Self> {
        if Self::is_valid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(RegistryError::InvalidTag(value.to_string()))
        }
    }

    /// The tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `{ref}` path segment of a manifest request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Addressed by content digest.
    Digest(Digest),
    /// Addressed through the tag index.
    Tag(Tag),
}

impl Reference {
    /// Classify a reference string.
    ///
    /// Digest syntax wins over tag syntax, so a string which is a valid digest
    /// is never looked up as a tag.
    pub fn parse(value: &str) -> RegistryResult<Self> {
        if Digest::is_valid(value) {
            return Digest::parse(value).map(Reference::Digest);
        }
        Tag::parse(value).map(Reference::Tag)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Digest(digest) => fmt::Display::fmt(digest, f),
            Reference::Tag(tag) => fmt::Display::fmt(tag, f),
        }
    }
}
