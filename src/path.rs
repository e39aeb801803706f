//! Hierarchical content paths.
//!
//! Every node in the content graph is addressed by a [`ContentPath`]: an
//! immutable sequence of [`Slug`]s from the graph root. The string syntax
//! mirrors filesystem paths:
//!
//! ```text
//! /                     root
//! /blog/first-post      absolute (leading separator)
//! ../about              relative to the referencing node
//! gallery/./sunset      `.` segments and empty segments are ignored
//! ```
//!
//! Slugs are validated when they are constructed, never when they are used,
//! so a `ContentPath` value is always well formed. Two strings that denote the
//! same logical path always resolve to equal `ContentPath` values; that is what
//! makes the path index a sound lookup key.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Path separator in content path strings.
pub const SEPARATOR: char = '/';

/// Longest slug produced by [`Slug::slugify`].
const MAX_SLUG_LEN: usize = 80;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Not a valid slug: {0:?} (must match ^[A-Za-z0-9_-]+$)")]
    InvalidSlug(String),
    #[error("Path {base} has no parent for '..' in {target:?}")]
    AboveRoot { base: String, target: String },
    #[error("Cannot derive a slug from {0:?}")]
    EmptySlug(String),
}

/// A single validated path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

impl Slug {
    /// Validate a raw string as a slug.
    pub fn new(value: impl Into<String>) -> Result<Self, PathError> {
        let value = value.into();
        if is_valid_slug(&value) {
            Ok(Self(value))
        } else {
            Err(PathError::InvalidSlug(value))
        }
    }

    /// Derive a slug from a free-form title.
    ///
    /// Lowercases, replaces everything outside `[a-z0-9_-]` with dashes,
    /// collapses dash runs and trims dashes at both ends. Long titles are cut
    /// at the last dash before the length limit.
    pub fn slugify(title: &str) -> Result<Self, PathError> {
        let mapped: String = title
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();

        let mut collapsed = String::with_capacity(mapped.len());
        let mut prev_dash = false;
        for c in mapped.chars() {
            if c == '-' {
                if !prev_dash {
                    collapsed.push('-');
                }
                prev_dash = true;
            } else {
                collapsed.push(c);
                prev_dash = false;
            }
        }

        let trimmed = collapsed.trim_matches('-');
        let slug = if trimmed.len() <= MAX_SLUG_LEN {
            trimmed
        } else {
            let truncated = &trimmed[..MAX_SLUG_LEN];
            match truncated.rfind('-') {
                Some(pos) => &truncated[..pos],
                None => truncated,
            }
        };

        if slug.is_empty() {
            return Err(PathError::EmptySlug(title.to_string()));
        }
        Self::new(slug)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Slug {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Slug::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Check a segment against `^[A-Za-z0-9_-]+$`.
pub fn is_valid_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Immutable hierarchical identifier of a content node.
///
/// Equality and hashing are by slug sequence. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentPath {
    slugs: Vec<Slug>,
}

impl ContentPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_slugs(slugs: Vec<Slug>) -> Self {
        Self { slugs }
    }

    /// Parse a path string from the root. A leading separator is optional.
    pub fn parse(value: &str) -> Result<Self, PathError> {
        Self::root().resolve(value.trim_start_matches(SEPARATOR))
    }

    pub fn is_root(&self) -> bool {
        self.slugs.is_empty()
    }

    pub fn slugs(&self) -> &[Slug] {
        &self.slugs
    }

    /// Last slug; `None` for the root.
    pub fn name(&self) -> Option<&Slug> {
        self.slugs.last()
    }

    /// The enclosing path; `None` for the root.
    pub fn parent(&self) -> Option<ContentPath> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            slugs: self.slugs[..self.slugs.len() - 1].to_vec(),
        })
    }

    pub fn child(&self, slug: Slug) -> ContentPath {
        let mut slugs = self.slugs.clone();
        slugs.push(slug);
        Self { slugs }
    }

    pub fn depth(&self) -> usize {
        self.slugs.len()
    }

    pub fn starts_with(&self, prefix: &ContentPath) -> bool {
        self.slugs.starts_with(&prefix.slugs)
    }

    /// Resolve `target` against this path.
    ///
    /// An absolute target (leading separator) replaces this path entirely.
    /// Otherwise segments are appended, `..` pops one level and `.` or empty
    /// segments are ignored. Popping past the root is an error, as is any
    /// segment that is not a valid slug.
    pub fn resolve(&self, target: &str) -> Result<ContentPath, PathError> {
        let mut slugs = if target.starts_with(SEPARATOR) {
            Vec::new()
        } else {
            self.slugs.clone()
        };

        for segment in target.split(SEPARATOR) {
            match segment {
                "" | "." => {}
                ".." => {
                    if slugs.pop().is_none() {
                        return Err(PathError::AboveRoot {
                            base: self.to_string(),
                            target: target.to_string(),
                        });
                    }
                }
                other => slugs.push(Slug::new(other)?),
            }
        }

        Ok(Self { slugs })
    }
}

impl fmt::Display for ContentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.slugs.is_empty() {
            return f.write_str("/");
        }
        for slug in &self.slugs {
            write!(f, "/{slug}")?;
        }
        Ok(())
    }
}

impl Serialize for ContentPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentPath {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentPath::parse(&raw).map_err(serde::de::Error::custom)
    }
}
