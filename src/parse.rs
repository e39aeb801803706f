//! Node source parsing.
//!
//! Turning bytes into a typed node happens in two steps. A [`NodeParser`]
//! reads the source format and produces a [`RawNode`]: a declared type
//! identifier plus an untyped property table. The [`schema`](crate::schema)
//! registry then checks the properties against the declared type and builds a
//! draft node. Only the first step depends on the source format, so swapping
//! TOML for another format means implementing one trait.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Property holding the node's type identifier.
pub const TYPE_KEY: &str = "type";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("{0} is not valid UTF-8")]
    Utf8(PathBuf),
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} does not declare a `type`")]
    MissingType(PathBuf),
}

/// A parsed node whose fields are declared but not yet typed or resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    pub type_id: String,
    pub properties: toml::Table,
}

/// Capability to parse one node from its source bytes.
pub trait NodeParser: Send + Sync {
    /// File extension (without dot) of node sources this parser reads.
    fn extension(&self) -> &str;

    /// Parse a node. `origin` is only used for error messages.
    fn parse(&self, bytes: &[u8], origin: &Path) -> Result<RawNode, ParseError>;
}

/// Parser for TOML node files:
///
/// ```toml
/// type = "page"
/// title = "Hello"
/// hero = "hero.jpg"
/// related = ["../other-page"]
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlNodeParser;

impl NodeParser for TomlNodeParser {
    fn extension(&self) -> &str {
        "toml"
    }

    fn parse(&self, bytes: &[u8], origin: &Path) -> Result<RawNode, ParseError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::Utf8(origin.into()))?;
        let mut properties: toml::Table =
            toml::from_str(text).map_err(|source| ParseError::Toml {
                path: origin.into(),
                source,
            })?;
        let type_id = match properties.remove(TYPE_KEY) {
            Some(toml::Value::String(s)) if !s.is_empty() => s,
            _ => return Err(ParseError::MissingType(origin.into())),
        };
        Ok(RawNode {
            type_id,
            properties,
        })
    }
}
