//! # sitegraph
//!
//! The content core of a static site generator: a typed, cross-referenced
//! content graph loaded from a directory tree, plus a persistent cache for
//! derived assets such as resized images.
//!
//! # Architecture: Two Phases, Then Render
//!
//! ```text
//! 1. Load      content/  →  LoaderContext   (filesystem → draft nodes + path index)
//! 2. Validate  drafts    →  ContentGraph    (references, files and links bound)
//! 3. Render    graph     →  output/         (renderer's business, via the render boundary)
//! ```
//!
//! Every node is loaded before any reference is resolved, so a node may point
//! at a sibling that sorts after it. The build [`context::Phase`] only moves
//! forward; operations called in the wrong phase fail with a
//! [`context::PhaseViolation`] instead of seeing a half-built index.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`path`] | `Slug` and `ContentPath`: validated, normalized node addresses |
//! | [`naming`] | `NNN-name` entry name convention: sort key and slug |
//! | [`parse`] | Node source parsing (`_index.toml`, `<name>.toml`) |
//! | [`schema`] | Node kinds, field types and the type registry |
//! | [`node`] | Draft values, bound values and nodes |
//! | [`context`] | Build phases and the loader context |
//! | [`loader`] | Directory walk producing draft nodes |
//! | [`validate`] | Binding drafts against the path index |
//! | [`graph`] | The ready `ContentGraph` and `GraphBuilder` |
//! | [`render`] | The render boundary: lookups, hrefs, artifact placement |
//! | [`markdown`] | Markdown links, expressions and summaries |
//! | [`cache`] | Two-tier (memory + disk) derived-asset cache |
//! | [`imaging`] | Image identify/resize backends and the cached transformer |
//! | [`config`] | `config.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Arena Nodes, Not Pointers
//!
//! Nodes live in a `Vec` and refer to each other by [`node::NodeId`]. Parent,
//! child and reference edges are plain indices, so the graph is immutable,
//! `Send + Sync`, and can be rendered from many threads without locks.
//!
//! ## Drafts and Bound Values Are Different Types
//!
//! A loaded node holds [`node::DraftValue`]s: references are raw strings and
//! files are unchecked names. Validation turns them into [`node::Value`]s
//! holding resolved ids and on-disk paths. Code that has a `Node` never has to
//! ask whether its references were checked.
//!
//! ## Content-Addressed Cache Keys
//!
//! Derived assets are keyed by everything that determines them (source
//! identity, size, parameters), digested with SHA-256. An unchanged source
//! with unchanged parameters hits the cache across runs; any change misses.
//! Artifacts carry a random suffix so two versions never collide on disk.

pub mod cache;
pub mod config;
pub mod context;
pub mod graph;
pub mod imaging;
pub mod loader;
pub mod markdown;
pub mod naming;
pub mod node;
pub mod output;
pub mod parse;
pub mod path;
pub mod render;
pub mod schema;
pub mod validate;

#[cfg(test)]
pub(crate) mod test_helpers;
