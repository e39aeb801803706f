//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Output is **information-centric, not file-centric**. Every node leads with
//! its positional index, title and type; its content path and source file
//! follow as indented context lines, so the output reads as a content
//! inventory while still pointing back at the files.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! Content
//! 001 Photos [website]
//!     Path: /
//!     Source: _index.toml
//!     001 Gallery [section]
//!         Path: /gallery
//!         Source: 010-gallery/_index.toml
//!
//! 3 nodes, 1 reference, 1 file
//! ```
//!
//! ## Image
//!
//! ```text
//! /gallery/sunset image (100x50)
//!     image/png: /gallery/sunset/Cover_100x50_orig_hero.png
//!     image/webp: /gallery/sunset/Cover_100x50_webp_hero.png.webp
//! ```
//!
//! ## Cache
//!
//! ```text
//! image-resize
//!     Entries: 5 (2 in memory)
//!     Disk: 12.0 KB of 50.0 MB
//!     Activity: 3 cached, 2 computed (5 total)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::{CacheStats, CacheValue, DerivedAssetCache};
use crate::graph::ContentGraph;
use crate::imaging::TransformedPicture;
use crate::node::{Node, Value};
use serde::Serialize;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Human-readable byte count: `512 B`, `12.0 KB`, `50.0 MB`.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Node header: position, title (or slug) and type.
///
/// ```text
/// 001 Gallery [section]
/// 002 (untitled) [article]
/// ```
fn node_line(position: usize, node: &Node) -> String {
    let label = node
        .title()
        .map(str::to_string)
        .or_else(|| node.path().name().map(|s| s.to_string()))
        .unwrap_or_else(|| "(untitled)".to_string());
    format!("{} {} [{}]", format_index(position), label, node.type_id())
}

#[derive(Default)]
struct Counts {
    references: usize,
    files: usize,
}

impl Counts {
    fn add(&mut self, value: &Value) {
        match value {
            Value::Reference(_) => self.references += 1,
            Value::File(_) | Value::Image(_) => self.files += 1,
            Value::List(items) => items.iter().for_each(|item| self.add(item)),
            _ => {}
        }
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format the loaded content tree.
pub fn format_tree(graph: &ContentGraph, source_root: &Path) -> Vec<String> {
    let mut lines = vec!["Content".to_string()];
    let mut counts = Counts::default();

    for (depth, node) in graph.walk(graph.root().id()) {
        let position = match node.parent() {
            Some(parent) => {
                graph
                    .node(parent)
                    .children()
                    .iter()
                    .position(|c| *c == node.id())
                    .unwrap_or(0)
                    + 1
            }
            None => 1,
        };
        let base = indent(depth);
        lines.push(format!("{base}{}", node_line(position, node)));
        lines.push(format!("{base}    Path: {}", node.path()));

        let source = &graph.metadata(node.id()).source_file;
        let shown = source.strip_prefix(source_root).unwrap_or(source);
        lines.push(format!("{base}    Source: {}", shown.display()));

        node.fields().values().for_each(|v| counts.add(v));
    }

    lines.push(String::new());
    lines.push(format!(
        "{}, {}, {}",
        plural(graph.len(), "node"),
        plural(counts.references, "reference"),
        plural(counts.files, "file")
    ));
    lines
}

pub fn print_tree(graph: &ContentGraph, source_root: &Path) {
    for line in format_tree(graph, source_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Image
// ============================================================================

/// Format a transformed picture: primary first, then alternates.
pub fn format_picture(
    label: &str,
    primary_mime: &str,
    picture: &TransformedPicture,
) -> Vec<String> {
    let mut lines = vec![format!(
        "{label} ({}x{})",
        picture.image.width, picture.image.height
    )];
    lines.push(format!("    {primary_mime}: {}", picture.image.href));
    for source in &picture.sources {
        lines.push(format!("    {}: {}", source.mime_type, source.href));
    }
    lines
}

// ============================================================================
// Cache
// ============================================================================

/// Snapshot of one cache for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
    pub name: String,
    pub entries: usize,
    pub in_memory: usize,
    pub disk_usage: u64,
    pub disk_budget: u64,
    pub stats: CacheStats,
}

impl CacheSummary {
    pub fn of<K: Serialize, V: CacheValue>(cache: &DerivedAssetCache<K, V>) -> Self {
        Self {
            name: cache.name().to_string(),
            entries: cache.len(),
            in_memory: cache.heap_len(),
            disk_usage: cache.disk_usage(),
            disk_budget: cache.capacity().disk_bytes,
            stats: cache.stats(),
        }
    }
}

pub fn format_cache_summary(summary: &CacheSummary) -> Vec<String> {
    let mut lines = vec![summary.name.clone()];
    lines.push(format!(
        "    Entries: {} ({} in memory)",
        summary.entries, summary.in_memory
    ));
    lines.push(format!(
        "    Disk: {} of {}",
        format_bytes(summary.disk_usage),
        format_bytes(summary.disk_budget)
    ));
    if summary.stats.total() > 0 {
        lines.push(format!("    Activity: {}", summary.stats));
    }
    lines
}

pub fn print_cache_summaries(summaries: &[CacheSummary]) {
    for summary in summaries {
        for line in format_cache_summary(summary) {
            println!("{}", line);
        }
    }
}
