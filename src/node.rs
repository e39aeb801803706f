//! Content nodes in their two states.
//!
//! Parsing produces **draft** nodes: typed field values whose references,
//! file assets and rich-text links are still raw strings. Validation turns
//! every draft into a **bound** [`Node`] in which each reference holds the
//! [`NodeId`] it resolved to and each file asset holds its filesystem
//! location. A draft never escapes the loader, and a bound node is never
//! mutated after the graph is ready; the only interior state is the lazily
//! read image info, which is write-once.
//!
//! Nodes refer to each other only through paths and arena ids, never through
//! direct pointers, so the graph owns every node for its whole lifetime.

use crate::path::{ContentPath, Slug};
use crate::schema::NodeKind;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Index of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

// =============================================================================
// Draft (unresolved) values
// =============================================================================

/// A by-path link to another node, as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftReference(pub String);

/// A colocated file, as written in the source (e.g. `hero.jpg`, `../shared/logo.png`).
#[derive(Debug, Clone, PartialEq)]
pub struct DraftFile(pub String);

/// Unrendered markdown source.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftMarkdown(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum DraftValue {
    Text(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    Slug(Slug),
    Markdown(DraftMarkdown),
    Reference(DraftReference),
    File(DraftFile),
    Image(DraftFile),
    List(Vec<DraftValue>),
}

/// A node as produced by the parser, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftNode {
    pub type_id: String,
    pub kind: NodeKind,
    pub fields: BTreeMap<String, DraftValue>,
}

impl DraftNode {
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.fields.get(field) {
            Some(DraftValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn slug(&self, field: &str) -> Option<&Slug> {
        match self.fields.get(field) {
            Some(DraftValue::Slug(s)) => Some(s),
            _ => None,
        }
    }
}

// =============================================================================
// Bound (resolved) values
// =============================================================================

/// A reference bound to an existing node.
///
/// Only existence is guaranteed; whether the target has a kind the consumer
/// expects is for the renderer to decide.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentReference {
    pub(crate) raw: String,
    pub(crate) path: ContentPath,
    pub(crate) target: NodeId,
}

impl ContentReference {
    /// The path string as written in the source.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn path(&self) -> &ContentPath {
        &self.path
    }

    pub fn target(&self) -> NodeId {
        self.target
    }
}

/// A file colocated with its container node's source directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAsset {
    pub(crate) declared: String,
    pub(crate) container: NodeId,
    pub(crate) container_path: ContentPath,
    pub(crate) file_name: String,
    pub(crate) fs_path: PathBuf,
    pub(crate) file_size: u64,
}

impl FileAsset {
    pub fn declared(&self) -> &str {
        &self.declared
    }

    /// Node whose source directory holds the file.
    pub fn container(&self) -> NodeId {
        self.container
    }

    pub fn container_path(&self) -> &ContentPath {
        &self.container_path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn fs_path(&self) -> &Path {
        &self.fs_path
    }

    /// Size in bytes, read once during validation.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// `<container path>/<file name>`, the asset's identity in cache keys.
    pub fn content_id(&self) -> String {
        if self.container_path.is_root() {
            format!("/{}", self.file_name)
        } else {
            format!("{}/{}", self.container_path, self.file_name)
        }
    }
}

/// Width, height and animation flag of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub is_animated: bool,
}

/// A file asset known to be an image. Its [`ImageInfo`] is read on first use
/// and then kept on the node.
#[derive(Debug)]
pub struct ImageAsset {
    pub(crate) file: FileAsset,
    pub(crate) info: OnceLock<ImageInfo>,
}

impl ImageAsset {
    pub(crate) fn new(file: FileAsset) -> Self {
        Self {
            file,
            info: OnceLock::new(),
        }
    }

    pub fn file(&self) -> &FileAsset {
        &self.file
    }
}

impl Clone for ImageAsset {
    fn clone(&self) -> Self {
        let info = OnceLock::new();
        if let Some(known) = self.info.get() {
            let _ = info.set(*known);
        }
        Self {
            file: self.file.clone(),
            info,
        }
    }
}

impl PartialEq for ImageAsset {
    fn eq(&self, other: &Self) -> bool {
        self.file == other.file
    }
}

/// Markdown whose internal links have been checked against the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Markdown {
    pub(crate) source: String,
    pub(crate) owner: NodeId,
    /// Internal link targets by raw URL (without fragment).
    pub(crate) links: HashMap<String, NodeId>,
}

impl Markdown {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Node the markdown belongs to; relative links resolve against its path.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn link_target(&self, url: &str) -> Option<NodeId> {
        self.links.get(url).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Bool(bool),
    Integer(i64),
    Float(f64),
    Slug(Slug),
    Markdown(Markdown),
    Reference(ContentReference),
    File(FileAsset),
    Image(ImageAsset),
    List(Vec<Value>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&ContentReference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_image(&self) -> Option<&ImageAsset> {
        match self {
            Value::Image(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileAsset> {
        match self {
            Value::File(f) => Some(f),
            Value::Image(i) => Some(&i.file),
            _ => None,
        }
    }

    pub fn as_markdown(&self) -> Option<&Markdown> {
        match self {
            Value::Markdown(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

/// A fully resolved content node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) path: ContentPath,
    pub(crate) type_id: String,
    pub(crate) kind: NodeKind,
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn path(&self) -> &ContentPath {
        &self.path
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in source order (the default navigation order).
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The `title` field, if the node has a text title.
    pub fn title(&self) -> Option<&str> {
        self.field("title").and_then(Value::as_text)
    }
}
