//! Build state for one content graph.
//!
//! A [`LoaderContext`] owns everything produced while a graph is being built:
//! the arena of draft nodes, the path index, the per-node filesystem
//! [`Metadata`] and the image transformer handle. It also carries the build
//! [`Phase`]:
//!
//! ```text
//! Loading ──begin_validation──▶ Validating ──(validate)──▶ Ready
//! ```
//!
//! Transitions only move forward. Nodes can be inserted only while
//! `Loading`; references can be resolved only once the path index is
//! complete (`Validating` or later). Calling an operation in the wrong phase
//! is an integration bug and fails with [`PhaseViolation`].

use crate::imaging::ImageTransformer;
use crate::node::{DraftNode, NodeId};
use crate::path::{ContentPath, PathError};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Loading,
    Validating,
    Ready,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Loading => "Loading",
            Phase::Validating => "Validating",
            Phase::Ready => "Ready",
        })
    }
}

/// An operation was invoked in a phase that does not allow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} requires {requirement}, but the build is in phase {current}")]
pub struct PhaseViolation {
    pub operation: &'static str,
    pub requirement: String,
    pub current: Phase,
}

impl Phase {
    /// Fail unless the current phase is exactly `required`.
    pub fn require(self, required: Phase, operation: &'static str) -> Result<(), PhaseViolation> {
        if self == required {
            Ok(())
        } else {
            Err(PhaseViolation {
                operation,
                requirement: format!("phase {required}"),
                current: self,
            })
        }
    }

    /// Fail unless the current phase is strictly after `after`.
    pub fn require_after(
        self,
        after: Phase,
        operation: &'static str,
    ) -> Result<(), PhaseViolation> {
        if self > after {
            Ok(())
        } else {
            Err(PhaseViolation {
                operation,
                requirement: format!("a phase after {after}"),
                current: self,
            })
        }
    }
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error(transparent)]
    Phase(#[from] PhaseViolation),
    #[error("Duplicate content path {0}")]
    DuplicatePath(ContentPath),
    #[error("Parent of {0} is not in the graph")]
    MissingParent(ContentPath),
}

/// Where a node came from on disk. Kept beside the graph rather than on the
/// node so nodes stay independent of storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// `_index.toml` of a directory node, or `<name>.toml` of a file node.
    pub source_file: PathBuf,
}

impl Metadata {
    pub fn new(source_file: impl Into<PathBuf>) -> Self {
        Self {
            source_file: source_file.into(),
        }
    }

    /// Directory holding the source file; file assets of the node live here.
    pub fn directory(&self) -> &Path {
        self.source_file.parent().unwrap_or(Path::new(""))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DraftEntry {
    pub(crate) path: ContentPath,
    pub(crate) draft: DraftNode,
    pub(crate) metadata: Metadata,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

/// Process-wide state of one build.
#[derive(Debug)]
pub struct LoaderContext {
    phase: Phase,
    entries: Vec<DraftEntry>,
    by_path: HashMap<ContentPath, NodeId>,
    transformer: Option<Arc<ImageTransformer>>,
}

impl Default for LoaderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderContext {
    pub fn new() -> Self {
        Self {
            phase: Phase::Loading,
            entries: Vec::new(),
            by_path: HashMap::new(),
            transformer: None,
        }
    }

    /// Attach the image transformer the finished graph hands to renderers.
    pub fn with_transformer(mut self, transformer: Arc<ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transformer(&self) -> Option<&Arc<ImageTransformer>> {
        self.transformer.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a draft node. The parent, if any, must already be present; the
    /// new node is appended to its children, so insertion order is
    /// navigation order.
    pub fn insert(
        &mut self,
        path: ContentPath,
        draft: DraftNode,
        metadata: Metadata,
    ) -> Result<NodeId, ContextError> {
        self.phase.require(Phase::Loading, "inserting a node")?;
        if self.by_path.contains_key(&path) {
            return Err(ContextError::DuplicatePath(path));
        }
        let parent = match path.parent() {
            Some(parent_path) => Some(
                *self
                    .by_path
                    .get(&parent_path)
                    .ok_or_else(|| ContextError::MissingParent(path.clone()))?,
            ),
            None => None,
        };

        let id = NodeId::new(self.entries.len());
        if let Some(parent) = parent {
            self.entries[parent.index()].children.push(id);
        }
        tracing::debug!(path = %path, type_id = %draft.type_id, "indexed node");
        self.by_path.insert(path.clone(), id);
        self.entries.push(DraftEntry {
            path,
            draft,
            metadata,
            parent,
            children: Vec::new(),
        });
        Ok(id)
    }

    /// Close the path index and move to `Validating`.
    pub fn begin_validation(&mut self) -> Result<(), PhaseViolation> {
        self.phase.require(Phase::Loading, "beginning validation")?;
        self.phase = Phase::Validating;
        tracing::info!(nodes = self.entries.len(), "path index complete, validating");
        Ok(())
    }

    pub(crate) fn mark_ready(&mut self) -> Result<(), PhaseViolation> {
        self.phase.require(Phase::Validating, "finishing validation")?;
        self.phase = Phase::Ready;
        Ok(())
    }

    pub fn node_id(&self, path: &ContentPath) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn path_of(&self, id: NodeId) -> &ContentPath {
        &self.entries[id.index()].path
    }

    pub fn draft(&self, id: NodeId) -> &DraftNode {
        &self.entries[id.index()].draft
    }

    pub fn metadata(&self, id: NodeId) -> &Metadata {
        &self.entries[id.index()].metadata
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.entries.len()).map(NodeId::new)
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[DraftEntry] {
        &self.entries
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<DraftEntry>,
        HashMap<ContentPath, NodeId>,
        Option<Arc<ImageTransformer>>,
    ) {
        (self.entries, self.by_path, self.transformer)
    }

    /// Resolve `target` against `base` and look it up in the path index.
    ///
    /// Returns the resolved path alongside the lookup so callers can report
    /// exactly which path was missing.
    pub fn resolve(
        &self,
        base: &ContentPath,
        target: &str,
    ) -> Result<(ContentPath, Option<NodeId>), ResolveError> {
        self.phase.require_after(Phase::Loading, "resolving a content reference")?;
        let path = base.resolve(target)?;
        let id = self.node_id(&path);
        Ok((path, id))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error(transparent)]
    Phase(#[from] PhaseViolation),
    #[error(transparent)]
    Path(#[from] PathError),
}
