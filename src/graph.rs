//! The built content graph and the pipeline that produces it.
//!
//! ```text
//! source dir ──Loader──▶ LoaderContext (Loading)
//!                             │ begin_validation
//!                             ▼
//!                        (Validating) ──validate──▶ ContentGraph (Ready)
//! ```
//!
//! A [`ContentGraph`] is immutable and only ever exists in the `Ready` phase.
//! Nodes live in an arena in source order (parents before children,
//! siblings by sort key) and are addressed by [`NodeId`].

use crate::context::{LoaderContext, Metadata, Phase, PhaseViolation};
use crate::imaging::ImageTransformer;
use crate::loader::{LoadError, Loader};
use crate::node::{Node, NodeId};
use crate::path::ContentPath;
use crate::schema::TypeRegistry;
use crate::validate::{ValidationError, validate};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug)]
pub struct ContentGraph {
    nodes: Vec<Node>,
    by_path: HashMap<ContentPath, NodeId>,
    metadata: Vec<Metadata>,
    transformer: Option<Arc<ImageTransformer>>,
}

impl ContentGraph {
    pub(crate) fn new(
        nodes: Vec<Node>,
        by_path: HashMap<ContentPath, NodeId>,
        metadata: Vec<Metadata>,
        transformer: Option<Arc<ImageTransformer>>,
    ) -> Self {
        Self {
            nodes,
            by_path,
            metadata,
            transformer,
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::Ready
    }

    /// The root node. Loading always produces one.
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Panics on an id from another graph; use [`get`](Self::get) for those.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn find(&self, path: &ContentPath) -> Option<&Node> {
        self.by_path.get(path).map(|id| self.node(*id))
    }

    pub fn metadata(&self, id: NodeId) -> &Metadata {
        &self.metadata[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.node(id).children().iter().map(|c| self.node(*c))
    }

    /// Depth-first walk from `id`, yielding each node with its depth below `id`.
    pub fn walk(&self, id: NodeId) -> Vec<(usize, &Node)> {
        let mut out = Vec::new();
        let mut stack = vec![(0, id)];
        while let Some((depth, current)) = stack.pop() {
            let node = self.node(current);
            out.push((depth, node));
            for child in node.children().iter().rev() {
                stack.push((depth + 1, *child));
            }
        }
        out
    }

    pub fn transformer(&self) -> Option<&Arc<ImageTransformer>> {
        self.transformer.as_ref()
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Phase(#[from] PhaseViolation),
}

/// Loads a source directory and validates it into a [`ContentGraph`].
pub struct GraphBuilder<'a> {
    registry: &'a TypeRegistry,
    skip: Vec<PathBuf>,
    transformer: Option<Arc<ImageTransformer>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            skip: Vec::new(),
            transformer: None,
        }
    }

    /// Exclude a path (such as an output or cache directory) from loading.
    pub fn skip(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip.push(path.into());
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    pub fn build(&self, root: &Path) -> Result<ContentGraph, BuildError> {
        let mut ctx = LoaderContext::new();
        if let Some(transformer) = &self.transformer {
            ctx = ctx.with_transformer(Arc::clone(transformer));
        }

        let loader = self
            .skip
            .iter()
            .fold(Loader::new(self.registry), |loader, path| loader.skip(path.clone()));
        loader.load(root, &mut ctx)?;

        ctx.begin_validation()?;
        Ok(validate(ctx)?)
    }
}
