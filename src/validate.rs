//! Validation: the second half of graph building.
//!
//! Once the path index is complete, every draft value that needs it is
//! bound against the graph:
//!
//! - a [`DraftReference`] resolves its raw path relative to the node holding
//!   it and must name an indexed node;
//! - a [`DraftFile`] finds its container node (the node whose source
//!   directory holds the file) and must exist on disk;
//! - [`DraftMarkdown`] checks every internal link the same way. Expression
//!   links (`@node.title`) and render macros need a render context; macros
//!   are only checked for syntax here.
//!
//! Nodes are bound in parallel. The phase change to `Ready` happens only
//! after every node is bound; if any fails, the failure of the earliest node
//! in source order is returned and the graph never becomes ready.
//!
//! Only existence is checked. Whether a reference points at a node of a kind
//! the renderer can use is the renderer's business.

use crate::context::{LoaderContext, Phase, PhaseViolation, ResolveError};
use crate::graph::ContentGraph;
use crate::imaging::is_supported_image;
use crate::markdown::{LinkKind, MacroError, classify_link, link_urls, macros};
use crate::node::{
    ContentReference, DraftFile, DraftMarkdown, DraftReference, DraftValue, FileAsset,
    ImageAsset, Markdown, Node, NodeId, Value,
};
use crate::path::{ContentPath, PathError};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid content path: {resolved} (referenced as {raw:?} by {node}, field `{field}`)")]
    InvalidReference {
        node: ContentPath,
        field: String,
        raw: String,
        resolved: ContentPath,
    },
    #[error("Invalid link {raw:?} in {node}, field `{field}`: Invalid content path: {resolved}")]
    InvalidLink {
        node: ContentPath,
        field: String,
        raw: String,
        resolved: ContentPath,
    },
    #[error("Malformed path {raw:?} in {node}, field `{field}`: {source}")]
    Path {
        node: ContentPath,
        field: String,
        raw: String,
        #[source]
        source: PathError,
    },
    #[error("File {raw:?} of {node}, field `{field}`, has no container node at {container}")]
    MissingContainer {
        node: ContentPath,
        field: String,
        raw: String,
        container: ContentPath,
    },
    #[error("Missing file {fs_path} (declared as {raw:?} by {node}, field `{field}`)")]
    MissingFile {
        node: ContentPath,
        field: String,
        raw: String,
        fs_path: PathBuf,
    },
    #[error("Unsupported image format: {raw:?} (declared by {node}, field `{field}`)")]
    UnsupportedImage {
        node: ContentPath,
        field: String,
        raw: String,
    },
    #[error("Invalid macro in {node}, field `{field}`: {source}")]
    InvalidMacro {
        node: ContentPath,
        field: String,
        #[source]
        source: MacroError,
    },
    #[error(transparent)]
    Phase(#[from] PhaseViolation),
}

impl ValidationError {
    /// Content path of the node whose value failed.
    pub fn node(&self) -> Option<&ContentPath> {
        match self {
            ValidationError::InvalidReference { node, .. }
            | ValidationError::InvalidLink { node, .. }
            | ValidationError::Path { node, .. }
            | ValidationError::MissingContainer { node, .. }
            | ValidationError::MissingFile { node, .. }
            | ValidationError::UnsupportedImage { node, .. }
            | ValidationError::InvalidMacro { node, .. } => Some(node),
            ValidationError::Phase(_) => None,
        }
    }

    /// The raw target string as written in the source.
    pub fn raw_target(&self) -> Option<&str> {
        match self {
            ValidationError::InvalidReference { raw, .. }
            | ValidationError::InvalidLink { raw, .. }
            | ValidationError::Path { raw, .. }
            | ValidationError::MissingContainer { raw, .. }
            | ValidationError::MissingFile { raw, .. }
            | ValidationError::UnsupportedImage { raw, .. } => Some(raw),
            ValidationError::InvalidMacro { source, .. } => Some(&source.text),
            ValidationError::Phase(_) => None,
        }
    }
}

/// Where a value being validated lives.
pub struct Scope<'a> {
    pub ctx: &'a LoaderContext,
    pub node: NodeId,
    pub field: &'a str,
}

impl Scope<'_> {
    fn node_path(&self) -> &ContentPath {
        self.ctx.path_of(self.node)
    }

    fn path_error(&self, raw: &str, source: PathError) -> ValidationError {
        ValidationError::Path {
            node: self.node_path().clone(),
            field: self.field.to_string(),
            raw: raw.to_string(),
            source,
        }
    }

    /// Resolve `raw` against the owning node's path.
    fn resolve(&self, raw: &str) -> Result<(ContentPath, Option<NodeId>), ValidationError> {
        self.ctx
            .resolve(self.node_path(), raw)
            .map_err(|e| match e {
                ResolveError::Phase(p) => ValidationError::Phase(p),
                ResolveError::Path(source) => self.path_error(raw, source),
            })
    }
}

/// Capability of draft values that must be bound against the graph.
pub trait Validate {
    type Bound;

    fn validate(&self, scope: &Scope<'_>) -> Result<Self::Bound, ValidationError>;
}

impl Validate for DraftReference {
    type Bound = ContentReference;

    fn validate(&self, scope: &Scope<'_>) -> Result<ContentReference, ValidationError> {
        let (path, target) = scope.resolve(&self.0)?;
        let Some(target) = target else {
            return Err(ValidationError::InvalidReference {
                node: scope.node_path().clone(),
                field: scope.field.to_string(),
                raw: self.0.clone(),
                resolved: path,
            });
        };
        tracing::debug!(from = %scope.node_path(), to = %path, "bound reference");
        Ok(ContentReference {
            raw: self.0.clone(),
            path,
            target,
        })
    }
}

impl Validate for DraftFile {
    type Bound = FileAsset;

    /// `hero.jpg` lives beside the declaring node; `../shared/logo.png`
    /// lives in the source directory of the node at `../shared`.
    fn validate(&self, scope: &Scope<'_>) -> Result<FileAsset, ValidationError> {
        let raw = self.0.as_str();
        let (dir_part, file_name) = match raw.rfind('/') {
            Some(pos) => (&raw[..pos], &raw[pos + 1..]),
            None => ("", raw),
        };
        if file_name.is_empty() || file_name == "." || file_name == ".." {
            return Err(scope.path_error(raw, PathError::InvalidSlug(file_name.to_string())));
        }
        let dir_part = if dir_part.is_empty() && raw.starts_with('/') {
            "/"
        } else {
            dir_part
        };

        let (container_path, container) = scope.resolve(dir_part)?;
        let Some(container) = container else {
            return Err(ValidationError::MissingContainer {
                node: scope.node_path().clone(),
                field: scope.field.to_string(),
                raw: raw.to_string(),
                container: container_path,
            });
        };

        let fs_path = scope
            .ctx
            .metadata(container)
            .directory()
            .join(file_name);
        let missing = || ValidationError::MissingFile {
            node: scope.node_path().clone(),
            field: scope.field.to_string(),
            raw: raw.to_string(),
            fs_path: fs_path.clone(),
        };
        let file_size = match fs::metadata(&fs_path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(missing()),
        };

        Ok(FileAsset {
            declared: raw.to_string(),
            container,
            container_path,
            file_name: file_name.to_string(),
            fs_path,
            file_size,
        })
    }
}

impl Validate for DraftMarkdown {
    type Bound = Markdown;

    fn validate(&self, scope: &Scope<'_>) -> Result<Markdown, ValidationError> {
        scope
            .ctx
            .phase()
            .require_after(Phase::Loading, "resolving markdown links")?;

        let mut links = HashMap::new();
        for url in link_urls(&self.0) {
            match classify_link(&url) {
                LinkKind::Internal { path, .. } => {
                    if links.contains_key(path) {
                        continue;
                    }
                    let (resolved, target) = scope.resolve(path)?;
                    let Some(target) = target else {
                        return Err(ValidationError::InvalidLink {
                            node: scope.node_path().clone(),
                            field: scope.field.to_string(),
                            raw: url.clone(),
                            resolved,
                        });
                    };
                    links.insert(path.to_string(), target);
                }
                LinkKind::Expression(_) => {
                    // Evaluated against a render context when rendering.
                    scope
                        .ctx
                        .phase()
                        .require(Phase::Validating, "skipping expression links")?;
                }
                LinkKind::Toc | LinkKind::Anchor | LinkKind::External => {}
            }
        }

        let found = macros(&self.0).map_err(|source| ValidationError::InvalidMacro {
            node: scope.node_path().clone(),
            field: scope.field.to_string(),
            source,
        })?;
        if !found.is_empty() {
            scope
                .ctx
                .phase()
                .require(Phase::Validating, "skipping render macros")?;
        }

        Ok(Markdown {
            source: self.0.clone(),
            owner: scope.node,
            links,
        })
    }
}

impl Validate for DraftValue {
    type Bound = Value;

    fn validate(&self, scope: &Scope<'_>) -> Result<Value, ValidationError> {
        Ok(match self {
            DraftValue::Text(s) => Value::Text(s.clone()),
            DraftValue::Bool(b) => Value::Bool(*b),
            DraftValue::Integer(i) => Value::Integer(*i),
            DraftValue::Float(f) => Value::Float(*f),
            DraftValue::Slug(s) => Value::Slug(s.clone()),
            DraftValue::Markdown(md) => Value::Markdown(md.validate(scope)?),
            DraftValue::Reference(r) => Value::Reference(r.validate(scope)?),
            DraftValue::File(f) => Value::File(f.validate(scope)?),
            DraftValue::Image(f) => {
                let file = f.validate(scope)?;
                if !is_supported_image(file.fs_path()) {
                    return Err(ValidationError::UnsupportedImage {
                        node: scope.node_path().clone(),
                        field: scope.field.to_string(),
                        raw: f.0.clone(),
                    });
                }
                Value::Image(ImageAsset::new(file))
            }
            DraftValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| item.validate(scope))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

fn bind_fields(
    ctx: &LoaderContext,
    id: NodeId,
) -> Result<BTreeMap<String, Value>, ValidationError> {
    ctx.draft(id)
        .fields
        .iter()
        .map(|(name, value)| {
            let scope = Scope {
                ctx,
                node: id,
                field: name,
            };
            Ok((name.clone(), value.validate(&scope)?))
        })
        .collect()
}

/// Bind every node and produce the ready graph.
///
/// Accepts a context still in `Loading` (the index is closed first) or one
/// already in `Validating`.
pub fn validate(mut ctx: LoaderContext) -> Result<ContentGraph, ValidationError> {
    if ctx.phase() == Phase::Loading {
        ctx.begin_validation()?;
    }
    ctx.phase().require(Phase::Validating, "validating the graph")?;

    let bound: Vec<Result<BTreeMap<String, Value>, ValidationError>> = ctx
        .ids()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|id| bind_fields(&ctx, id))
        .collect();

    // Collected in arena (source) order, so the first error is the earliest node.
    let mut fields = Vec::with_capacity(bound.len());
    for result in bound {
        fields.push(result?);
    }

    ctx.mark_ready()?;
    tracing::info!(nodes = fields.len(), "graph ready");

    let (entries, by_path, transformer) = ctx.into_parts();
    let mut nodes = Vec::with_capacity(entries.len());
    let mut metadata = Vec::with_capacity(entries.len());
    for (index, (entry, fields)) in entries.into_iter().zip(fields).enumerate() {
        nodes.push(Node {
            id: NodeId::new(index),
            path: entry.path,
            type_id: entry.draft.type_id,
            kind: entry.draft.kind,
            fields,
            parent: entry.parent,
            children: entry.children,
        });
        metadata.push(entry.metadata);
    }
    Ok(ContentGraph::new(nodes, by_path, metadata, transformer))
}
