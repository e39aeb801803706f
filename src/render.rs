//! The render boundary: what a renderer may ask of a ready graph.
//!
//! A [`Renderer`] borrows a [`ContentGraph`] and an output directory. It maps
//! content paths to nodes and back, turns nodes into render paths and hrefs,
//! and places files (originals and cached artifacts) into the output tree.
//!
//! Render paths are the node's slugs joined with `/` plus a trailing `/`
//! (`gallery/sunset/`); the root renders at the empty path. Hrefs are the
//! render path prefixed with `/`, or with the site's base URL when absolute.
//!
//! Values render through the [`Renderable`] trait, given a [`RenderContext`]
//! naming the node being rendered and optional JSON arguments.

use crate::context::{Phase, PhaseViolation};
use crate::graph::ContentGraph;
use crate::imaging::{FillMode, TransformError};
use crate::markdown::MacroError;
use crate::node::{ContentReference, FileAsset, ImageAsset, Markdown, Node, NodeId, Value};
use crate::path::ContentPath;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Phase(#[from] PhaseViolation),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("Failed to place {path} in the output tree: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid expression `{expression}`: {message}")]
    Expression { expression: String, message: String },
    #[error(transparent)]
    Macro(#[from] MacroError),
    #[error("Cyclic expression: markdown of {node} is rendered inside itself")]
    Cycle { node: ContentPath },
    #[error("Link {url:?} in {node} does not name a content node")]
    UnknownLink { node: ContentPath, url: String },
    #[error("Image {0} needs resizing, but no image cache is configured")]
    NoImageCache(String),
    #[error("Invalid render arguments: {0}")]
    Arguments(String),
}

pub struct Renderer<'g> {
    graph: &'g ContentGraph,
    output_dir: PathBuf,
    base_url: String,
}

impl<'g> Renderer<'g> {
    pub fn new(graph: &'g ContentGraph, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            graph,
            output_dir: output_dir.into(),
            base_url: String::new(),
        }
    }

    /// Base URL used for absolute hrefs. A trailing `/` is dropped.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        self.base_url = base_url;
        self
    }

    pub fn graph(&self) -> &'g ContentGraph {
        self.graph
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn find_node_by_path(&self, path: &ContentPath) -> Option<&'g Node> {
        self.graph.find(path)
    }

    /// Inverse of [`find_node_by_path`](Self::find_node_by_path). `None` for
    /// nodes that do not belong to this graph.
    pub fn find_path_of(&self, node: &Node) -> Option<&'g ContentPath> {
        self.graph
            .get(node.id())
            .filter(|own| own.path() == node.path())
            .map(|own| own.path())
    }

    pub fn render_path(&self, id: NodeId) -> String {
        let mut out = String::new();
        for slug in self.graph.node(id).path().slugs() {
            out.push_str(slug.as_str());
            out.push('/');
        }
        out
    }

    pub fn href(&self, id: NodeId, absolute: bool) -> String {
        self.href_for(&self.render_path(id), absolute)
    }

    pub fn href_for(&self, render_path: &str, absolute: bool) -> String {
        if absolute {
            format!("{}/{render_path}", self.base_url)
        } else {
            format!("/{render_path}")
        }
    }

    pub fn context<'r>(&'r self, node: &'r Node) -> RenderContext<'r> {
        RenderContext {
            renderer: self,
            node,
            rendering: None,
        }
    }

    /// Place `source` at `<container render path><desired name>` in the
    /// output tree and return that render path.
    ///
    /// Hard links when possible and copies otherwise. A destination already
    /// holding the same bytes is kept; any other destination is replaced
    /// atomically, since the published name does not encode the source
    /// contents.
    pub fn store_artifact(
        &self,
        source: &Path,
        container: NodeId,
        desired_name: &str,
    ) -> io::Result<String> {
        let render_path = format!("{}{desired_name}", self.render_path(container));
        let dest = self.output_dir.join(&render_path);
        if dest.is_file() && same_file_contents(source, &dest)? {
            return Ok(render_path);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = dest.with_file_name(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::hard_link(source, &tmp) {
            tracing::debug!(source = %source.display(), error = %e, "hard link failed, copying");
            fs::copy(source, &tmp)?;
        }
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        tracing::debug!(path = %render_path, "stored artifact");
        Ok(render_path)
    }

    /// Place an original file next to its container's rendered page and
    /// return its href.
    pub fn asset_href(&self, file: &FileAsset, absolute: bool) -> io::Result<String> {
        let render_path = self.store_artifact(file.fs_path(), file.container(), file.file_name())?;
        Ok(self.href_for(&render_path, absolute))
    }
}

/// The node being rendered and the renderer it is rendered with.
#[derive(Clone, Copy)]
pub struct RenderContext<'r> {
    pub renderer: &'r Renderer<'r>,
    pub node: &'r Node,
    /// Markdown values currently being rendered, innermost first.
    rendering: Option<&'r RenderFrame<'r>>,
}

/// One markdown value on the render stack.
pub(crate) struct RenderFrame<'r> {
    markdown: &'r Markdown,
    outer: Option<&'r RenderFrame<'r>>,
}

impl<'r> RenderFrame<'r> {
    pub(crate) fn new(markdown: &'r Markdown, ctx: &RenderContext<'r>) -> Self {
        Self {
            markdown,
            outer: ctx.rendering,
        }
    }
}

impl<'r> RenderContext<'r> {
    /// Phase of the underlying graph. A built graph is always `Ready`.
    pub fn phase(&self) -> Phase {
        self.renderer.graph().phase()
    }

    /// Whether `markdown` is already being rendered further up the stack.
    pub fn is_rendering(&self, markdown: &Markdown) -> bool {
        let mut frame = self.rendering;
        while let Some(current) = frame {
            if std::ptr::eq(current.markdown, markdown) {
                return true;
            }
            frame = current.outer;
        }
        false
    }

    /// The same context with `frame` pushed on the render stack.
    pub(crate) fn entering(&self, frame: &'r RenderFrame<'r>) -> RenderContext<'r> {
        RenderContext {
            rendering: Some(frame),
            ..*self
        }
    }
}

/// Anything that renders to an HTML fragment or a URL.
pub trait Renderable {
    fn render(
        &self,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError>;
}

impl Renderable for str {
    fn render(
        &self,
        _: &RenderContext<'_>,
        _: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        Ok(self.to_string())
    }
}

impl Renderable for ContentReference {
    fn render(
        &self,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        Ok(ctx.renderer.href(self.target(), absolute_arg(args)))
    }
}

impl Renderable for FileAsset {
    fn render(
        &self,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        ctx.renderer
            .asset_href(self, absolute_arg(args))
            .map_err(|source| RenderError::Store {
                path: self.fs_path().to_path_buf(),
                source,
            })
    }
}

/// Without `width`/`height` arguments the original is published as is;
/// with them the href of the resized primary image is returned.
impl Renderable for ImageAsset {
    fn render(
        &self,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        let Some(size) = ImageArgs::parse(args)? else {
            return self.file().render(ctx, args);
        };
        let transformer = ctx
            .renderer
            .graph()
            .transformer()
            .ok_or_else(|| RenderError::NoImageCache(self.file().content_id()))?;
        let picture =
            transformer.transform(ctx.renderer, self, size.width, size.height, size.fill)?;
        Ok(picture.image.href)
    }
}

impl Renderable for Value {
    fn render(
        &self,
        ctx: &RenderContext<'_>,
        args: Option<&serde_json::Value>,
    ) -> Result<String, RenderError> {
        match self {
            Value::Text(s) => s.render(ctx, args),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(f.to_string()),
            Value::Slug(s) => Ok(s.as_str().to_string()),
            Value::Markdown(md) => md.render(ctx, args),
            Value::Reference(r) => r.render(ctx, args),
            Value::File(f) => f.render(ctx, args),
            Value::Image(i) => i.render(ctx, args),
            Value::List(items) => {
                let rendered = items
                    .iter()
                    .map(|item| item.render(ctx, args))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rendered.join(" "))
            }
        }
    }
}

/// Whether `a` and `b` hold the same bytes: the same inode, or equal length
/// and SHA-256.
fn same_file_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let (meta_a, meta_b) = (fs::metadata(a)?, fs::metadata(b)?);
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino() {
            return Ok(true);
        }
    }
    if meta_a.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(Sha256::digest(fs::read(a)?) == Sha256::digest(fs::read(b)?))
}

fn absolute_arg(args: Option<&serde_json::Value>) -> bool {
    args.and_then(|a| a.get("absolute"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

struct ImageArgs {
    width: u32,
    height: u32,
    fill: FillMode,
}

impl ImageArgs {
    /// `{"width": 100, "height": 50, "fill": "cover"}`; fill defaults to cover.
    fn parse(args: Option<&serde_json::Value>) -> Result<Option<Self>, RenderError> {
        let Some(args) = args else {
            return Ok(None);
        };
        let dimension = |name: &str| -> Result<Option<u32>, RenderError> {
            match args.get(name) {
                None => Ok(None),
                Some(v) => v
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n > 0)
                    .map(Some)
                    .ok_or_else(|| {
                        RenderError::Arguments(format!("`{name}` must be a positive integer"))
                    }),
            }
        };
        let (width, height) = match (dimension("width")?, dimension("height")?) {
            (None, None) => return Ok(None),
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, w),
            (None, Some(h)) => (h, h),
        };
        let fill = match args.get("fill").and_then(serde_json::Value::as_str) {
            Some(s) => s.parse().map_err(RenderError::Arguments)?,
            None => FillMode::Cover,
        };
        Ok(Some(Self { width, height, fill }))
    }
}
