//! Source tree loading: the first half of graph building.
//!
//! Walks the content directory once, parses every node source, checks it
//! against the type registry and inserts it into the [`LoaderContext`] with
//! its content path and filesystem metadata.
//!
//! ## Directory Structure
//!
//! ```text
//! content/                         # Content root
//! ├── _index.toml                  # Root node (required)
//! ├── config.toml                  # Build configuration (not a node)
//! ├── 010-blog/                    # Directory node, slug `blog`
//! │   ├── _index.toml
//! │   ├── body.md                  # Value of the markdown field `body`
//! │   ├── 010-first-post.toml      # File node, slug `first-post`
//! │   └── 020-gallery/             # Nested node with colocated assets
//! │       ├── _index.toml
//! │       └── hero.jpg
//! └── about.toml                   # Unnumbered, sorted after numbered siblings
//! ```
//!
//! ## Rules
//!
//! - Every directory node holds an `_index.toml`; any other subdirectory is
//!   an error.
//! - Only branch nodes may have child nodes.
//! - Nested nodes must be directories.
//! - Sibling entries must map to distinct slugs.
//! - Hidden entries, `config.toml` at the root and the skip list (cache and
//!   output directories) are ignored.

use crate::context::{ContextError, LoaderContext, Metadata};
use crate::naming::parse_entry_name;
use crate::node::{DraftNode, NodeId};
use crate::parse::{NodeParser, ParseError, RawNode, TomlNodeParser};
use crate::path::{ContentPath, PathError, Slug};
use crate::schema::{FieldType, NodeKind, SchemaError, TypeRegistry};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stem of the source file that makes a directory a node.
pub const INDEX_STEM: &str = "_index";

/// Extension of property files that supply markdown fields.
const PROPERTY_EXTENSION: &str = "md";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Content root {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("Directory {0} has no {INDEX_STEM} node file")]
    MissingIndex(PathBuf),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Invalid node {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
    #[error("Invalid slug for {path}: {source}")]
    Slug {
        path: PathBuf,
        #[source]
        source: PathError,
    },
    #[error("Entries {first} and {second} both map to slug {slug:?}")]
    DuplicateSlug {
        slug: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("{path} declares a {kind} node, which must live in its own directory")]
    NestedAsFile { path: PathBuf, kind: NodeKind },
    #[error("{path} is a {kind} node and cannot have child node {child}")]
    ChildrenNotAllowed {
        path: PathBuf,
        kind: NodeKind,
        child: PathBuf,
    },
    #[error("Field `{field}` of {path} is set both inline and in {file}")]
    DuplicateProperty {
        path: PathBuf,
        field: String,
        file: PathBuf,
    },
    #[error(transparent)]
    Context(#[from] ContextError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LoadError + '_ {
    move |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A child entry of a directory: either a node directory or a node file.
#[derive(Debug)]
enum Entry {
    Dir(PathBuf),
    File(PathBuf),
}

impl Entry {
    fn path(&self) -> &Path {
        match self {
            Entry::Dir(p) | Entry::File(p) => p,
        }
    }

    /// Entry name without extension (`010-post.toml` → `010-post`).
    fn name(&self) -> String {
        let path = self.path();
        let name = match self {
            Entry::Dir(_) => path.file_name(),
            Entry::File(_) => path.file_stem(),
        };
        name.map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Loads a source tree into a [`LoaderContext`].
pub struct Loader<'a> {
    registry: &'a TypeRegistry,
    parser: Box<dyn NodeParser + 'a>,
    skip: Vec<PathBuf>,
}

impl<'a> Loader<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            parser: Box::new(TomlNodeParser),
            skip: Vec::new(),
        }
    }

    pub fn with_parser(mut self, parser: impl NodeParser + 'a) -> Self {
        self.parser = Box::new(parser);
        self
    }

    /// Ignore `path` (and everything below it) while walking.
    pub fn skip(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip.push(path.into());
        self
    }

    /// Walk `root` and insert every node, parents before children.
    pub fn load(&self, root: &Path, ctx: &mut LoaderContext) -> Result<NodeId, LoadError> {
        if !root.is_dir() {
            return Err(LoadError::NotADirectory(root.to_path_buf()));
        }
        let index = self.index_file(root);
        if !index.is_file() {
            return Err(LoadError::MissingIndex(root.to_path_buf()));
        }
        let draft = self.read_node(&index, true)?;
        let id = ctx.insert(ContentPath::root(), draft, Metadata::new(&index))?;
        self.load_children(root, &ContentPath::root(), id, true, ctx)?;
        Ok(id)
    }

    fn index_file(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{INDEX_STEM}.{}", self.parser.extension()))
    }

    /// Skip entries match literally or, when spelled differently (relative,
    /// with `..`), by canonical path.
    fn is_skipped(&self, path: &Path) -> bool {
        self.skip.iter().any(|s| {
            s == path
                || (s.file_name() == path.file_name()
                    && matches!(
                        (fs::canonicalize(s), fs::canonicalize(path)),
                        (Ok(a), Ok(b)) if a == b
                    ))
        })
    }

    /// Parse a node source and build its draft. Directory nodes pick up
    /// markdown fields from `<field>.md` files beside the index.
    fn read_node(&self, source: &Path, is_dir_node: bool) -> Result<DraftNode, LoadError> {
        let bytes = fs::read(source).map_err(io_err(source))?;
        let mut raw = self.parser.parse(&bytes, source)?;
        if is_dir_node && let Some(dir) = source.parent() {
            self.merge_property_files(dir, source, &mut raw)?;
        }
        self.registry
            .build_draft(raw)
            .map_err(|e| LoadError::Schema {
                path: source.to_path_buf(),
                source: e,
            })
    }

    fn merge_property_files(
        &self,
        dir: &Path,
        source: &Path,
        raw: &mut RawNode,
    ) -> Result<(), LoadError> {
        let Some(schema) = self.registry.get(&raw.type_id) else {
            // Unknown types are reported by build_draft.
            return Ok(());
        };
        for spec in schema
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::Markdown)
        {
            let file = dir.join(format!("{}.{PROPERTY_EXTENSION}", spec.name));
            if !file.is_file() {
                continue;
            }
            if raw.properties.contains_key(&spec.name) {
                return Err(LoadError::DuplicateProperty {
                    path: source.to_path_buf(),
                    field: spec.name.clone(),
                    file,
                });
            }
            let text = fs::read_to_string(&file).map_err(io_err(&file))?;
            raw.properties
                .insert(spec.name.clone(), toml::Value::String(text));
        }
        Ok(())
    }

    /// Node entries of `dir`, sorted by the `NNN-name` convention.
    fn collect_entries(&self, dir: &Path, is_root: bool) -> Result<Vec<Entry>, LoadError> {
        let index_name = format!("{INDEX_STEM}.{}", self.parser.extension());
        let mut entries = Vec::new();
        for item in fs::read_dir(dir).map_err(io_err(dir))? {
            let item = item.map_err(io_err(dir))?;
            let path = item.path();
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || self.is_skipped(&path) {
                continue;
            }
            if path.is_dir() {
                if !self.index_file(&path).is_file() {
                    return Err(LoadError::MissingIndex(path));
                }
                entries.push(Entry::Dir(path));
            } else if path
                .extension()
                .is_some_and(|ext| ext == self.parser.extension())
                && name != index_name
                && !(is_root && name == crate::config::CONFIG_FILE)
            {
                entries.push(Entry::File(path));
            }
        }
        entries.sort_by_key(|e| parse_entry_name(&e.name()).sort_key());
        Ok(entries)
    }

    fn load_children(
        &self,
        dir: &Path,
        path: &ContentPath,
        id: NodeId,
        is_root: bool,
        ctx: &mut LoaderContext,
    ) -> Result<(), LoadError> {
        let entries = self.collect_entries(dir, is_root)?;
        let kind = ctx.draft(id).kind;
        if let Some(first) = entries.first()
            && !kind.accepts_children()
        {
            return Err(LoadError::ChildrenNotAllowed {
                path: ctx.metadata(id).source_file.clone(),
                kind,
                child: first.path().to_path_buf(),
            });
        }

        let mut seen: HashMap<Slug, PathBuf> = HashMap::new();
        for entry in entries {
            let source = match &entry {
                Entry::Dir(d) => self.index_file(d),
                Entry::File(f) => f.clone(),
            };
            let draft = self.read_node(&source, matches!(entry, Entry::Dir(_)))?;
            if matches!(entry, Entry::File(_)) && draft.kind.requires_directory() {
                return Err(LoadError::NestedAsFile {
                    path: source,
                    kind: draft.kind,
                });
            }

            let slug = entry_slug(&entry.name(), &draft).map_err(|e| LoadError::Slug {
                path: entry.path().to_path_buf(),
                source: e,
            })?;
            if let Some(first) = seen.get(&slug) {
                return Err(LoadError::DuplicateSlug {
                    slug: slug.to_string(),
                    first: first.clone(),
                    second: entry.path().to_path_buf(),
                });
            }
            seen.insert(slug.clone(), entry.path().to_path_buf());

            let child_path = path.child(slug);
            let child_id = ctx.insert(child_path.clone(), draft, Metadata::new(&source))?;
            if let Entry::Dir(child_dir) = &entry {
                self.load_children(child_dir, &child_path, child_id, false, ctx)?;
            }
        }
        Ok(())
    }
}

/// Slug of an entry: the `slug` field if set, else the entry name without
/// its number prefix, else the slugified title.
fn entry_slug(entry_name: &str, draft: &DraftNode) -> Result<Slug, PathError> {
    if let Some(slug) = draft.slug("slug") {
        return Ok(slug.clone());
    }
    let parsed = parse_entry_name(entry_name);
    if !parsed.name.is_empty()
        && let Ok(slug) = Slug::new(parsed.name.as_str())
    {
        return Ok(slug);
    }
    if let Some(title) = draft.text("title")
        && let Ok(slug) = Slug::slugify(title)
    {
        return Ok(slug);
    }
    parsed.slug(entry_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::DraftValue;
    use crate::test_helpers::write_file;
    use tempfile::TempDir;

    fn load(root: &Path) -> Result<LoaderContext, LoadError> {
        let registry = TypeRegistry::standard();
        let mut ctx = LoaderContext::new();
        Loader::new(&registry).load(root, &mut ctx)?;
        Ok(ctx)
    }

    fn paths(ctx: &LoaderContext) -> Vec<String> {
        ctx.ids().map(|id| ctx.path_of(id).to_string()).collect()
    }

    fn site() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_file(root, "_index.toml", "type = \"website\"\ntitle = \"Site\"\n");
        write_file(root, "config.toml", "base_url = \"\"\n");
        write_file(root, "020-blog/_index.toml", "type = \"section\"\ntitle = \"Blog\"\n");
        write_file(root, "020-blog/010-first.toml", "type = \"article\"\ntitle = \"First\"\n");
        write_file(root, "020-blog/005-zero.toml", "type = \"article\"\ntitle = \"Zero\"\n");
        write_file(root, "010-about/_index.toml", "type = \"page\"\ntitle = \"About\"\n");
        write_file(root, "010-about/portrait.jpg", "jpeg");
        write_file(root, "notes.toml", "type = \"article\"\ntitle = \"Notes\"\n");
        tmp
    }

    // =========================================================================
    // Tree walking
    // =========================================================================

    #[test]
    fn loads_in_preorder_sorted_by_number() {
        let tmp = site();
        let ctx = load(tmp.path()).unwrap();
        assert_eq!(
            paths(&ctx),
            vec!["/", "/about", "/blog", "/blog/zero", "/blog/first", "/notes"]
        );
    }

    #[test]
    fn children_keep_navigation_order() {
        let tmp = site();
        let ctx = load(tmp.path()).unwrap();
        let blog = ctx.node_id(&ContentPath::parse("/blog").unwrap()).unwrap();
        let children: Vec<_> = ctx.entries()[blog.index()]
            .children
            .iter()
            .map(|c| ctx.path_of(*c).to_string())
            .collect();
        assert_eq!(children, vec!["/blog/zero", "/blog/first"]);
    }

    #[test]
    fn metadata_records_source_file() {
        let tmp = site();
        let ctx = load(tmp.path()).unwrap();
        let about = ctx.node_id(&ContentPath::parse("/about").unwrap()).unwrap();
        assert_eq!(
            ctx.metadata(about).source_file,
            tmp.path().join("010-about/_index.toml")
        );
        assert_eq!(ctx.metadata(about).directory(), tmp.path().join("010-about"));
    }

    #[test]
    fn missing_root_index_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(load(tmp.path()), Err(LoadError::MissingIndex(_))));
    }

    #[test]
    fn directory_without_index_is_error() {
        let tmp = site();
        write_file(tmp.path(), "stray/readme.txt", "x");
        assert!(matches!(
            load(tmp.path()),
            Err(LoadError::MissingIndex(p)) if p.ends_with("stray")
        ));
    }

    #[test]
    fn hidden_and_skipped_entries_ignored() {
        let tmp = site();
        write_file(tmp.path(), ".git/config", "x");
        write_file(tmp.path(), ".cache/anything.bin", "x");
        let registry = TypeRegistry::standard();
        let mut ctx = LoaderContext::new();
        write_file(tmp.path(), "dist/page.txt", "x");
        Loader::new(&registry)
            .skip(tmp.path().join("dist"))
            .load(tmp.path(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.len(), 6);
    }

    #[test]
    fn skip_matches_differently_spelled_path() {
        let tmp = site();
        write_file(tmp.path(), "dist/page.txt", "x");
        let registry = TypeRegistry::standard();
        let mut ctx = LoaderContext::new();
        Loader::new(&registry)
            .skip(tmp.path().join("020-blog").join("..").join("dist"))
            .load(tmp.path(), &mut ctx)
            .unwrap();
        assert_eq!(ctx.len(), 6);
    }

    // =========================================================================
    // Slugs
    // =========================================================================

    #[test]
    fn slug_field_overrides_entry_name() {
        let tmp = site();
        write_file(
            tmp.path(),
            "030-custom.toml",
            "type = \"article\"\ntitle = \"Custom\"\nslug = \"renamed\"\n",
        );
        let ctx = load(tmp.path()).unwrap();
        assert!(ctx.node_id(&ContentPath::parse("/renamed").unwrap()).is_some());
        assert!(ctx.node_id(&ContentPath::parse("/custom").unwrap()).is_none());
    }

    #[test]
    fn invalid_entry_name_uses_title() {
        let tmp = site();
        write_file(
            tmp.path(),
            "040-Summer Trip.toml",
            "type = \"article\"\ntitle = \"Summer Trip 2024\"\n",
        );
        let ctx = load(tmp.path()).unwrap();
        assert!(ctx
            .node_id(&ContentPath::parse("/summer-trip-2024").unwrap())
            .is_some());
    }

    #[test]
    fn duplicate_slug_is_error() {
        let tmp = site();
        write_file(tmp.path(), "050-notes.toml", "type = \"article\"\ntitle = \"Dup\"\n");
        assert!(matches!(
            load(tmp.path()),
            Err(LoadError::DuplicateSlug { slug, .. }) if slug == "notes"
        ));
    }

    // =========================================================================
    // Kinds and properties
    // =========================================================================

    #[test]
    fn nested_type_as_file_is_error() {
        let tmp = site();
        write_file(tmp.path(), "gallery.toml", "type = \"page\"\ntitle = \"G\"\n");
        assert!(matches!(load(tmp.path()), Err(LoadError::NestedAsFile { .. })));
    }

    #[test]
    fn non_branch_with_children_is_error() {
        let tmp = site();
        write_file(tmp.path(), "010-about/child.toml", "type = \"article\"\ntitle = \"C\"\n");
        assert!(matches!(
            load(tmp.path()),
            Err(LoadError::ChildrenNotAllowed { kind: NodeKind::Nested, .. })
        ));
    }

    #[test]
    fn markdown_property_file_fills_field() {
        let tmp = site();
        write_file(tmp.path(), "010-about/body.md", "# About\n\nHello.");
        let ctx = load(tmp.path()).unwrap();
        let about = ctx.node_id(&ContentPath::parse("/about").unwrap()).unwrap();
        assert!(matches!(
            ctx.draft(about).fields.get("body"),
            Some(DraftValue::Markdown(md)) if md.0.starts_with("# About")
        ));
    }

    #[test]
    fn property_file_conflicting_with_inline_is_error() {
        let tmp = site();
        write_file(
            tmp.path(),
            "010-about/_index.toml",
            "type = \"page\"\ntitle = \"About\"\nbody = \"inline\"\n",
        );
        write_file(tmp.path(), "010-about/body.md", "file");
        assert!(matches!(load(tmp.path()), Err(LoadError::DuplicateProperty { .. })));
    }

    #[test]
    fn schema_error_names_source_file() {
        let tmp = site();
        write_file(tmp.path(), "bad.toml", "type = \"article\"\n");
        let Err(err) = load(tmp.path()) else {
            panic!("article without a title loaded");
        };
        assert!(err.to_string().contains("bad.toml"), "{err}");
        assert!(err.to_string().contains("title"), "{err}");
    }
}
