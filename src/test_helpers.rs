//! Shared test utilities for the sitegraph test suite.
//!
//! Builds content trees on disk and synthetic images, and wraps the
//! build → render boundary plumbing most tests need.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = image_page_site();
//! let graph = site.build();
//! let renderer = site.renderer(&graph);
//! let hero = site.hero(&graph);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::cache::CacheCapacity;
use crate::graph::{BuildError, ContentGraph, GraphBuilder};
use crate::imaging::{ImageBackend, ImageTransformer};
use crate::node::ImageAsset;
use crate::path::ContentPath;
use crate::render::Renderer;
use crate::schema::TypeRegistry;
use image::{ImageEncoder, RgbImage, RgbaImage};

// =========================================================================
// Files
// =========================================================================

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

/// Create a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Create a small valid PNG file with the given dimensions.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([128, (x % 256) as u8, (y % 256) as u8])
    });
    img.save_with_format(path, image::ImageFormat::Png).unwrap();
}

/// Create a GIF with `frames` frames. One frame is a still image.
pub fn create_test_gif(path: &Path, width: u32, height: u32, frames: u32) {
    let file = fs::File::create(path).unwrap();
    let mut encoder = image::codecs::gif::GifEncoder::new(std::io::BufWriter::new(file));
    let frames = (0..frames).map(|i| {
        let shade = (i * 60 % 256) as u8;
        image::Frame::new(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([shade, 0, 255 - shade, 255]),
        ))
    });
    encoder.encode_frames(frames).unwrap();
}

// =========================================================================
// Sites
// =========================================================================

/// A temporary site: `content/`, `output/` and `cache/` side by side.
pub struct TestSite {
    tmp: TempDir,
    registry: TypeRegistry,
}

impl TestSite {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("content")).unwrap();
        Self {
            tmp,
            registry: TypeRegistry::standard(),
        }
    }

    /// Site with only a root website node.
    pub fn website_only() -> Self {
        let site = Self::new();
        write_file(
            &site.content_dir(),
            "_index.toml",
            "type = \"website\"\ntitle = \"Bare\"\n",
        );
        site
    }

    pub fn content_dir(&self) -> PathBuf {
        self.tmp.path().join("content")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.tmp.path().join("output")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.tmp.path().join("cache")
    }

    pub fn try_build(&self) -> Result<ContentGraph, BuildError> {
        GraphBuilder::new(&self.registry).build(&self.content_dir())
    }

    pub fn build(&self) -> ContentGraph {
        self.try_build().unwrap()
    }

    /// Build with an image transformer over `backend`, cached in `cache_dir()`.
    pub fn build_with_backend(&self, backend: Arc<dyn ImageBackend>) -> ContentGraph {
        let transformer =
            ImageTransformer::open(&self.cache_dir(), CacheCapacity::default(), backend).unwrap();
        GraphBuilder::new(&self.registry)
            .with_transformer(Arc::new(transformer))
            .build(&self.content_dir())
            .unwrap()
    }

    pub fn renderer<'g>(&self, graph: &'g ContentGraph) -> Renderer<'g> {
        Renderer::new(graph, self.output_dir())
    }

    /// The `image` field of `/gallery/sunset` in [`image_page_site`].
    pub fn hero<'g>(&self, graph: &'g ContentGraph) -> &'g ImageAsset {
        let path = ContentPath::parse("/gallery/sunset").unwrap();
        graph
            .find(&path)
            .and_then(|n| n.field("image"))
            .and_then(|v| v.as_image())
            .unwrap_or_else(|| panic!("no image field on {path}"))
    }
}

/// Website → `gallery` section → `sunset` image page holding a real
/// 320x240 `hero.png`.
pub fn image_page_site() -> TestSite {
    let site = TestSite::new();
    let root = site.content_dir();
    write_file(&root, "_index.toml", "type = \"website\"\ntitle = \"Photos\"\n");
    write_file(
        &root,
        "010-gallery/_index.toml",
        "type = \"section\"\ntitle = \"Gallery\"\n",
    );
    write_file(
        &root,
        "010-gallery/sunset/_index.toml",
        "type = \"image-page\"\ntitle = \"Sunset\"\nimage = \"hero.png\"\n",
    );
    create_test_png(&root.join("010-gallery/sunset/hero.png"), 320, 240);
    site
}
