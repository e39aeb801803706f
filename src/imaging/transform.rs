//! The image transformer: cached resizing of image assets for the renderer.
//!
//! [`ImageTransformer::transform`] turns an [`ImageAsset`] plus a target box
//! and [`FillMode`] into a [`TransformedPicture`]: a primary image in the
//! source's own format and, unless disabled, a WebP alternate source. Every
//! concrete resize goes through the resize cache:
//!
//! 1. Compute [`ImageResizeCacheKey`] from the asset identity, file size,
//!    target box, fill mode and format.
//! 2. On a miss, decode once, resize, and write a uniquely named artifact
//!    into the cache's artifact directory.
//! 3. Hard-link or copy the artifact into the output tree under a readable
//!    name (`Cover_100x50_webp_hero.jpg.webp`) next to the container node.
//!
//! Image dimensions and the animation flag are cached separately under
//! [`ImageInfoCacheKey`], so transforming one source at several sizes reads
//! its header once. Animated images are passed through untouched.

use super::backend::{BackendError, ImageBackend};
use super::params::{FillMode, OutputFormat, Quality, ResizeParams};
use super::rust_backend::mime_type;
use crate::cache::{CacheCapacity, CacheError, CacheValue, DerivedAssetCache};
use crate::node::{ImageAsset, ImageInfo};
use crate::render::Renderer;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

const INFO_CACHE: &str = "image-info";
const RESIZE_CACHE: &str = "image-resize";

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Error while resizing image {asset} ({width}x{height}, {fill}, {format}): {source}")]
    Resize {
        asset: String,
        width: u32,
        height: u32,
        fill: FillMode,
        format: OutputFormat,
        #[source]
        source: BackendError,
    },
    #[error("Failed to read image info for {asset}: {source}")]
    Identify {
        asset: String,
        #[source]
        source: BackendError,
    },
    #[error("Failed to store {artifact} in the output tree: {source}")]
    Store {
        artifact: String,
        #[source]
        source: io::Error,
    },
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Cache key for image dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageInfoCacheKey {
    pub path: String,
    pub file_size: u64,
}

/// Cache key for one resized variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageResizeCacheKey {
    pub path: String,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub fill_mode: FillMode,
    pub format: OutputFormat,
}

impl CacheValue for ImageInfo {}

/// A resized variant stored in the resize cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizedArtifact {
    pub artifact: String,
    pub width: u32,
    pub height: u32,
}

impl CacheValue for ResizedArtifact {
    fn artifact(&self) -> Option<&str> {
        Some(&self.artifact)
    }
}

/// An image placed in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizedImage {
    pub href: String,
    pub width: u32,
    pub height: u32,
}

/// An alternate encoding of the primary image (`<source>` in HTML terms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureSource {
    pub href: String,
    pub mime_type: String,
}

/// Result of [`ImageTransformer::transform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedPicture {
    pub sources: Vec<PictureSource>,
    pub image: ResizedImage,
}

/// Resizes image assets through the derived-asset caches.
pub struct ImageTransformer {
    backend: Arc<dyn ImageBackend>,
    info_cache: DerivedAssetCache<ImageInfoCacheKey, ImageInfo>,
    resize_cache: DerivedAssetCache<ImageResizeCacheKey, ResizedArtifact>,
    webp: bool,
    quality: Quality,
}

impl std::fmt::Debug for ImageTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageTransformer")
            .field("info_cache", &self.info_cache.name())
            .field("resize_cache", &self.resize_cache.name())
            .field("webp", &self.webp)
            .field("quality", &self.quality)
            .finish_non_exhaustive()
    }
}

impl ImageTransformer {
    /// Open the image caches under `cache_root`. Both caches share the same
    /// capacity bounds.
    pub fn open(
        cache_root: &Path,
        capacity: CacheCapacity,
        backend: Arc<dyn ImageBackend>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            backend,
            info_cache: DerivedAssetCache::open(cache_root, INFO_CACHE, capacity)?,
            resize_cache: DerivedAssetCache::open(cache_root, RESIZE_CACHE, capacity)?,
            webp: true,
            quality: Quality::default(),
        })
    }

    /// Whether `transform` adds a WebP alternate source.
    pub fn with_webp(mut self, webp: bool) -> Self {
        self.webp = webp;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn info_cache(&self) -> &DerivedAssetCache<ImageInfoCacheKey, ImageInfo> {
        &self.info_cache
    }

    pub fn resize_cache(&self) -> &DerivedAssetCache<ImageResizeCacheKey, ResizedArtifact> {
        &self.resize_cache
    }

    /// Persist access times of both caches.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.info_cache.flush()?;
        self.resize_cache.flush()
    }

    /// Width, height and animation flag of `image`, read at most once per
    /// node and once per cache entry.
    pub fn image_info(&self, image: &ImageAsset) -> Result<ImageInfo, TransformError> {
        if let Some(info) = image.info.get() {
            return Ok(*info);
        }
        let file = image.file();
        let key = ImageInfoCacheKey {
            path: file.content_id(),
            file_size: file.file_size(),
        };
        let info = self.info_cache.get_or_compute(&key, |_| {
            self.backend
                .identify(file.fs_path())
                .map_err(|source| TransformError::Identify {
                    asset: file.content_id(),
                    source,
                })
        })?;
        let _ = image.info.set(info);
        Ok(info)
    }

    /// Produce the primary image (source format) and its alternates for the
    /// target box.
    ///
    /// Animated sources are not resized: the original file is placed in the
    /// output tree and returned with its own dimensions and no alternates.
    pub fn transform(
        &self,
        renderer: &Renderer<'_>,
        image: &ImageAsset,
        width: u32,
        height: u32,
        fill: FillMode,
    ) -> Result<TransformedPicture, TransformError> {
        let info = self.image_info(image)?;
        if info.is_animated {
            tracing::warn!(
                image = %image.file().content_id(),
                "animated images are not resized, using original"
            );
            let href = renderer
                .asset_href(image.file(), false)
                .map_err(|source| TransformError::Store {
                    artifact: image.file().file_name().to_string(),
                    source,
                })?;
            return Ok(TransformedPicture {
                sources: Vec::new(),
                image: ResizedImage {
                    href,
                    width: info.width,
                    height: info.height,
                },
            });
        }

        let primary = self.resize(renderer, image, width, height, fill, OutputFormat::Native)?;
        let mut sources = Vec::new();
        if self.webp {
            let webp = self.resize(renderer, image, width, height, fill, OutputFormat::WebP)?;
            sources.push(PictureSource {
                href: webp.href,
                mime_type: "image/webp".to_string(),
            });
        }
        Ok(TransformedPicture {
            sources,
            image: primary,
        })
    }

    /// One cached resize, placed in the output tree.
    pub fn resize(
        &self,
        renderer: &Renderer<'_>,
        image: &ImageAsset,
        width: u32,
        height: u32,
        fill: FillMode,
        format: OutputFormat,
    ) -> Result<ResizedImage, TransformError> {
        let file = image.file();
        let key = ImageResizeCacheKey {
            path: file.content_id(),
            file_size: file.file_size(),
            width,
            height,
            fill_mode: fill,
            format,
        };
        let desired = desired_name(file.file_name(), width, height, fill, format);

        let stored = self.resize_cache.get_or_compute(&key, |artifact_dir| {
            let artifact = unique_artifact_name(&desired);
            tracing::debug!(image = %key.path, artifact = %artifact, "resizing");
            let dims = self
                .backend
                .resize(&ResizeParams {
                    source: file.fs_path().to_path_buf(),
                    output: artifact_dir.join(&artifact),
                    width,
                    height,
                    fill,
                    format,
                    quality: self.quality,
                })
                .map_err(|source| TransformError::Resize {
                    asset: file.content_id(),
                    width,
                    height,
                    fill,
                    format,
                    source,
                })?;
            Ok::<_, TransformError>(ResizedArtifact {
                artifact,
                width: dims.width,
                height: dims.height,
            })
        })?;

        let artifact_path = self.resize_cache.artifact_path(&stored.artifact);
        let render_path = renderer
            .store_artifact(&artifact_path, file.container(), &desired)
            .map_err(|source| TransformError::Store {
                artifact: stored.artifact.clone(),
                source,
            })?;
        Ok(ResizedImage {
            href: renderer.href_for(&render_path, false),
            width: stored.width,
            height: stored.height,
        })
    }
}

/// Mime type of the primary (native format) variant.
pub fn native_mime_type(file_name: &str) -> Option<&'static str> {
    mime_type(Path::new(file_name))
}

/// Readable output name: `{fill}_{w}x{h}_{format}_{file name}[.webp]`.
pub fn desired_name(
    file_name: &str,
    width: u32,
    height: u32,
    fill: FillMode,
    format: OutputFormat,
) -> String {
    let mut name = format!("{fill}_{width}x{height}_{format}_{file_name}");
    if let Some(ext) = format.extension() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// `desired` with a random suffix before its extension.
fn unique_artifact_name(desired: &str) -> String {
    let path = PathBuf::from(desired);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| desired.to_string());
    let suffix = uuid::Uuid::new_v4().simple();
    match path.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    }
}
