//! Image processing: cached resizing of image assets.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` + per-format animation check |
//! | **Resize** | Lanczos3, fill mode applied by [`RustBackend`] |
//! | **Encode** | source format, plus lossless WebP alternates |
//! | **Memoize** | [`DerivedAssetCache`](crate::cache::DerivedAssetCache) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: [`FillMode`], [`OutputFormat`] and resize descriptions
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Transform**: [`ImageTransformer`], combining caches + backend

pub mod backend;
mod calculations;
mod params;
pub mod rust_backend;
mod transform;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::target_dimensions;
pub use params::{FillMode, OutputFormat, Quality, ResizeParams};
pub use rust_backend::{RustBackend, is_supported_image};
pub use transform::{
    ImageInfoCacheKey, ImageResizeCacheKey, ImageTransformer, PictureSource, ResizedArtifact,
    ResizedImage, TransformError, TransformedPicture, desired_name, native_mime_type,
};
