//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how*. They are the interface
//! between the [`ImageTransformer`](super::ImageTransformer), which decides
//! which variants to produce, and the [`backend`](super::backend), which does
//! the pixel work. Both fill mode and format are part of the resize cache key,
//! so they serialize to stable names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// How an image is fitted into a target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillMode {
    /// Scale to cover the box, then center-crop to exactly the box.
    Cover,
    /// Scale down to fit inside the box, never past the source size.
    Fit,
    /// Force exactly the box, ignoring aspect ratio.
    Transform,
    /// Keep the source dimensions.
    NoResize,
}

impl fmt::Display for FillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FillMode::Cover => "Cover",
            FillMode::Fit => "Fit",
            FillMode::Transform => "Transform",
            FillMode::NoResize => "NoResize",
        })
    }
}

impl FromStr for FillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cover" => Ok(FillMode::Cover),
            "fit" => Ok(FillMode::Fit),
            "transform" => Ok(FillMode::Transform),
            "noresize" | "no-resize" | "none" => Ok(FillMode::NoResize),
            other => Err(format!(
                "unknown fill mode '{other}' (expected cover, fit, transform or no-resize)"
            )),
        }
    }
}

/// Encoding of a resized variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Same format as the source file.
    Native,
    WebP,
}

impl OutputFormat {
    /// Extension appended to the desired file name (`None` keeps the source's).
    pub fn extension(self) -> Option<&'static str> {
        match self {
            OutputFormat::Native => None,
            OutputFormat::WebP => Some("webp"),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Native => "orig",
            OutputFormat::WebP => "webp",
        })
    }
}

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Full specification of one resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fill: FillMode,
    pub format: OutputFormat,
    pub quality: Quality,
}
