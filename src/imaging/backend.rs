//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the transformer
//! needs: identify (dimensions plus animation flag) and resize (decode,
//! apply the fill mode, encode to the requested format).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the
//! `MockBackend` in this module's test module, which counts operations.

use super::params::ResizeParams;
use crate::node::ImageInfo;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Dimensions of a written image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Trait for image processing backends.
///
/// Backends are shared between render workers, hence `Send + Sync`.
pub trait ImageBackend: Send + Sync {
    /// Read width, height and whether the image has more than one frame.
    fn identify(&self, path: &Path) -> Result<ImageInfo, BackendError>;

    /// Decode `params.source`, resize it and write `params.output`.
    /// Returns the dimensions actually written.
    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::calculations::target_dimensions;
    use crate::imaging::params::{FillMode, OutputFormat, Quality};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock backend that records operations and writes placeholder files.
    /// Uses Mutex (not RefCell) so it is Sync and works across threads.
    pub struct MockBackend {
        pub info: ImageInfo,
        pub operations: Mutex<Vec<RecordedOp>>,
        pub decodes: AtomicUsize,
        pub resize_delay: Duration,
        pub fail_resize: bool,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(String),
        Resize {
            source: String,
            output: String,
            width: u32,
            height: u32,
            fill: FillMode,
            format: OutputFormat,
        },
    }

    impl MockBackend {
        pub fn with_info(width: u32, height: u32) -> Self {
            Self {
                info: ImageInfo {
                    width,
                    height,
                    is_animated: false,
                },
                operations: Mutex::new(Vec::new()),
                decodes: AtomicUsize::new(0),
                resize_delay: Duration::ZERO,
                fail_resize: false,
            }
        }

        pub fn animated(width: u32, height: u32) -> Self {
            let mut backend = Self::with_info(width, height);
            backend.info.is_animated = true;
            backend
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        /// Number of resize calls (each one decodes the source once).
        pub fn decode_count(&self) -> usize {
            self.decodes.load(Ordering::SeqCst)
        }

        pub fn identify_count(&self) -> usize {
            self.get_operations()
                .iter()
                .filter(|op| matches!(op, RecordedOp::Identify(_)))
                .count()
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, path: &Path) -> Result<ImageInfo, BackendError> {
            self.operations
                .lock()
                .unwrap()
                .push(RecordedOp::Identify(path.to_string_lossy().to_string()));
            Ok(self.info)
        }

        fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            self.operations.lock().unwrap().push(RecordedOp::Resize {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                width: params.width,
                height: params.height,
                fill: params.fill,
                format: params.format,
            });
            if !self.resize_delay.is_zero() {
                std::thread::sleep(self.resize_delay);
            }
            if self.fail_resize {
                return Err(BackendError::ProcessingFailed("mock decode failure".into()));
            }
            let (width, height) = target_dimensions(
                (self.info.width, self.info.height),
                (params.width, params.height),
                params.fill,
            );
            let contents = format!(
                "{}x{} {} {}",
                width, height, params.format, params.source.display()
            );
            std::fs::write(&params.output, contents)?;
            Ok(Dimensions { width, height })
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::with_info(800, 600);
        let info = backend.identify(Path::new("/test/image.jpg")).unwrap();
        assert_eq!((info.width, info.height), (800, 600));

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RecordedOp::Identify(p) if p == "/test/image.jpg"));
    }

    #[test]
    fn mock_resize_writes_output_and_counts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = MockBackend::with_info(200, 200);
        let output = tmp.path().join("out.webp");

        let dims = backend
            .resize(&ResizeParams {
                source: "/source.jpg".into(),
                output: output.clone(),
                width: 100,
                height: 50,
                fill: FillMode::Fit,
                format: OutputFormat::WebP,
                quality: Quality::default(),
            })
            .unwrap();

        assert_eq!(dims, Dimensions { width: 50, height: 50 });
        assert!(output.exists());
        assert_eq!(backend.decode_count(), 1);
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Resize {
                width: 100,
                height: 50,
                fill: FillMode::Fit,
                ..
            }
        ));
    }
}
