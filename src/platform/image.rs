use super::types::{ImageFormat, Size};
use std::fmt;
use std::time::SystemTime;

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// A still image acquired from an image reader.
///
/// The underlying platform buffer is returned to the reader exactly once:
/// either through [`PendingImage::close`] or when the value is dropped,
/// whichever comes first. Handing the image to another owner moves that
/// obligation along with it.
pub struct PendingImage {
    size: Size,
    format: ImageFormat,
    timestamp: SystemTime,
    data: Vec<u8>,
    release: Option<ReleaseHook>,
}

impl PendingImage {
    pub fn new<F>(size: Size, format: ImageFormat, data: Vec<u8>, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            size,
            format,
            timestamp: SystemTime::now(),
            data,
            release: Some(Box::new(release)),
        }
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy the bytes out and release the platform buffer.
    pub fn into_bytes(mut self) -> Vec<u8> {
        let data = std::mem::take(&mut self.data);
        self.release_buffer();
        data
    }

    /// Release the platform buffer now.
    pub fn close(mut self) {
        self.release_buffer();
    }

    fn release_buffer(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for PendingImage {
    fn drop(&mut self) {
        self.release_buffer();
    }
}

impl fmt::Debug for PendingImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingImage")
            .field("size", &self.size)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .field("released", &self.release.is_none())
            .finish()
    }
}
