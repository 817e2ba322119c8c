//! Frame ownership layer.
//!
//! A `Frame` is one pixel sample handed from a source to the detector:
//!
//! - Pixel bytes are private; read access goes through `pixels()`.
//! - A frame moves *into* a detection dispatch and comes back with the
//!   outcome, so it cannot be mutated or freed while inference is running.
//! - Sources are the only constructors.

/// One RGB8 pixel sample from a still image or a live device.
///
/// The buffer is immutable for the duration of a detection pass. There is no
/// `pixels_mut()` and no way to swap the buffer out from under a running
/// detection: dispatching takes the frame by value.
pub struct Frame {
    /// Private pixel data, tightly packed RGB8 rows.
    data: Vec<u8>,

    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,
}

impl Frame {
    /// Create a new frame. Called only by the source layer.
    pub(crate) fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Read-only view of the packed RGB8 bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Raw byte length (for memory accounting in health logs).
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is deliberately not printed.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}
