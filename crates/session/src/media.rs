use invoice_desk_backend::BoxFuture;

use crate::error::MediaAcquisitionError;

pub type MediaResult<T> = Result<T, MediaAcquisitionError>;

/// Ideal capture resolution requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// One sampled video frame, RGB8 row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Self {
        Self { width, height, rgb }
    }

    /// Single-colour frame, mostly useful for devices that have nothing to show yet.
    pub fn solid(width: u32, height: u32, pixel: [u8; 3]) -> Self {
        let rgb = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::new(width, height, rgb)
    }
}

/// A live stream held by the capture controller.
pub trait VideoStream: Send {
    /// Number of tracks that have not been stopped yet.
    fn live_track_count(&self) -> usize;

    /// Samples the current frame. `None` until the device delivers its first frame.
    fn grab_frame(&mut self) -> Option<Frame>;

    /// Stops every track of the stream.
    fn stop_tracks(&mut self);
}

/// The camera side of the capture panel.
pub trait MediaSource: Send + Sync {
    /// May suspend on a permission prompt.
    fn acquire_video_stream<'a>(
        &'a self,
        constraints: VideoConstraints,
    ) -> BoxFuture<'a, MediaResult<Box<dyn VideoStream>>>;

    /// Must stop every track before the stream is dropped.
    fn release_stream(&self, mut stream: Box<dyn VideoStream>) {
        stream.stop_tracks();
    }
}
