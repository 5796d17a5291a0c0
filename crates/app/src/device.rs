use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use invoice_desk_backend::BoxFuture;
use invoice_desk_session::error::{
    DeviceBusySnafu, DeviceUnavailableSnafu, MediaAcquisitionError, PermissionDeniedSnafu,
};
use invoice_desk_session::{Frame, MediaResult, MediaSource, VideoConstraints, VideoStream};
use snafu::OptionExt;

/// A camera stand-in that serves one decoded image as every frame.
///
/// Only one stream may be open at a time; a second request reports the device busy.
pub struct StillImageSource {
    image_path: Option<PathBuf>,
    in_use: Arc<AtomicBool>,
}

impl StillImageSource {
    pub fn new(image_path: Option<PathBuf>) -> Self {
        Self {
            image_path,
            in_use: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    async fn open(&self, constraints: VideoConstraints) -> MediaResult<Box<dyn VideoStream>> {
        let path = self.image_path.as_ref().context(DeviceUnavailableSnafu {
            stage: "still-image-path",
            details: "no still image configured".to_string(),
        })?;

        let bytes = tokio::fs::read(path).await.map_err(|error| {
            if error.kind() == std::io::ErrorKind::PermissionDenied {
                PermissionDeniedSnafu {
                    stage: "still-image-read",
                    details: format!("{}: {error}", path.display()),
                }
                .build()
            } else {
                DeviceUnavailableSnafu {
                    stage: "still-image-read",
                    details: format!("{}: {error}", path.display()),
                }
                .build()
            }
        })?;

        let decoded = image::load_from_memory(&bytes).map_err(|error| {
            DeviceUnavailableSnafu {
                stage: "still-image-decode",
                details: format!("{}: {error}", path.display()),
            }
            .build()
        })?;
        let rgb = decoded.to_rgb8();
        let frame = Frame::new(rgb.width(), rgb.height(), rgb.into_raw());

        if self
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DeviceBusySnafu {
                stage: "still-image-open",
                details: "a stream is already open".to_string(),
            }
            .fail();
        }

        tracing::debug!(
            path = ?path,
            width = frame.width,
            height = frame.height,
            requested_width = constraints.width,
            requested_height = constraints.height,
            "still image stream opened"
        );

        Ok(Box::new(StillImageStream {
            frame,
            live: true,
            in_use: Arc::clone(&self.in_use),
        }))
    }
}

impl MediaSource for StillImageSource {
    fn acquire_video_stream<'a>(
        &'a self,
        constraints: VideoConstraints,
    ) -> BoxFuture<'a, MediaResult<Box<dyn VideoStream>>> {
        Box::pin(self.open(constraints))
    }
}

struct StillImageStream {
    frame: Frame,
    live: bool,
    in_use: Arc<AtomicBool>,
}

impl VideoStream for StillImageStream {
    fn live_track_count(&self) -> usize {
        usize::from(self.live)
    }

    fn grab_frame(&mut self) -> Option<Frame> {
        self.live.then(|| self.frame.clone())
    }

    fn stop_tracks(&mut self) {
        if std::mem::replace(&mut self.live, false) {
            self.in_use.store(false, Ordering::Release);
        }
    }
}

impl Drop for StillImageStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Keeps the alert text and the log line in one place for the console.
pub fn describe_acquisition_error(error: &MediaAcquisitionError) -> String {
    format!("{} ({error})", error.user_message())
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn write_png(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "invoice-desk-device-{}-{name}.png",
            std::process::id()
        ));
        RgbImage::from_pixel(4, 3, Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn missing_path_is_unavailable() {
        let source = StillImageSource::new(None);
        let result = source
            .acquire_video_stream(VideoConstraints::default())
            .await;
        assert!(matches!(
            result,
            Err(MediaAcquisitionError::DeviceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn unreadable_file_is_unavailable() {
        let source = StillImageSource::new(Some(PathBuf::from("/definitely/not/here.png")));
        let result = source
            .acquire_video_stream(VideoConstraints::default())
            .await;
        assert!(matches!(
            result,
            Err(MediaAcquisitionError::DeviceUnavailable { .. })
        ));
        assert!(!source.is_in_use());
    }

    #[tokio::test]
    async fn serves_decoded_frame_until_stopped() {
        let path = write_png("frame");
        let source = StillImageSource::new(Some(path.clone()));

        let mut stream = source
            .acquire_video_stream(VideoConstraints::default())
            .await
            .unwrap();
        assert_eq!(stream.live_track_count(), 1);

        let frame = stream.grab_frame().unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert_eq!(&frame.rgb[..3], &[200, 10, 10]);

        source.release_stream(stream);
        assert!(!source.is_in_use());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn second_open_reports_busy() {
        let path = write_png("busy");
        let source = StillImageSource::new(Some(path.clone()));

        let first = source
            .acquire_video_stream(VideoConstraints::default())
            .await
            .unwrap();
        let second = source
            .acquire_video_stream(VideoConstraints::default())
            .await;
        assert!(matches!(
            second,
            Err(MediaAcquisitionError::DeviceBusy { .. })
        ));

        drop(first);
        assert!(
            source
                .acquire_video_stream(VideoConstraints::default())
                .await
                .is_ok()
        );
        let _ = std::fs::remove_file(path);
    }
}
