use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use invoice_desk_backend::{BackendError, InvoiceProcessor, InvoiceUpload, ProcessingReceipt};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use uuid::Uuid;

use crate::error::{MediaAcquisitionError, ValidationError};
use crate::media::{Frame, MediaSource, VideoConstraints, VideoStream};
use crate::upload::{SelectedFile, UploadPolicy};

pub const CAPTURE_MIME_TYPE: &str = "image/jpeg";
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Identifier of one pending artifact; also the reference handed to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactOrigin {
    Camera,
    FileUpload,
}

/// The single candidate image pending submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureArtifact {
    pub id: ArtifactId,
    pub origin: ArtifactOrigin,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
    pub size_bytes: u64,
    pub created_at_unix_ms: u64,
}

impl CaptureArtifact {
    fn new(
        origin: ArtifactOrigin,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    ) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            id: ArtifactId::new_v7(),
            origin,
            file_name,
            mime_type,
            bytes: bytes.into(),
            size_bytes,
            created_at_unix_ms: unix_millis(),
        }
    }

    fn to_upload(&self) -> InvoiceUpload {
        InvoiceUpload {
            reference: self.id.to_string(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            bytes: Arc::clone(&self.bytes),
        }
    }
}

/// Exclusive state of the capture panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    CameraActive,
    ArtifactReady,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::CameraActive => "camera-active",
            Self::ArtifactReady => "artifact-ready",
        };
        formatter.write_str(label)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CaptureError {
    #[snafu(display("{source}"))]
    MediaAcquisition {
        stage: &'static str,
        source: MediaAcquisitionError,
    },
    #[snafu(display("{source}"))]
    InvalidFile {
        stage: &'static str,
        source: ValidationError,
    },
    #[snafu(display("`{operation}` is not allowed while the capture panel is {state}"))]
    InvalidState {
        stage: &'static str,
        operation: &'static str,
        state: CaptureState,
    },
    #[snafu(display("camera acquisition was superseded before the device answered"))]
    AcquisitionAbandoned { stage: &'static str },
    #[snafu(display("the camera has not delivered a frame yet"))]
    FrameUnavailable { stage: &'static str },
    #[snafu(display("failed to encode captured frame on `{stage}`: {source}"))]
    FrameEncode {
        stage: &'static str,
        source: image::ImageError,
    },
    #[snafu(display("invoice processing rejected artifact {artifact_id}: {source}"))]
    Submission {
        stage: &'static str,
        artifact_id: ArtifactId,
        source: BackendError,
    },
    #[snafu(display("the capture panel has been torn down"))]
    Disposed { stage: &'static str },
}

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub constraints: VideoConstraints,
    pub jpeg_quality: u8,
    pub policy: UploadPolicy,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            constraints: VideoConstraints::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            policy: UploadPolicy::invoice_capture(),
        }
    }
}

// The stream and the artifact are never held together; `state()` is derived from them.
#[derive(Default)]
struct CaptureInner {
    stream: Option<Box<dyn VideoStream>>,
    artifact: Option<CaptureArtifact>,
    attempt: u64,
    acquiring: Option<u64>,
    disposed: bool,
}

impl CaptureInner {
    fn state(&self) -> CaptureState {
        match (&self.stream, &self.artifact) {
            (Some(_), _) => CaptureState::CameraActive,
            (None, Some(_)) => CaptureState::ArtifactReady,
            (None, None) => CaptureState::Idle,
        }
    }

    /// Invalidates any in-flight acquisition.
    fn supersede_acquisition(&mut self) {
        self.attempt = self.attempt.wrapping_add(1);
        self.acquiring = None;
    }
}

impl Drop for CaptureInner {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop_tracks();
        }
    }
}

/// Owns the capture lifecycle: live camera stream, pending artifact, and hand-off.
///
/// Clones share one panel. Every path that gives up the stream goes through
/// [`MediaSource::release_stream`].
#[derive(Clone)]
pub struct CaptureSessionController {
    inner: Arc<Mutex<CaptureInner>>,
    media: Arc<dyn MediaSource>,
    options: CaptureOptions,
}

impl CaptureSessionController {
    pub fn new(media: Arc<dyn MediaSource>) -> Self {
        Self::with_options(media, CaptureOptions::default())
    }

    pub fn with_options(media: Arc<dyn MediaSource>, options: CaptureOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureInner::default())),
            media,
            options,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_held_stream(&self, inner: &mut CaptureInner, stage: &'static str) {
        if let Some(stream) = inner.stream.take() {
            self.media.release_stream(stream);
            tracing::debug!(stage, "camera stream released");
        }
    }

    pub fn state(&self) -> CaptureState {
        self.lock().state()
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// True while a device request is waiting on the platform, e.g. a permission prompt.
    pub fn is_acquiring(&self) -> bool {
        self.lock().acquiring.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn held_track_count(&self) -> usize {
        self.lock()
            .stream
            .as_ref()
            .map_or(0, |stream| stream.live_track_count())
    }

    pub fn pending_artifact(&self) -> Option<CaptureArtifact> {
        self.lock().artifact.clone()
    }

    /// Only a ready artifact may be handed to the processing backend.
    pub fn can_submit(&self) -> bool {
        self.state() == CaptureState::ArtifactReady
    }

    /// Requests a live stream. Any pending artifact is discarded before the attempt.
    ///
    /// Calling this while the camera is already active is a no-op.
    pub async fn start_camera(&self) -> CaptureResult<()> {
        let attempt = {
            let mut inner = self.lock();
            ensure!(
                !inner.disposed,
                DisposedSnafu {
                    stage: "start-camera"
                }
            );
            if inner.stream.is_some() {
                return Ok(());
            }
            if let Some(discarded) = inner.artifact.take() {
                tracing::debug!(artifact_id = %discarded.id, "pending artifact discarded for camera start");
            }
            inner.supersede_acquisition();
            inner.acquiring = Some(inner.attempt);
            inner.attempt
        };

        tracing::info!(
            attempt,
            width = self.options.constraints.width,
            height = self.options.constraints.height,
            "requesting camera stream"
        );
        let acquired = self
            .media
            .acquire_video_stream(self.options.constraints)
            .await;

        let mut inner = self.lock();
        let current = inner.acquiring == Some(attempt) && !inner.disposed;
        if inner.acquiring == Some(attempt) {
            inner.acquiring = None;
        }

        match acquired {
            Ok(stream) if current => {
                inner.stream = Some(stream);
                tracing::info!(attempt, "camera active");
                Ok(())
            }
            Ok(stream) => {
                self.media.release_stream(stream);
                tracing::info!(attempt, "late camera stream released");
                AcquisitionAbandonedSnafu {
                    stage: "start-camera-resolve",
                }
                .fail()
            }
            Err(source) => {
                tracing::warn!(attempt, error = %source, "camera acquisition failed");
                Err(source).context(MediaAcquisitionSnafu {
                    stage: "start-camera-acquire",
                })
            }
        }
    }

    /// Releases the stream and returns to idle. No-op unless the camera is active.
    pub fn stop_camera(&self) {
        let mut inner = self.lock();
        self.release_held_stream(&mut inner, "stop-camera");
    }

    /// Samples the current frame into a camera artifact and releases the stream.
    ///
    /// The stream is released even when sampling or encoding fails.
    pub fn capture_photo(&self) -> CaptureResult<CaptureArtifact> {
        let mut inner = self.lock();
        ensure!(
            !inner.disposed,
            DisposedSnafu {
                stage: "capture-photo"
            }
        );
        let state = inner.state();
        let mut stream = inner.stream.take().context(InvalidStateSnafu {
            stage: "capture-photo",
            operation: "capture_photo",
            state,
        })?;

        let frame = stream.grab_frame();
        self.media.release_stream(stream);

        let frame = frame.context(FrameUnavailableSnafu {
            stage: "capture-photo-sample",
        })?;
        let bytes = encode_jpeg(&frame, self.options.jpeg_quality)?;

        let artifact = CaptureArtifact::new(
            ArtifactOrigin::Camera,
            format!("camera-{}.jpg", unix_millis()),
            CAPTURE_MIME_TYPE.to_string(),
            bytes,
        );
        tracing::info!(
            artifact_id = %artifact.id,
            width = frame.width,
            height = frame.height,
            size_bytes = artifact.size_bytes,
            "photo captured"
        );
        inner.artifact = Some(artifact.clone());
        Ok(artifact)
    }

    /// Accepts a local file as the pending artifact, replacing any previous one.
    ///
    /// Rejected files leave the panel untouched.
    pub fn select_file(&self, file: SelectedFile) -> CaptureResult<CaptureArtifact> {
        let mut inner = self.lock();
        ensure!(
            !inner.disposed,
            DisposedSnafu {
                stage: "select-file"
            }
        );
        if let Err(source) = self.options.policy.validate(&file) {
            tracing::info!(file_name = %file.name, error = %source, "file rejected");
            return Err(source).context(InvalidFileSnafu {
                stage: "select-file-validate",
            });
        }

        self.release_held_stream(&mut inner, "select-file");
        inner.supersede_acquisition();

        let artifact = CaptureArtifact::new(
            ArtifactOrigin::FileUpload,
            file.name,
            file.mime_type,
            file.bytes,
        );
        if let Some(previous) = inner.artifact.replace(artifact.clone()) {
            tracing::debug!(artifact_id = %previous.id, "pending artifact replaced");
        }
        tracing::info!(
            artifact_id = %artifact.id,
            file_name = %artifact.file_name,
            size_bytes = artifact.size_bytes,
            "file selected"
        );
        Ok(artifact)
    }

    pub fn clear_artifact(&self) -> CaptureResult<()> {
        let mut inner = self.lock();
        let state = inner.state();
        let discarded = inner.artifact.take().context(InvalidStateSnafu {
            stage: "clear-artifact",
            operation: "clear_artifact",
            state,
        })?;
        tracing::debug!(artifact_id = %discarded.id, "pending artifact cleared");
        Ok(())
    }

    /// Hands the pending artifact to the processor.
    ///
    /// On success the controller lets go of the artifact if it is still the pending one;
    /// on failure it stays pending so the user can retry.
    pub async fn submit(&self, processor: &dyn InvoiceProcessor) -> CaptureResult<ProcessingReceipt> {
        let artifact = {
            let inner = self.lock();
            ensure!(
                !inner.disposed,
                DisposedSnafu { stage: "submit" }
            );
            let state = inner.state();
            inner.artifact.clone().context(InvalidStateSnafu {
                stage: "submit",
                operation: "submit",
                state,
            })?
        };

        let receipt = processor
            .process(artifact.to_upload())
            .await
            .context(SubmissionSnafu {
                stage: "submit-process",
                artifact_id: artifact.id,
            })?;

        let mut inner = self.lock();
        if inner
            .artifact
            .as_ref()
            .is_some_and(|pending| pending.id == artifact.id)
        {
            inner.artifact = None;
        }
        tracing::info!(artifact_id = %artifact.id, reference = %receipt.reference, "artifact submitted");
        Ok(receipt)
    }

    /// Teardown: releases the stream unconditionally and ignores late device answers.
    pub fn dispose(&self) {
        let mut inner = self.lock();
        if inner.disposed {
            return;
        }
        self.release_held_stream(&mut inner, "dispose");
        inner.supersede_acquisition();
        inner.artifact = None;
        inner.disposed = true;
        tracing::debug!("capture panel disposed");
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> CaptureResult<Vec<u8>> {
    let image = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()).context(
        FrameUnavailableSnafu {
            stage: "capture-photo-frame-layout",
        },
    )?;

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
        .encode_image(&image)
        .context(FrameEncodeSnafu {
            stage: "capture-photo-encode",
        })?;
    Ok(bytes)
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use invoice_desk_backend::BoxFuture;
    use tokio::sync::oneshot;

    use super::*;
    use crate::media::MediaResult;

    struct FakeStream {
        live: Arc<AtomicUsize>,
        tracks: usize,
        frame: Option<Frame>,
    }

    impl VideoStream for FakeStream {
        fn live_track_count(&self) -> usize {
            self.tracks
        }

        fn grab_frame(&mut self) -> Option<Frame> {
            self.frame.clone()
        }

        fn stop_tracks(&mut self) {
            self.live.fetch_sub(self.tracks, Ordering::SeqCst);
            self.tracks = 0;
        }
    }

    enum Behaviour {
        Grant { frame: Option<Frame> },
        Deny,
    }

    struct FakeCamera {
        live: Arc<AtomicUsize>,
        releases: AtomicUsize,
        behaviour: Behaviour,
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl FakeCamera {
        fn granting() -> Arc<Self> {
            Self::with(Behaviour::Grant {
                frame: Some(Frame::solid(4, 2, [200, 10, 10])),
            })
        }

        fn with(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                live: Arc::new(AtomicUsize::new(0)),
                releases: AtomicUsize::new(0),
                behaviour,
                gate: Mutex::new(None),
            })
        }

        /// Holds the next acquisition until the returned sender fires.
        fn hold_next_acquisition(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.gate.lock().unwrap() = Some(rx);
            tx
        }

        fn live_tracks(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }
    }

    impl MediaSource for FakeCamera {
        fn acquire_video_stream<'a>(
            &'a self,
            _constraints: VideoConstraints,
        ) -> BoxFuture<'a, MediaResult<Box<dyn VideoStream>>> {
            let gate = self.gate.lock().unwrap().take();
            Box::pin(async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                match &self.behaviour {
                    Behaviour::Grant { frame } => {
                        self.live.fetch_add(1, Ordering::SeqCst);
                        Ok(Box::new(FakeStream {
                            live: Arc::clone(&self.live),
                            tracks: 1,
                            frame: frame.clone(),
                        }) as Box<dyn VideoStream>)
                    }
                    Behaviour::Deny => Err(MediaAcquisitionError::PermissionDenied {
                        stage: "fake-camera",
                        details: "user dismissed the prompt".to_string(),
                    }),
                }
            })
        }

        fn release_stream(&self, mut stream: Box<dyn VideoStream>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            stream.stop_tracks();
        }
    }

    fn png(name: &str) -> SelectedFile {
        SelectedFile::new(name, "image/png", vec![137, 80, 78, 71])
    }

    #[tokio::test]
    async fn start_then_capture_produces_camera_artifact() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());

        controller.start_camera().await.unwrap();
        assert_eq!(controller.state(), CaptureState::CameraActive);
        assert_eq!(controller.held_track_count(), 1);
        assert!(!controller.can_submit());

        let artifact = controller.capture_photo().unwrap();

        assert_eq!(controller.state(), CaptureState::ArtifactReady);
        assert_eq!(artifact.origin, ArtifactOrigin::Camera);
        assert_eq!(artifact.mime_type, CAPTURE_MIME_TYPE);
        assert!(artifact.file_name.starts_with("camera-"));
        assert_eq!(&artifact.bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(controller.held_track_count(), 0);
        assert_eq!(camera.live_tracks(), 0);
        assert!(controller.can_submit());
    }

    #[tokio::test]
    async fn failed_acquisition_returns_to_idle_without_stale_artifact() {
        let camera = FakeCamera::with(Behaviour::Deny);
        let controller = CaptureSessionController::new(camera);
        controller.select_file(png("old.png")).unwrap();

        let result = controller.start_camera().await;

        assert!(matches!(
            result,
            Err(CaptureError::MediaAcquisition {
                source: MediaAcquisitionError::PermissionDenied { .. },
                ..
            })
        ));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(controller.pending_artifact().is_none());
        assert!(!controller.is_acquiring());
    }

    #[tokio::test]
    async fn stop_camera_releases_tracks_and_is_idempotent() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());

        controller.stop_camera();
        assert_eq!(controller.state(), CaptureState::Idle);

        controller.start_camera().await.unwrap();
        controller.stop_camera();
        controller.stop_camera();

        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(camera.live_tracks(), 0);
        assert_eq!(camera.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capture_without_frame_still_releases_stream() {
        let camera = FakeCamera::with(Behaviour::Grant { frame: None });
        let controller = CaptureSessionController::new(camera.clone());
        controller.start_camera().await.unwrap();

        let result = controller.capture_photo();

        assert!(matches!(result, Err(CaptureError::FrameUnavailable { .. })));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(camera.live_tracks(), 0);
    }

    #[test]
    fn capture_requires_active_camera() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        let result = controller.capture_photo();
        assert!(matches!(
            result,
            Err(CaptureError::InvalidState {
                state: CaptureState::Idle,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn selecting_file_while_camera_active_releases_stream_first() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());
        controller.start_camera().await.unwrap();

        let artifact = controller.select_file(png("invoice.png")).unwrap();

        assert_eq!(artifact.origin, ArtifactOrigin::FileUpload);
        assert_eq!(controller.state(), CaptureState::ArtifactReady);
        assert_eq!(camera.live_tracks(), 0);
    }

    #[test]
    fn selecting_replaces_previous_artifact() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        let first = controller.select_file(png("a.png")).unwrap();
        let second = controller.select_file(png("b.png")).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(controller.pending_artifact().map(|artifact| artifact.id), Some(second.id));
    }

    #[tokio::test]
    async fn rejected_file_leaves_state_unchanged() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());
        controller.start_camera().await.unwrap();

        let result = controller.select_file(SelectedFile::new("notes.txt", "text/plain", vec![1]));

        assert!(matches!(
            result,
            Err(CaptureError::InvalidFile {
                source: ValidationError::UnsupportedFileType { .. },
                ..
            })
        ));
        assert_eq!(controller.state(), CaptureState::CameraActive);
        assert_eq!(camera.live_tracks(), 1);
    }

    #[test]
    fn oversized_template_is_rejected_for_five_mebibyte_flow() {
        let options = CaptureOptions {
            policy: UploadPolicy::form_template(),
            ..CaptureOptions::default()
        };
        let controller = CaptureSessionController::with_options(FakeCamera::granting(), options);

        let result = controller.select_file(SelectedFile::new(
            "template.json",
            "application/json",
            vec![b' '; 6_000_000],
        ));

        assert!(matches!(
            result,
            Err(CaptureError::InvalidFile {
                source: ValidationError::FileTooLarge { .. },
                ..
            })
        ));
        assert_eq!(controller.state(), CaptureState::Idle);
    }

    #[test]
    fn clear_artifact_returns_to_idle() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        assert!(controller.clear_artifact().is_err());

        controller.select_file(png("a.png")).unwrap();
        controller.clear_artifact().unwrap();

        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(!controller.can_submit());
    }

    #[tokio::test]
    async fn starting_camera_discards_pending_artifact() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        controller.select_file(png("a.png")).unwrap();

        controller.start_camera().await.unwrap();

        assert_eq!(controller.state(), CaptureState::CameraActive);
        assert!(controller.pending_artifact().is_none());
    }

    #[tokio::test]
    async fn acquisition_resolving_after_dispose_is_released() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());
        let release = camera.hold_next_acquisition();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_camera().await }
        });
        tokio::task::yield_now().await;
        assert!(controller.is_acquiring());
        assert_eq!(controller.state(), CaptureState::Idle);

        controller.dispose();
        release.send(()).unwrap();
        let result = pending.await.unwrap();

        assert!(matches!(result, Err(CaptureError::AcquisitionAbandoned { .. })));
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(camera.live_tracks(), 0);
        assert!(matches!(
            controller.start_camera().await,
            Err(CaptureError::Disposed { .. })
        ));
    }

    #[tokio::test]
    async fn file_selected_during_acquisition_wins() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());
        let release = camera.hold_next_acquisition();

        let pending = tokio::spawn({
            let controller = controller.clone();
            async move { controller.start_camera().await }
        });
        tokio::task::yield_now().await;

        controller.select_file(png("picked.png")).unwrap();
        release.send(()).unwrap();
        let result = pending.await.unwrap();

        assert!(matches!(result, Err(CaptureError::AcquisitionAbandoned { .. })));
        assert_eq!(controller.state(), CaptureState::ArtifactReady);
        assert_eq!(camera.live_tracks(), 0);
    }

    #[tokio::test]
    async fn dispose_releases_active_stream() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());
        controller.start_camera().await.unwrap();

        controller.dispose();
        controller.stop_camera();

        assert_eq!(camera.live_tracks(), 0);
        assert_eq!(controller.state(), CaptureState::Idle);
        assert!(controller.is_disposed());
    }

    #[tokio::test]
    async fn random_operation_sequences_keep_one_state() {
        let camera = FakeCamera::granting();
        let controller = CaptureSessionController::new(camera.clone());

        // Deterministic pseudo-random walk over the public operations.
        let mut seed: u32 = 0x2545_F491;
        for _ in 0..400 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            match seed % 5 {
                0 => {
                    let _ = controller.start_camera().await;
                }
                1 => controller.stop_camera(),
                2 => {
                    let _ = controller.capture_photo();
                }
                3 => {
                    let _ = controller.select_file(png("walk.png"));
                }
                _ => {
                    let _ = controller.clear_artifact();
                }
            }

            let state = controller.state();
            let held = controller.held_track_count();
            let pending = controller.pending_artifact().is_some();
            match state {
                CaptureState::CameraActive => assert!(held == 1 && !pending),
                CaptureState::ArtifactReady => assert!(held == 0 && pending),
                CaptureState::Idle => assert!(held == 0 && !pending),
            }
            assert_eq!(camera.live_tracks(), held);
        }
    }

    struct RecordingProcessor {
        fail: bool,
        received: Mutex<Vec<InvoiceUpload>>,
    }

    impl InvoiceProcessor for RecordingProcessor {
        fn process<'a>(
            &'a self,
            upload: InvoiceUpload,
        ) -> BoxFuture<'a, Result<ProcessingReceipt, BackendError>> {
            Box::pin(async move {
                let reference = upload.reference.clone();
                self.received.lock().unwrap().push(upload);
                if self.fail {
                    return Err(BackendError::EmptyReply { stage: "fake-processor" });
                }
                Ok(ProcessingReceipt {
                    reference,
                    location: None,
                })
            })
        }
    }

    #[tokio::test]
    async fn successful_submission_releases_artifact() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        let artifact = controller.select_file(png("a.png")).unwrap();
        let processor = RecordingProcessor {
            fail: false,
            received: Mutex::new(Vec::new()),
        };

        let receipt = controller.submit(&processor).await.unwrap();

        assert_eq!(receipt.reference, artifact.id.to_string());
        assert_eq!(controller.state(), CaptureState::Idle);
        assert_eq!(processor.received.lock().unwrap()[0].mime_type, "image/png");
    }

    #[tokio::test]
    async fn failed_submission_keeps_artifact_for_retry() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        controller.select_file(png("a.png")).unwrap();
        let processor = RecordingProcessor {
            fail: true,
            received: Mutex::new(Vec::new()),
        };

        let result = controller.submit(&processor).await;

        assert!(matches!(result, Err(CaptureError::Submission { .. })));
        assert_eq!(controller.state(), CaptureState::ArtifactReady);
    }

    #[tokio::test]
    async fn idle_panel_is_not_submittable() {
        let controller = CaptureSessionController::new(FakeCamera::granting());
        let processor = RecordingProcessor {
            fail: false,
            received: Mutex::new(Vec::new()),
        };
        assert!(matches!(
            controller.submit(&processor).await,
            Err(CaptureError::InvalidState { .. })
        ));
        assert!(processor.received.lock().unwrap().is_empty());
    }
}
