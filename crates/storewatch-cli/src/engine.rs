use image::{GrayImage, RgbImage};
use storewatch_core::{imgproc, DetectParams, FaceRect, Fingerprint, FingerprintError, HaarCascade};
use storewatch_hw::Camera;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] storewatch_hw::CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] storewatch_hw::FrameError),
    #[error("cascade error: {0}")]
    Cascade(#[from] storewatch_core::CascadeError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// A detected face and its fingerprint. `fingerprint` is `None` when the
/// crop had no contrast to normalize.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub rect: FaceRect,
    pub fingerprint: Option<Fingerprint>,
}

/// Result of one camera scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub faces: Vec<DetectedFace>,
    /// Frame was too dark to search; `faces` is empty.
    pub dark: bool,
    pub width: u32,
    pub height: u32,
}

impl ScanResult {
    /// The face covering the most pixels, the one standing closest.
    pub fn largest(&self) -> Option<&DetectedFace> {
        self.faces.iter().max_by_key(|f| f.rect.area())
    }
}

/// Detect faces in a grayscale image and fingerprint each of them.
pub fn detect_faces(cascade: &HaarCascade, image: &GrayImage, params: &DetectParams) -> Vec<DetectedFace> {
    cascade
        .detect_multi_scale(image, params)
        .into_iter()
        .map(|rect| DetectedFace {
            rect,
            fingerprint: usable(rect, Fingerprint::extract(&imgproc::crop(image, rect))),
        })
        .collect()
}

/// Detect faces in a color image. The cascade runs on the grayscale
/// conversion; each fingerprint is taken from the color crop.
pub fn detect_faces_rgb(cascade: &HaarCascade, image: &RgbImage, params: &DetectParams) -> Vec<DetectedFace> {
    let gray = imgproc::rgb_to_gray(image);
    cascade
        .detect_multi_scale(&gray, params)
        .into_iter()
        .map(|rect| DetectedFace {
            rect,
            fingerprint: usable(rect, Fingerprint::extract_rgb(&imgproc::crop(image, rect))),
        })
        .collect()
}

fn usable(rect: FaceRect, result: Result<Fingerprint, FingerprintError>) -> Option<Fingerprint> {
    result
        .map_err(|e| tracing::debug!(?rect, error = %e, "face crop not fingerprinted"))
        .ok()
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Scan {
        reply: oneshot::Sender<Result<ScanResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture one frame, detect faces and fingerprint them.
    pub async fn scan(&self) -> Result<ScanResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera and loads the cascade synchronously, discards warmup
/// frames, then serves scan requests until every handle is dropped.
pub fn spawn_engine(
    camera_device: &str,
    width: u32,
    height: u32,
    cascade: HaarCascade,
    params: DetectParams,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(camera_device, width, height)?;
    tracing::info!(
        device = camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        "camera opened"
    );

    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        camera.discard_frames(warmup_frames)?;
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("storewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Scan { reply } => {
                        let result = run_scan(&camera, &cascade, &params);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn run_scan(camera: &Camera, cascade: &HaarCascade, params: &DetectParams) -> Result<ScanResult, EngineError> {
    let frame = camera.capture_frame()?;
    if frame.is_dark {
        tracing::debug!(sequence = frame.sequence, "dark frame; skipping detection");
        return Ok(ScanResult {
            faces: Vec::new(),
            dark: true,
            width: frame.width,
            height: frame.height,
        });
    }

    let image = frame.to_image()?;
    let faces = detect_faces(cascade, &image, params);
    tracing::debug!(sequence = frame.sequence, faces = faces.len(), "scan complete");

    Ok(ScanResult {
        faces,
        dark: false,
        width: frame.width,
        height: frame.height,
    })
}
