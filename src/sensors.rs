//! Camera capture.

use anyhow::{Context, Result};
use bytes::Bytes;
use rscam::{Camera, Config, ResolutionInfo};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::meter::METER;

const MJPG: &[u8] = b"MJPG";

/// Capture parameters requested from the video device.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub resolution: (u32, u32),
    pub fps: u32,
}

/// Open the device and start streaming MJPG frames.
///
/// Falls back to the largest resolution the camera reports if it rejects the
/// requested one.
pub fn open_camera(config: &CaptureConfig) -> Result<Camera> {
    let mut camera = Camera::new(&config.device)
        .with_context(|| format!("failed to open {}", config.device))?;

    if let Err(err) = camera.start(&Config {
        interval: (1, config.fps),
        resolution: config.resolution,
        format: MJPG,
        ..Default::default()
    }) {
        let fallback = max_resolution(&camera)?;
        log::warn!(
            "camera rejected {}x{} ({err}), falling back to {}x{}",
            config.resolution.0,
            config.resolution.1,
            fallback.0,
            fallback.1
        );
        camera.start(&Config {
            interval: (1, config.fps),
            resolution: fallback,
            format: MJPG,
            ..Default::default()
        })?;
    }

    Ok(camera)
}

/// Capture frames until cancelled, publishing each one as the latest frame
/// and into the viewer fan-out.
///
/// A missing or failing camera ends this task; the rest of the service keeps
/// running on the last published state.
pub fn spawn_capture(
    config: CaptureConfig,
    latest_tx: watch::Sender<Option<Bytes>>,
    viewers_tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let camera = match open_camera(&config) {
            Ok(camera) => camera,
            Err(err) => {
                log::error!("camera unavailable: {err:#}");
                return;
            }
        };
        log::info!("capturing from {}", config.device);

        while !cancel.is_cancelled() {
            match camera.capture() {
                Ok(frame) => {
                    let jpeg = Bytes::copy_from_slice(&frame[..]);
                    METER.tick_captured();
                    latest_tx.send_replace(Some(jpeg.clone()));
                    viewers_tx.send(jpeg).ok();
                }
                Err(err) => {
                    log::error!("frame capture failed: {err}");
                    return;
                }
            }
        }
        log::info!("capture stopped");
    })
}

/// Get the largest supported MJPG resolution in terms of number of pixels.
fn max_resolution(camera: &Camera) -> Result<(u32, u32)> {
    let resolution_info = camera
        .resolutions(MJPG)
        .context("failed to query camera resolutions")?;
    log::debug!("Found resolutions: {:?}", &resolution_info);

    match resolution_info {
        ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            .max_by_key(|resolution| resolution.0 * resolution.1)
            .copied(),
        ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .context("camera reports no MJPG resolution")
}
