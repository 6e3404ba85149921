//! Lucam-capture binary: initialise a camera and stream frames through the hand-off.

use anyhow::{Context, Result};
use lucam_capture::config::{Backend, CaptureConfig};
use lucam_capture::logging::setup_logging;
use lucam_capture::mock::MockDriver;
use lucam_capture::{Camera, CameraDriver, Handoff, V4L2Driver};

fn main() {
    let config = CaptureConfig::from_env();
    setup_logging(config.environment);

    if let Err(err) = run(&config) {
        tracing::error!(error = ?err, "capture failed");
        std::process::exit(1);
    }
}

fn run(config: &CaptureConfig) -> Result<()> {
    tracing::info!(
        environment = config.environment.as_str(),
        backend = ?config.backend,
        index = config.camera_index,
        "starting capture"
    );

    match config.backend {
        Backend::V4l2 => capture(Camera::new(V4L2Driver), config),
        Backend::Mock => capture(Camera::new(MockDriver::new()), config),
    }
}

fn capture<D: CameraDriver>(mut camera: Camera<D>, config: &CaptureConfig) -> Result<()> {
    camera.init(config.camera_index, &config.processing);
    if !camera.is_open() {
        anyhow::bail!("camera {} could not be opened", config.camera_index);
    }

    let display = camera.display_size();
    tracing::info!(
        camera = %camera.name(),
        window = camera.unprocessed_window_name().unwrap_or_default(),
        processed_window = camera.processed_window_name().unwrap_or_default(),
        display_width = display.width,
        display_height = display.height,
        frame_size = camera.frame_size(),
        "camera ready"
    );

    camera.start_streaming().context("failed to start streaming")?;

    let mut published = 0u32;
    let mut dropped = 0u32;
    for frame in 0..config.frame_count {
        camera.raw_image().context("failed to pull frame")?;
        match camera.convert_raw_image().context("failed to convert frame")? {
            Handoff::Published => published += 1,
            Handoff::Dropped => dropped += 1,
        }

        if let Some(image) = camera.image() {
            tracing::debug!(frame, bytes = image.len(), "frame ready");
        }

        let last = frame + 1 == config.frame_count;
        if last {
            if let Some(path) = &config.dump_path {
                camera
                    .conversion_dump(path)
                    .with_context(|| format!("failed to dump frame to {}", path.display()))?;
                tracing::info!(path = %path.display(), "converted frame dumped");
            }
        }
        camera.release_image();
    }

    camera.stop_streaming().context("failed to stop streaming")?;
    tracing::info!(published, dropped, "capture finished");
    Ok(())
}
