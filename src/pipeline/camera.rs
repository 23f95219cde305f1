use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Instant,
};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, CameraInfo, FrameFormat, RequestedFormat,
        RequestedFormatType,
    },
};

use super::rgba_converter;
use crate::types::Frame;

const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::MJPEG,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
];

fn requested_formats(width: u32, height: u32) -> Vec<RequestedFormat<'static>> {
    let mut formats: Vec<RequestedFormat<'static>> = PREFERRED_PIXEL_FORMATS
        .iter()
        .map(|&format| {
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                CameraFormat::new_from(width, height, format, 30),
            ))
        })
        .collect();
    // Anything the driver will give us, fastest first.
    formats.push(RequestedFormat::with_formats(
        RequestedFormatType::AbsoluteHighestFrameRate,
        PREFERRED_PIXEL_FORMATS,
    ));
    formats.push(RequestedFormat::new::<RgbFormat>(RequestedFormatType::None));
    formats
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: format_camera_label(&info),
        })
        .collect())
}

fn format_camera_label(info: &CameraInfo) -> String {
    let name = info.human_name();
    if name.trim().is_empty() {
        format!("Camera {}", info.index())
    } else {
        name
    }
}

fn build_camera(settings: CaptureSettings) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats(settings.width, settings.height) {
        match Camera::new(CameraIndex::Index(settings.index), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => {
                    log::info!(
                        "camera {} opened at {:?}",
                        settings.index,
                        camera.camera_format()
                    );
                    return Ok(camera);
                }
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

pub fn start_camera_stream(settings: CaptureSettings, frame_tx: Sender<Frame>) -> Result<CameraStream> {
    // Fail fast before spawning the capture thread.
    drop(build_camera(settings)?);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut camera = match build_camera(settings) {
            Ok(cam) => cam,
            Err(err) => {
                log::error!("failed to open camera: {err:?}");
                return;
            }
        };

        while !stop_flag.load(Ordering::Relaxed) {
            let frame_start = Instant::now();
            let buffer = match camera.frame() {
                Ok(buffer) => buffer,
                Err(err) => {
                    log::warn!(
                        "camera frame read failed (after {:?}): {err:?}",
                        frame_start.elapsed()
                    );
                    continue;
                }
            };

            let frame = match rgba_converter::convert_camera_frame(&buffer) {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("failed to decode camera frame {err:?}");
                    continue;
                }
            };

            // Drop if the worker is busy, otherwise forward every frame.
            let _ = frame_tx.try_send(frame);
        }

        if let Err(err) = camera.stop_stream() {
            log::warn!("failed to stop camera stream: {err:?}");
        }
    });

    Ok(CameraStream {
        stop,
        handle: Some(handle),
    })
}
