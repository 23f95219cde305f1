use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};

use crate::{
    cli::{ImageArgs, RunArgs},
    config::{AppConfig, OscConfig},
    model_download::{ModelDownloadEvent, default_pose_model_path, ensure_pose_model_ready},
    osc::{OscTransport, UdpOscTransport},
    pipeline::{
        FrameProcessor, PipelineContext,
        pose::{OrtPoseEngine, PoseEngine},
        skeleton::LabelFont,
    },
    types::Frame,
};

const FPS_INTERVAL: Duration = Duration::from_secs(1);

/// Frames per second over windows of a little more than a second.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
        }
    }

    /// Counts one frame and returns the rate once the window has passed.
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed <= FPS_INTERVAL {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

fn model_path(config: &AppConfig) -> PathBuf {
    config
        .model
        .path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_pose_model_path)
}

fn prepare_model(config: &AppConfig) -> Result<PathBuf> {
    let path = model_path(config);
    ensure_pose_model_ready(&path, |event| {
        if let ModelDownloadEvent::Started { total } = event {
            log::info!("fetching pose model ({total:?} bytes)");
        }
    })?;
    Ok(path)
}

fn label_font(config: &AppConfig) -> Result<LabelFont> {
    LabelFont::load(config.render.label_font.as_deref().map(Path::new))
}

fn build_processor(osc: &OscConfig, font: LabelFont) -> Result<FrameProcessor> {
    let transport: Option<Box<dyn OscTransport>> = if osc.enabled {
        let udp = UdpOscTransport::new(&osc.host, osc.port)
            .with_context(|| format!("invalid OSC target {}:{}", osc.host, osc.port))?;
        Some(Box::new(udp))
    } else {
        None
    };

    let ctx = PipelineContext {
        osc_enabled: osc.enabled,
        log_messages: osc.log_messages,
        transport,
    };
    Ok(FrameProcessor::new(ctx, font))
}

pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba.clone())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(Frame::new(image.into_raw(), width, height))
}

pub fn run_image(args: ImageArgs) -> Result<()> {
    let config = args.resolve_config()?;
    let path = prepare_model(&config)?;
    let processor = build_processor(&config.osc, label_font(&config)?)?;
    let mut engine = OrtPoseEngine::new(&path, config.model.decode_config())?;

    let frame = load_frame(&args.input)?;
    let detections = engine.infer(&frame)?;
    let processed = processor.process(&frame, &detections);

    for (idx, (x, y)) in &processed.stats.labels {
        println!("#{idx} centroid at ({x}, {y})");
    }
    println!(
        "{} person(s), {} OSC message(s) sent",
        processed.persons, processed.messages_sent
    );

    save_frame(&processed.annotated, &args.output)?;
    println!("annotated image written to {}", args.output.display());
    Ok(())
}

#[cfg(feature = "camera-nokhwa")]
pub fn list_cameras() -> Result<()> {
    let cameras = crate::pipeline::available_cameras()?;
    if cameras.is_empty() {
        println!("no cameras found");
    }
    for camera in cameras {
        println!("{}: {}", camera.index, camera.label);
    }
    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn list_cameras() -> Result<()> {
    anyhow::bail!("built without camera support (enable the camera-nokhwa feature)")
}

#[cfg(feature = "camera-nokhwa")]
pub fn run_live(args: RunArgs) -> Result<()> {
    use crossbeam_channel::bounded;

    use crate::pipeline::{CaptureSettings, PoseBackend, start_camera_stream, start_pose_worker};

    let config = args.resolve_config()?;
    let path = prepare_model(&config)?;
    let processor = build_processor(&config.osc, label_font(&config)?)?;
    if processor.osc_active() {
        log::info!("OSC enabled: {}:{}", config.osc.host, config.osc.port);
    }

    let (frame_tx, frame_rx) = bounded(1);
    let (result_tx, result_rx) = bounded(1);

    let backend = PoseBackend::new(path, config.model.decode_config());
    let worker = start_pose_worker(backend, processor, frame_rx, result_tx);

    let camera = start_camera_stream(
        CaptureSettings {
            index: config.camera.index,
            width: config.camera.width,
            height: config.camera.height,
        },
        frame_tx,
    )?;

    let mut fps = FpsCounter::new(Instant::now());
    let mut processed_frames: u64 = 0;
    let outcome = loop {
        let processed = match result_rx.recv() {
            Ok(processed) => processed,
            Err(_) => break Err(anyhow!("pose worker stopped unexpectedly")),
        };
        processed_frames += 1;

        if let Some(rate) = fps.tick(Instant::now()) {
            log::info!(
                "FPS: {rate:.1} ({} persons, {:?} capture-to-overlay)",
                processed.persons,
                processed.annotated.timestamp.elapsed()
            );
            if let Some(preview) = &args.preview {
                if let Err(err) = save_frame(&processed.annotated, preview) {
                    log::warn!("failed to write preview: {err:?}");
                }
            }
        }

        if args.max_frames.is_some_and(|max| processed_frames >= max) {
            log::info!("processed {processed_frames} frames, stopping");
            break Ok(());
        }
    };

    camera.stop();
    drop(result_rx);
    if worker.join().is_err() {
        log::error!("pose worker panicked");
    }
    outcome
}

#[cfg(not(feature = "camera-nokhwa"))]
pub fn run_live(_args: RunArgs) -> Result<()> {
    anyhow::bail!("built without camera support (enable the camera-nokhwa feature)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn font() -> LabelFont {
        LabelFont::embedded().unwrap()
    }

    #[test]
    fn configured_label_font_must_exist() {
        let mut config = AppConfig::default();
        assert!(label_font(&config).is_ok());
        config.render.label_font = Some("missing/label.ttf".to_string());
        assert!(label_font(&config).is_err());
    }

    #[test]
    fn fps_reports_after_a_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        for i in 1..=9 {
            assert_eq!(fps.tick(start + Duration::from_millis(100 * i)), None);
        }
        let rate = fps.tick(start + Duration::from_millis(1250)).unwrap();
        assert!((rate - 8.0).abs() < 1e-3);
        // Window restarts after each report.
        assert_eq!(fps.tick(start + Duration::from_millis(1300)), None);
    }

    #[test]
    fn exactly_one_second_is_not_enough() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(start);
        assert_eq!(fps.tick(start + FPS_INTERVAL), None);
    }

    #[test]
    fn model_path_prefers_configured_value() {
        let mut config = AppConfig::default();
        assert_eq!(model_path(&config), default_pose_model_path());
        config.model.path = Some("elsewhere/pose.onnx".to_string());
        assert_eq!(model_path(&config), PathBuf::from("elsewhere/pose.onnx"));
    }

    #[test]
    fn disabled_osc_builds_no_transport() {
        let processor = build_processor(&OscConfig::default(), font()).unwrap();
        assert!(!processor.osc_active());
    }

    #[test]
    fn enabled_osc_on_loopback_is_active() {
        let osc = OscConfig {
            enabled: true,
            ..OscConfig::default()
        };
        assert!(build_processor(&osc, font()).unwrap().osc_active());
    }

    #[test]
    fn frames_survive_a_png_round_trip() {
        let dir = std::env::temp_dir().join(format!("pose-relay-console-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("frame.png");

        let rgba: Vec<u8> = (0..4 * 3 * 4).map(|v| v as u8).collect();
        let frame = Frame::new(rgba.clone(), 4, 3);
        save_frame(&frame, &path).unwrap();
        let loaded = load_frame(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (4, 3));
        assert_eq!(loaded.rgba, rgba);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn mismatched_buffer_is_not_saved() {
        let frame = Frame::new(vec![0u8; 10], 4, 3);
        assert!(save_frame(&frame, Path::new("never-written.png")).is_err());
    }
}
