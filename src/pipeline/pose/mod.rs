pub mod common;
mod ort;

use std::{path::PathBuf, thread};

use crossbeam_channel::{Receiver, Sender};

use crate::types::{Detections, Frame};

use self::common::DecodeConfig;
use super::processor::{FrameProcessor, ProcessedFrame};

pub use self::ort::OrtPoseEngine;

/// Anything that turns a frame into per-person keypoints in frame pixels.
pub trait PoseEngine: Send + 'static {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Detections>;
}

#[derive(Clone, Debug)]
pub struct PoseBackend {
    model_path: PathBuf,
    decode: DecodeConfig,
}

impl PoseBackend {
    pub fn new(model_path: PathBuf, decode: DecodeConfig) -> Self {
        Self { model_path, decode }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path.clone()
    }

    pub fn decode_config(&self) -> DecodeConfig {
        self.decode.clone()
    }
}

pub fn start_pose_worker(
    backend: PoseBackend,
    processor: FrameProcessor,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<ProcessedFrame>,
) -> thread::JoinHandle<()> {
    log::info!("starting ORT pose worker for {}", backend.model_path.display());

    ort::start_worker(backend, processor, frame_rx, result_tx)
}

/// One frame at a time: infer, render, broadcast, hand off. Stale frames
/// queued while we were busy are dropped in favour of the newest one.
pub(crate) fn run_worker_loop<E: PoseEngine>(
    mut engine: E,
    processor: FrameProcessor,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<ProcessedFrame>,
) {
    while let Some(frame) = recv_latest_frame(&frame_rx) {
        let detections = match engine.infer(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("pose inference failed: {err:?}");
                continue;
            }
        };

        let processed = processor.process(&frame, &detections);
        log::debug!(
            "frame processed: {} persons, {} OSC messages",
            processed.persons,
            processed.messages_sent
        );
        let _ = result_tx.try_send(processed);
    }
    log::info!("frame source closed, pose worker exiting");
}

fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Option<Frame> {
    let mut frame = frame_rx.recv().ok()?;
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use crossbeam_channel::{bounded, unbounded};

    use super::*;
    use crate::{
        osc::{OscError, OscTransport},
        pipeline::{processor::PipelineContext, skeleton::LabelFont},
        types::{Keypoint, Landmark, Person},
    };

    /// Fails on odd frame widths, otherwise reports one person whose nose
    /// sits in the middle of the frame.
    struct ScriptedEngine;

    impl PoseEngine for ScriptedEngine {
        fn infer(&mut self, frame: &Frame) -> anyhow::Result<Detections> {
            if frame.width % 2 == 1 {
                return Err(anyhow!("odd frame"));
            }
            let mut keypoints = vec![Keypoint::MISSING; Landmark::COUNT];
            keypoints[Landmark::Nose.index()] =
                Keypoint::new(frame.width as f32 / 2.0, frame.height as f32 / 2.0);
            Ok(Detections::new(vec![Person::new(keypoints)]))
        }
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<(String, [f32; 2])>>>);

    impl OscTransport for Collect {
        fn send(&self, address: &str, point: [f32; 2]) -> Result<(), OscError> {
            self.0.lock().unwrap().push((address.to_string(), point));
            Ok(())
        }
    }

    fn frame(width: u32) -> Frame {
        Frame::new(vec![0u8; (width * 40 * 4) as usize], width, 40)
    }

    #[test]
    fn latest_frame_wins() {
        let (tx, rx) = unbounded();
        for width in [10, 20, 30] {
            tx.send(frame(width)).unwrap();
        }
        assert_eq!(recv_latest_frame(&rx).unwrap().width, 30);
        drop(tx);
        assert!(recv_latest_frame(&rx).is_none());
    }

    #[test]
    fn worker_skips_failed_frames_and_keeps_going() {
        let sink = Collect::default();
        let ctx = PipelineContext {
            osc_enabled: true,
            log_messages: false,
            transport: Some(Box::new(sink.clone())),
        };
        let processor = FrameProcessor::new(ctx, LabelFont::embedded().unwrap());
        let (frame_tx, frame_rx) = bounded(1);
        let (result_tx, result_rx) = unbounded();

        let handle = thread::spawn(move || {
            run_worker_loop(ScriptedEngine, processor, frame_rx, result_tx)
        });

        frame_tx.send(frame(41)).unwrap();
        frame_tx.send(frame(60)).unwrap();
        drop(frame_tx);
        handle.join().unwrap();

        let results: Vec<ProcessedFrame> = result_rx.try_iter().collect();
        assert!(!results.is_empty());
        let last = results.last().unwrap();
        assert_eq!(last.annotated.width, 60);
        assert_eq!(last.persons, 1);
        assert_eq!(last.messages_sent, 1);
        assert!(
            sink.0
                .lock()
                .unwrap()
                .iter()
                .all(|(address, point)| address == "/character/0/nose" && *point == [30.0, 20.0])
        );
    }
}
