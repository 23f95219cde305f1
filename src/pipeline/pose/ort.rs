use std::{path::Path, thread};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    PoseBackend, PoseEngine,
    common::{self, DecodeConfig},
    run_worker_loop,
};
use crate::{
    pipeline::processor::{FrameProcessor, ProcessedFrame},
    types::{Detections, Frame},
};

pub fn start_worker(
    backend: PoseBackend,
    processor: FrameProcessor,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<ProcessedFrame>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let model_path = backend.model_path();

        let engine = match OrtPoseEngine::new(&model_path, backend.decode_config()) {
            Ok(engine) => {
                log::info!("pose ORT backend ready using {}", model_path.display());
                engine
            }
            Err(err) => {
                log::error!("failed to load ORT pose model: {err:?}");
                return;
            }
        };

        run_worker_loop(engine, processor, frame_rx, result_tx);
    })
}

pub struct OrtPoseEngine {
    session: Session,
    decode: DecodeConfig,
}

impl OrtPoseEngine {
    pub fn new(model_path: &Path, decode: DecodeConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        Ok(Self { session, decode })
    }
}

impl PoseEngine for OrtPoseEngine {
    fn infer(&mut self, frame: &Frame) -> Result<Detections> {
        let (input, letterbox) = common::prepare_frame_with_size(frame, common::INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let raw = outputs[0].try_extract_array::<f32>()?;
        let shape = raw.shape().to_vec();
        let data = raw
            .as_slice()
            .ok_or_else(|| anyhow!("pose output not contiguous"))?;

        common::decode_pose_output(data, &shape, &letterbox, &self.decode)
    }
}
