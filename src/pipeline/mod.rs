pub mod broadcast;
#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod pose;
pub mod processor;
#[cfg(feature = "camera-nokhwa")]
pub mod rgba_converter;
pub mod skeleton;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, CameraStream, CaptureSettings, available_cameras, start_camera_stream};
pub use pose::{PoseBackend, PoseEngine, start_pose_worker};
pub use processor::{FrameProcessor, PipelineContext, ProcessedFrame};
