use crate::{
    osc::OscTransport,
    types::{Detections, Frame},
};

use super::{
    broadcast::{BroadcastOptions, broadcast},
    skeleton::{self, LabelFont, RenderStats},
};

/// Everything the per-frame core needs from the outside world. Owned by the
/// pipeline worker; nothing in here is shared with the capture thread.
pub struct PipelineContext {
    pub osc_enabled: bool,
    pub log_messages: bool,
    pub transport: Option<Box<dyn OscTransport>>,
}

impl PipelineContext {
    pub fn display_only() -> Self {
        Self {
            osc_enabled: false,
            log_messages: false,
            transport: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    pub annotated: Frame,
    pub stats: RenderStats,
    pub persons: usize,
    pub messages_sent: usize,
}

pub struct FrameProcessor {
    ctx: PipelineContext,
    font: LabelFont,
}

impl FrameProcessor {
    pub fn new(ctx: PipelineContext, font: LabelFont) -> Self {
        if ctx.osc_enabled && ctx.transport.is_none() {
            log::warn!("OSC enabled without a transport; keypoints will not be sent");
        }
        Self { ctx, font }
    }

    pub fn osc_active(&self) -> bool {
        self.ctx.osc_enabled && self.ctx.transport.is_some()
    }

    /// Renders, then broadcasts. Never fails: a broken person or a dead
    /// transport only costs this frame's annotations or messages.
    pub fn process(&self, frame: &Frame, detections: &Detections) -> ProcessedFrame {
        let annotated = skeleton::render(frame, detections, &self.font);

        let messages_sent = match self.ctx.transport.as_deref() {
            Some(transport) => broadcast(
                detections,
                transport,
                BroadcastOptions {
                    enabled: self.ctx.osc_enabled,
                    log_messages: self.ctx.log_messages,
                },
            ),
            None => 0,
        };

        ProcessedFrame {
            annotated: annotated.frame,
            stats: annotated.stats,
            persons: detections.len(),
            messages_sent,
        }
    }
}
