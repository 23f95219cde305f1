use crate::{
    osc::OscTransport,
    types::{Detections, Landmark},
};

/// `/character/{person}/{landmark}`, or `point_{i}` past the named table.
pub fn keypoint_address(person: usize, position: usize) -> String {
    match Landmark::from_index(position) {
        Some(landmark) => format!("/character/{person}/{}", landmark.name()),
        None => format!("/character/{person}/point_{position}"),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BroadcastOptions {
    pub enabled: bool,
    pub log_messages: bool,
}

/// Sends one message per detected keypoint and returns how many went out.
/// A transport error drops the rest of this frame's messages.
pub fn broadcast(
    detections: &Detections,
    transport: &dyn OscTransport,
    options: BroadcastOptions,
) -> usize {
    if !options.enabled || detections.is_empty() {
        return 0;
    }

    let mut sent = 0;
    for (person_idx, person) in detections.persons.iter().enumerate() {
        for (position, kp) in person.keypoints.iter().enumerate() {
            if !kp.is_detected() {
                continue;
            }
            let address = keypoint_address(person_idx, position);
            if let Err(err) = transport.send(&address, [kp.x, kp.y]) {
                log::warn!("OSC broadcast abandoned for this frame after {sent} messages: {err}");
                return sent;
            }
            if options.log_messages {
                log::info!("sending OSC: {address} [{}, {}]", kp.x, kp.y);
            }
            sent += 1;
        }
    }
    sent
}
