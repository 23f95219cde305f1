use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// COCO body landmarks in the order pose models emit them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Landmark {
    Nose = 0,
    LeftEye = 1,
    RightEye = 2,
    LeftEar = 3,
    RightEar = 4,
    LeftShoulder = 5,
    RightShoulder = 6,
    LeftElbow = 7,
    RightElbow = 8,
    LeftWrist = 9,
    RightWrist = 10,
    LeftHip = 11,
    RightHip = 12,
    LeftKnee = 13,
    RightKnee = 14,
    LeftAnkle = 15,
    RightAnkle = 16,
}

impl Landmark {
    pub const COUNT: usize = 17;

    pub const ALL: [Landmark; Landmark::COUNT] = [
        Landmark::Nose,
        Landmark::LeftEye,
        Landmark::RightEye,
        Landmark::LeftEar,
        Landmark::RightEar,
        Landmark::LeftShoulder,
        Landmark::RightShoulder,
        Landmark::LeftElbow,
        Landmark::RightElbow,
        Landmark::LeftWrist,
        Landmark::RightWrist,
        Landmark::LeftHip,
        Landmark::RightHip,
        Landmark::LeftKnee,
        Landmark::RightKnee,
        Landmark::LeftAnkle,
        Landmark::RightAnkle,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Landmark::Nose => "nose",
            Landmark::LeftEye => "left_eye",
            Landmark::RightEye => "right_eye",
            Landmark::LeftEar => "left_ear",
            Landmark::RightEar => "right_ear",
            Landmark::LeftShoulder => "left_shoulder",
            Landmark::RightShoulder => "right_shoulder",
            Landmark::LeftElbow => "left_elbow",
            Landmark::RightElbow => "right_elbow",
            Landmark::LeftWrist => "left_wrist",
            Landmark::RightWrist => "right_wrist",
            Landmark::LeftHip => "left_hip",
            Landmark::RightHip => "right_hip",
            Landmark::LeftKnee => "left_knee",
            Landmark::RightKnee => "right_knee",
            Landmark::LeftAnkle => "left_ankle",
            Landmark::RightAnkle => "right_ankle",
        }
    }
}

/// Pixel-space keypoint. `(0, 0)` means the model did not see the landmark;
/// a real detection at the exact origin is indistinguishable from a miss.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub const MISSING: Keypoint = Keypoint { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Anything but the exact sentinel counts, negative values included.
    pub fn is_detected(&self) -> bool {
        self.x != 0.0 || self.y != 0.0
    }

    /// Stricter check used for drawing: both axes must be finite and positive.
    pub fn is_drawable(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }
}

/// One detected body in a single frame. The position of a person inside
/// [`Detections`] is only meaningful for that frame; the same subject can
/// show up under a different index on the next one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Person {
    pub keypoints: Vec<Keypoint>,
}

impl Person {
    pub fn new(keypoints: Vec<Keypoint>) -> Self {
        Self { keypoints }
    }

    pub fn get(&self, landmark: Landmark) -> Option<&Keypoint> {
        self.keypoints.get(landmark.index())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detections {
    pub persons: Vec<Person>,
}

impl Detections {
    pub fn new(persons: Vec<Person>) -> Self {
        Self { persons }
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }
}
