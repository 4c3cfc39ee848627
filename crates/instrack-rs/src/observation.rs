use crate::{Detection, Pose};

/// One frame of a track: the detection together with the camera pose it was captured from.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    frame_index: usize,
    detection: Detection,
    /// The camera pose at the time when this frame was observed.
    camera_pose: Pose,
}

impl Observation {
    pub fn new(frame_index: usize, detection: Detection, camera_pose: Pose) -> Observation {
        Observation {
            frame_index,
            detection,
            camera_pose,
        }
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn detection(&self) -> &Detection {
        &self.detection
    }

    pub fn camera_pose(&self) -> &Pose {
        &self.camera_pose
    }
}
