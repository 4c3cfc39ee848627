use thiserror::Error;

/// Contract violations raised by tracks and the association engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("track {track_id}: observation for frame {attempted} does not follow frame {last}")]
    OutOfOrderObservation {
        track_id: usize,
        last: usize,
        attempted: usize,
    },
    #[error("track {track_id} already owns a reconstruction")]
    ReconstructionAlreadyAttached { track_id: usize },
    #[error("frame {attempted} does not follow previously processed frame {last}")]
    FrameOutOfOrder { last: usize, attempted: usize },
    #[error("camera pose must be a 4x4 matrix, got {rows}x{cols}")]
    InvalidPose { rows: usize, cols: usize },
    #[error("camera pose is not a rigid transform: {0}")]
    NonRigidPose(&'static str),
}

/// Recoverable failures reported by a fusion engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    #[error("no reconstruction capacity left ({live} live)")]
    ResourceExhausted { live: usize },
    #[error("fusion engine failure: {0}")]
    Failed(String),
}
