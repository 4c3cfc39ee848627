//! Per-frame association of object instance detections into tracks for a semantic mapping
//! pipeline. Tracks that gather enough evidence are handed to a volumetric [`FusionEngine`] which
//! maintains a dense reconstruction for each of them.

mod association;
mod bounding_box;
mod config;
mod detection;
pub mod eligibility;
mod error;
pub mod iou_matching;
pub mod linear_assignment;
pub mod nn_matching;
mod observation;
mod pose;
mod reconstruction;
mod track;

pub use association::{AssociationEngine, FrameReport};
pub use bounding_box::BoundingBox;
pub use config::{AssignmentStrategy, AssociationConfig, MatchParams, MotionModel};
pub use detection::Detection;
pub use eligibility::{
    AllOf, EligibilityPolicy, MinAverageConfidence, MinDuration, MinObservations,
    MinPoseDiversity,
};
pub use error::{FusionError, TrackError};
pub use linear_assignment::{Assignment, Match, ScoredPair};
pub use observation::Observation;
pub use pose::Pose;
pub use reconstruction::{FusionEngine, ReconstructionHandle};
pub use track::Track;
