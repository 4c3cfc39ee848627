use serde::{Deserialize, Serialize};

/// How the last known region of a track is carried forward to the frame being scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionModel {
    /// The instance is assumed not to move in image space between observations.
    #[default]
    Static,
    /// The box keeps moving with the image-space velocity observed between the last two observations.
    ConstantVelocity,
}

/// How scored (detection, track) pairs are resolved into a one-to-one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Repeatedly commit the highest remaining score.
    #[default]
    Greedy,
    /// Maximise the total score with the Kuhn-Munkres algorithm.
    Optimal,
}

/// Parameters of `Track::score_match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    /// Largest frame gap a track can bridge. Candidates further away score 0.
    pub max_gap: usize,
    /// Multiplicative penalty per frame of gap beyond the first.
    pub temporal_decay: f32,
    /// Motion model used to predict the track region.
    pub motion_model: MotionModel,
    /// Weight of the appearance similarity in `[0, 1]`. Zero disables appearance matching.
    pub appearance_weight: f32,
    /// Number of most recent track embeddings compared against a candidate.
    pub appearance_budget: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            max_gap: 5,
            temporal_decay: 0.8,
            motion_model: MotionModel::Static,
            appearance_weight: 0.25,
            appearance_budget: 10,
        }
    }
}

impl MatchParams {
    /// Set max_gap
    pub fn with_max_gap(&mut self, max_gap: usize) -> &mut Self {
        self.max_gap = max_gap;
        self
    }

    /// Set temporal_decay
    pub fn with_temporal_decay(&mut self, temporal_decay: f32) -> &mut Self {
        self.temporal_decay = temporal_decay;
        self
    }

    /// Set motion_model
    pub fn with_motion_model(&mut self, motion_model: MotionModel) -> &mut Self {
        self.motion_model = motion_model;
        self
    }

    /// Set appearance_weight
    pub fn with_appearance_weight(&mut self, appearance_weight: f32) -> &mut Self {
        self.appearance_weight = appearance_weight.clamp(0.0, 1.0);
        self
    }
}

/// Configuration of the association engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Minimum score for a (detection, track) pair to be committed.
    pub acceptance_threshold: f32,
    /// A track unseen for more than this many frames is retired.
    pub retirement_gap: usize,
    /// Detections below this confidence are ignored.
    pub min_detection_confidence: f32,
    /// Upper bound on simultaneously live reconstructions. `None` means unbounded.
    pub max_live_reconstructions: Option<usize>,
    /// Assignment strategy.
    pub assignment: AssignmentStrategy,
    /// Scoring parameters.
    pub matching: MatchParams,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.25,
            retirement_gap: 10,
            min_detection_confidence: 0.0,
            max_live_reconstructions: None,
            assignment: AssignmentStrategy::Greedy,
            matching: MatchParams::default(),
        }
    }
}

impl AssociationConfig {
    /// Set acceptance_threshold
    pub fn with_acceptance_threshold(&mut self, acceptance_threshold: f32) -> &mut Self {
        self.acceptance_threshold = acceptance_threshold;
        self
    }

    /// Set retirement_gap
    pub fn with_retirement_gap(&mut self, retirement_gap: usize) -> &mut Self {
        self.retirement_gap = retirement_gap;
        self
    }

    /// Set min_detection_confidence
    pub fn with_min_detection_confidence(&mut self, min_detection_confidence: f32) -> &mut Self {
        self.min_detection_confidence = min_detection_confidence;
        self
    }

    /// Set max_live_reconstructions
    pub fn with_max_live_reconstructions(&mut self, max_live_reconstructions: usize) -> &mut Self {
        self.max_live_reconstructions = Some(max_live_reconstructions);
        self
    }

    /// Set assignment
    pub fn with_assignment(&mut self, assignment: AssignmentStrategy) -> &mut Self {
        self.assignment = assignment;
        self
    }

    /// Set matching
    pub fn with_matching(&mut self, matching: MatchParams) -> &mut Self {
        self.matching = matching;
        self
    }
}
