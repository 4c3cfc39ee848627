//! Policies deciding whether a track carries enough evidence to justify a dense reconstruction.
//!
//! A policy is any type implementing [`EligibilityPolicy`], including plain closures over the
//! observation slice. Policies compose with [`AllOf`].

use crate::Observation;
use std::fmt;

/// Decides whether the observations of a track justify (continuing) a reconstruction.
pub trait EligibilityPolicy: Send + Sync {
    /// Returns true if a reconstruction should exist for a track with these observations.
    fn is_eligible(&self, observations: &[Observation]) -> bool;

    /// A short human readable description used in logs.
    fn describe(&self) -> String {
        String::from("custom")
    }
}

impl<F> EligibilityPolicy for F
where
    F: Fn(&[Observation]) -> bool + Send + Sync,
{
    fn is_eligible(&self, observations: &[Observation]) -> bool {
        self(observations)
    }
}

/// Requires a minimum number of observations in the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinObservations(pub usize);

impl Default for MinObservations {
    fn default() -> Self {
        MinObservations(3)
    }
}

impl EligibilityPolicy for MinObservations {
    fn is_eligible(&self, observations: &[Observation]) -> bool {
        observations.len() >= self.0
    }

    fn describe(&self) -> String {
        format!("at least {} observations", self.0)
    }
}

/// Requires the track to span a minimum number of frames, first and last inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinDuration(pub usize);

impl EligibilityPolicy for MinDuration {
    fn is_eligible(&self, observations: &[Observation]) -> bool {
        match (observations.first(), observations.last()) {
            (Some(first), Some(last)) => last.frame_index() - first.frame_index() + 1 >= self.0,
            _ => false,
        }
    }

    fn describe(&self) -> String {
        format!("spanning at least {} frames", self.0)
    }
}

/// Some observation was captured from a camera pose sufficiently different from the first one,
/// either by translation (same unit as the poses) or by rotation (radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinPoseDiversity {
    pub translation: f64,
    pub rotation: f64,
}

impl EligibilityPolicy for MinPoseDiversity {
    fn is_eligible(&self, observations: &[Observation]) -> bool {
        let Some(first) = observations.first() else {
            return false;
        };
        observations.iter().skip(1).any(|observation| {
            let pose = observation.camera_pose();
            pose.translation_distance(first.camera_pose()) >= self.translation
                || pose.rotation_angle(first.camera_pose()) >= self.rotation
        })
    }

    fn describe(&self) -> String {
        format!(
            "moved at least {} or turned at least {} rad",
            self.translation, self.rotation
        )
    }
}

/// Requires a minimum average detection confidence across the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinAverageConfidence(pub f32);

impl EligibilityPolicy for MinAverageConfidence {
    fn is_eligible(&self, observations: &[Observation]) -> bool {
        if observations.is_empty() {
            return false;
        }
        let total: f32 = observations
            .iter()
            .map(|observation| observation.detection().confidence())
            .sum();
        total / observations.len() as f32 >= self.0
    }

    fn describe(&self) -> String {
        format!("average confidence at least {}", self.0)
    }
}

/// Conjunction of policies. An empty conjunction is always eligible.
#[derive(Default)]
pub struct AllOf {
    policies: Vec<Box<dyn EligibilityPolicy>>,
}

impl AllOf {
    pub fn new() -> AllOf {
        AllOf::default()
    }

    /// Add another policy that must also hold
    pub fn and(mut self, policy: impl EligibilityPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }
}

impl fmt::Debug for AllOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllOf")
            .field("policies", &self.describe())
            .finish()
    }
}

impl EligibilityPolicy for AllOf {
    fn is_eligible(&self, observations: &[Observation]) -> bool {
        self.policies
            .iter()
            .all(|policy| policy.is_eligible(observations))
    }

    fn describe(&self) -> String {
        self.policies
            .iter()
            .map(|policy| policy.describe())
            .collect::<Vec<_>>()
            .join(" and ")
    }
}
