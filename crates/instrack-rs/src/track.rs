use std::fmt::Write;
use std::hash::{Hash, Hasher};

use crate::*;
use tracing::error;

/// A detected object's track through multiple frames.
///
/// Modeled as a series of observations. There can be gaps in the frame indices, due to frames
/// where this particular object was not detected. A track always holds at least one observation.
pub struct Track {
    /// A unique track identifier.
    track_id: usize,
    /// Observations in strictly increasing frame order.
    observations: Vec<Observation>,
    /// The dense reconstruction of the object, if one has been allocated.
    reconstruction: Option<ReconstructionHandle>,
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("track_id", &self.track_id)
            .field("start_time", &self.start_time())
            .field("end_time", &self.end_time())
            .field("len", &self.len())
            .field("reconstruction", &self.reconstruction)
            .finish()
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.track_id == other.track_id
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.track_id.hash(state);
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        if let Some(handle) = &self.reconstruction {
            error!(
                track_id = self.track_id,
                handle = %handle.id(),
                "dropping track that still owns a reconstruction"
            );
            debug_assert!(
                std::thread::panicking(),
                "track {} dropped with a live reconstruction",
                self.track_id
            );
        }
    }
}

impl Track {
    /// Returns a new Track
    ///
    /// # Parameters
    ///
    /// * `track_id`: A unique track identifier.
    /// * `observation`: The observation this track originates from.
    pub fn new(track_id: usize, observation: Observation) -> Track {
        Track {
            track_id,
            observations: vec![observation],
            reconstruction: None,
        }
    }

    /// Return the identifier of the track
    pub fn track_id(&self) -> usize {
        self.track_id
    }

    /// Return the number of observations in the track
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Always false, a track is created with its first observation.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Return the observations, oldest first
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Return the observation at `position` in the stored sequence
    pub fn get_frame(&self, position: usize) -> Option<&Observation> {
        self.observations.get(position)
    }

    /// Return the most recent observation
    pub fn last_observation(&self) -> &Observation {
        &self.observations[self.observations.len() - 1]
    }

    /// Frame index of the first observation.
    pub fn start_time(&self) -> usize {
        self.observations[0].frame_index()
    }

    /// Frame index of the last observation.
    pub fn end_time(&self) -> usize {
        self.last_observation().frame_index()
    }

    /// Number of frames elapsed between the last observation and `frame_index`.
    pub fn frames_since_seen(&self, frame_index: usize) -> usize {
        frame_index.saturating_sub(self.end_time())
    }

    /// Evaluates how well `candidate` would continue this track.
    ///
    /// The score is the product of a semantic, a spatial, a temporal and an optional appearance
    /// factor, so any vetoing factor forces the result to 0.
    ///
    /// # Returns
    ///
    /// A goodness score between 0 and 1, where 0 means the candidate would not match this track at
    /// all, and 1 would be a perfect match.
    pub fn score_match(&self, candidate: &Observation, params: &MatchParams) -> f32 {
        let last = self.last_observation();

        if candidate.detection().class_id() != last.detection().class_id() {
            return 0.0;
        }

        let temporal = temporal_consistency(last.frame_index(), candidate.frame_index(), params);
        if temporal == 0.0 {
            return 0.0;
        }

        let previous = self
            .observations
            .len()
            .checked_sub(2)
            .and_then(|position| self.observations.get(position));
        let spatial = iou_matching::spatial_overlap(last, previous, candidate, params.motion_model);

        let appearance = match candidate.detection().feature() {
            Some(feature) if params.appearance_weight > 0.0 => {
                nn_matching::appearance_similarity(
                    &self.observations,
                    feature,
                    params.appearance_budget,
                )
                .map(|similarity| {
                    let weight = params.appearance_weight.clamp(0.0, 1.0);
                    (1.0 - weight) + weight * similarity
                })
                .unwrap_or(1.0)
            }
            _ => 1.0,
        };

        (spatial * temporal * appearance).clamp(0.0, 1.0)
    }

    /// Append an observation to the end of the track.
    ///
    /// # Errors
    ///
    /// `TrackError::OutOfOrderObservation` if the frame index does not strictly follow the last one.
    pub fn add_frame(&mut self, observation: Observation) -> Result<&Self, TrackError> {
        let last = self.end_time();
        if observation.frame_index() <= last {
            return Err(TrackError::OutOfOrderObservation {
                track_id: self.track_id,
                last,
                attempted: observation.frame_index(),
            });
        }

        self.observations.push(observation);
        Ok(self)
    }

    /// Returns the pose of the observation at `position` in the stored sequence relative to the
    /// first observation, i.e. `inverse(first) · observations[position]`.
    ///
    /// Note that `position` indexes the stored sequence, not the frame index. See
    /// [`Track::frame_pose_at_frame`] for lookup by frame index.
    pub fn frame_pose(&self, position: usize) -> Option<Pose> {
        let first = self.observations[0].camera_pose();
        self.observations
            .get(position)
            .map(|observation| observation.camera_pose().relative_to(first))
    }

    /// Same as [`Track::frame_pose`], looked up by frame index. `None` if the object was not
    /// observed in that frame.
    pub fn frame_pose_at_frame(&self, frame_index: usize) -> Option<Pose> {
        self.observations
            .binary_search_by_key(&frame_index, |observation| observation.frame_index())
            .ok()
            .and_then(|position| self.frame_pose(position))
    }

    /// Whether the information in this track is good enough for a 3D reconstruction.
    pub fn eligible_for_reconstruction(&self, policy: &dyn EligibilityPolicy) -> bool {
        policy.is_eligible(&self.observations)
    }

    pub fn has_reconstruction(&self) -> bool {
        self.reconstruction.is_some()
    }

    pub fn reconstruction(&self) -> Option<&ReconstructionHandle> {
        self.reconstruction.as_ref()
    }

    pub fn reconstruction_mut(&mut self) -> Option<&mut ReconstructionHandle> {
        self.reconstruction.as_mut()
    }

    /// Transfer ownership of `handle` into this track.
    ///
    /// # Errors
    ///
    /// `TrackError::ReconstructionAlreadyAttached` if the track already owns one. The rejected
    /// handle is finalized through `fusion` so it is not leaked.
    pub fn attach_reconstruction<F: FusionEngine + ?Sized>(
        &mut self,
        handle: ReconstructionHandle,
        fusion: &mut F,
    ) -> Result<(), TrackError> {
        if self.reconstruction.is_some() {
            fusion.finalize_reconstruction(handle);
            return Err(TrackError::ReconstructionAlreadyAttached {
                track_id: self.track_id,
            });
        }

        self.reconstruction = Some(handle);
        Ok(())
    }

    /// Relinquish ownership of the reconstruction, leaving the track without one.
    pub fn detach_reconstruction(&mut self) -> Option<ReconstructionHandle> {
        self.reconstruction.take()
    }

    /// Fuse the most recent observation into the reconstruction.
    ///
    /// # Returns
    ///
    /// False if the track owns no reconstruction.
    pub fn extend_reconstruction<F: FusionEngine + ?Sized>(
        &mut self,
        fusion: &mut F,
    ) -> Result<bool, FusionError> {
        let last = &self.observations[self.observations.len() - 1];
        match self.reconstruction.as_mut() {
            Some(handle) => {
                fusion.extend_reconstruction(handle, last)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Finalize the reconstruction through the fusion engine.
    ///
    /// # Returns
    ///
    /// True if a reconstruction was released.
    pub fn release_reconstruction<F: FusionEngine + ?Sized>(&mut self, fusion: &mut F) -> bool {
        match self.reconstruction.take() {
            Some(handle) => {
                fusion.finalize_reconstruction(handle);
                true
            }
            None => false,
        }
    }

    /// Draws a visual representation of this track.
    ///
    /// One three character cell per frame from the first to the last observation. For an object
    /// first seen in frame 11, then in frames 12, 13, and 16, this representation would look as
    /// follows:
    ///
    /// ```text
    /// [ 11 12 13       16]
    /// ```
    ///
    /// Cells widen from frame 100 on so that labels stay separated by at least one blank.
    pub fn ascii_art(&self) -> String {
        self.ascii_art_with_width(self.ascii_cell_width())
    }

    /// Width of one ascii cell, wide enough for every frame index of the track.
    pub fn ascii_cell_width(&self) -> usize {
        (self.end_time().to_string().len() + 1).max(3)
    }

    /// Same as [`Track::ascii_art`] with cells of `width` characters, so that several tracks can be
    /// drawn on a shared timeline. Narrower widths are widened to [`Track::ascii_cell_width`].
    pub fn ascii_art_with_width(&self, width: usize) -> String {
        let width = width.max(self.ascii_cell_width());
        let mut out = String::from("[");
        let mut frame_index = self.start_time();
        for observation in &self.observations {
            while frame_index < observation.frame_index() {
                out.push_str(&" ".repeat(width));
                frame_index += 1;
            }
            let _ = write!(out, "{:>width$}", observation.frame_index());
            frame_index += 1;
        }
        out.push(']');
        out
    }
}

/// Temporal consistency in [0.0, 1.0] of continuing a track last seen at `last` with an
/// observation at `candidate`.
///
/// A gap of one frame scores 1. Each extra frame applies `temporal_decay` and a linear taper that
/// reaches 0 past `max_gap`. Candidates at or before `last` score 0.
fn temporal_consistency(last: usize, candidate: usize, params: &MatchParams) -> f32 {
    if candidate <= last {
        return 0.0;
    }
    let gap = candidate - last;
    if gap > params.max_gap {
        return 0.0;
    }

    let extra = (gap - 1) as f32;
    let taper = 1.0 - extra / params.max_gap as f32;
    params.temporal_decay.clamp(0.0, 1.0).powf(extra) * taper
}

#[cfg(test)]
mod tests {
    use crate::reconstruction::mock::RecordingFusionEngine;
    use crate::*;
    use anyhow::Result;
    use assert_approx_eq::assert_approx_eq;

    fn observation(frame_index: usize, class_id: usize, bbox: BoundingBox, pose: Pose) -> Observation {
        Observation::new(
            frame_index,
            Detection::new(None, bbox, 1.0, class_id, None, None),
            pose,
        )
    }

    fn unit_box() -> BoundingBox {
        BoundingBox::new(10.0, 10.0, 20.0, 20.0)
    }

    fn track_at(frames: &[usize]) -> Result<Track> {
        let mut track = Track::new(7, observation(frames[0], 1, unit_box(), Pose::identity()));
        for frame_index in &frames[1..] {
            track.add_frame(observation(
                *frame_index,
                1,
                unit_box(),
                Pose::from_yaw_translation(*frame_index as f64 * 0.1, *frame_index as f64, 0.0, 1.0),
            ))?;
        }
        Ok(track)
    }

    #[test]
    fn start_and_end_time() -> Result<()> {
        let track = track_at(&[5, 7, 8])?;
        assert_eq!(track.start_time(), 5);
        assert_eq!(track.end_time(), 8);
        assert_eq!(track.len(), 3);
        assert!(!track.is_empty());
        assert_eq!(track.frames_since_seen(12), 4);
        Ok(())
    }

    #[test]
    fn ascii_art() -> Result<()> {
        let track = track_at(&[5, 7, 8])?;
        assert_eq!(track.ascii_art(), "[  5     7  8]");

        let track = track_at(&[11, 12, 13, 16])?;
        assert_eq!(track.ascii_art(), "[ 11 12 13       16]");
        assert_eq!(track.ascii_art(), track.ascii_art());
        Ok(())
    }

    #[test]
    fn ascii_art_wide_frames() -> Result<()> {
        let track = track_at(&[998, 1000, 1001])?;
        assert_eq!(track.ascii_cell_width(), 5);
        assert_eq!(track.ascii_art(), "[  998      1000 1001]");

        let track = track_at(&[5, 6])?;
        assert_eq!(track.ascii_art_with_width(4), "[   5   6]");
        assert_eq!(track.ascii_art_with_width(1), track.ascii_art());
        Ok(())
    }

    #[test]
    fn add_frame_rejects_out_of_order() -> Result<()> {
        let mut track = track_at(&[5, 7])?;

        assert_eq!(
            track
                .add_frame(observation(7, 1, unit_box(), Pose::identity()))
                .unwrap_err(),
            TrackError::OutOfOrderObservation {
                track_id: 7,
                last: 7,
                attempted: 7
            }
        );
        assert!(track
            .add_frame(observation(3, 1, unit_box(), Pose::identity()))
            .is_err());
        assert_eq!(track.len(), 2);

        track.add_frame(observation(9, 1, unit_box(), Pose::identity()))?;
        assert_eq!(track.len(), 3);
        assert_eq!(track.end_time(), 9);
        Ok(())
    }

    #[test]
    fn frame_pose() -> Result<()> {
        let track = track_at(&[5, 7, 8])?;
        assert!(track.frame_pose(0).unwrap().approx_eq(&Pose::identity(), 1e-12));

        (0..track.len()).for_each(|position| {
            let first = track.get_frame(0).unwrap().camera_pose();
            let pose = track.get_frame(position).unwrap().camera_pose();
            let expected = first.inverse().compose(pose);
            assert!(track.frame_pose(position).unwrap().approx_eq(&expected, 1e-12));
        });

        assert_eq!(track.frame_pose(track.len()), None);
        assert_eq!(track.frame_pose(100), None);
        Ok(())
    }

    #[test]
    fn frame_pose_from_moving_camera() -> Result<()> {
        let first = Pose::from_yaw_translation(0.5, 1.0, 2.0, 0.0);
        let second = Pose::from_yaw_translation(1.0, 3.0, 0.0, 1.0);
        let mut track = Track::new(3, observation(10, 1, unit_box(), first.clone()));
        track.add_frame(observation(11, 1, unit_box(), second.clone()))?;

        assert!(track.frame_pose(0).unwrap().approx_eq(&Pose::identity(), 1e-12));

        // camera moved by (2, -2, 1) and turned by 0.5, expressed in the first camera frame
        let (sin, cos) = 0.5f64.sin_cos();
        let expected = Pose::from_yaw_translation(
            0.5,
            2.0 * cos - 2.0 * sin,
            -2.0 * sin - 2.0 * cos,
            1.0,
        );
        let relative = track.frame_pose(1).unwrap();
        assert!(relative.approx_eq(&expected, 1e-12));
        assert!(!relative.approx_eq(&second.compose(&first.inverse()), 1e-3));
        assert!(first.compose(&relative).approx_eq(&second, 1e-12));
        Ok(())
    }

    #[test]
    fn frame_pose_at_frame() -> Result<()> {
        let track = track_at(&[5, 7, 8])?;
        assert_eq!(track.frame_pose_at_frame(7), track.frame_pose(1));
        assert_eq!(track.frame_pose_at_frame(6), None);
        assert!(track
            .frame_pose_at_frame(5)
            .unwrap()
            .approx_eq(&Pose::identity(), 1e-12));
        Ok(())
    }

    #[test]
    fn score_class_mismatch_is_zero() -> Result<()> {
        let track = track_at(&[5, 6])?;
        let params = MatchParams::default();

        // identical box and pose, only the class differs
        let candidate = observation(7, 2, unit_box(), Pose::identity());
        assert_eq!(track.score_match(&candidate, &params), 0.0);

        let candidate = observation(7, 1, unit_box(), Pose::identity());
        assert_approx_eq!(track.score_match(&candidate, &params), 1.0);
        Ok(())
    }

    #[test]
    fn score_decays_with_gap() -> Result<()> {
        let track = track_at(&[5])?;
        let params = MatchParams::default();

        let scores = (5..=12)
            .map(|frame_index| {
                track.score_match(
                    &observation(frame_index, 1, unit_box(), Pose::identity()),
                    &params,
                )
            })
            .collect::<Vec<_>>();

        // same frame is not a continuation, beyond max_gap (5) nothing matches
        assert_eq!(scores[0], 0.0);
        assert_approx_eq!(scores[1], 1.0);
        scores[1..=5].windows(2).for_each(|pair| assert!(pair[0] > pair[1]));
        assert!(scores[5] > 0.0);
        assert_eq!(scores[6], 0.0);
        assert_eq!(scores[7], 0.0);
        Ok(())
    }

    #[test]
    fn score_uses_spatial_overlap() -> Result<()> {
        let track = track_at(&[5])?;
        let params = MatchParams::default();

        let shifted = observation(6, 1, BoundingBox::new(20.0, 10.0, 20.0, 20.0), Pose::identity());
        assert_approx_eq!(track.score_match(&shifted, &params), 1.0 / 3.0);

        let disjoint = observation(6, 1, BoundingBox::new(100.0, 100.0, 20.0, 20.0), Pose::identity());
        assert_eq!(track.score_match(&disjoint, &params), 0.0);
        Ok(())
    }

    #[test]
    fn score_constant_velocity() -> Result<()> {
        let mut track = Track::new(1, observation(1, 0, BoundingBox::new(0.0, 0.0, 10.0, 10.0), Pose::identity()));
        track.add_frame(observation(2, 0, BoundingBox::new(10.0, 0.0, 10.0, 10.0), Pose::identity()))?;

        let candidate = observation(3, 0, BoundingBox::new(20.0, 0.0, 10.0, 10.0), Pose::identity());
        let mut params = MatchParams::default();
        assert_eq!(track.score_match(&candidate, &params), 0.0);

        params.with_motion_model(MotionModel::ConstantVelocity);
        assert_approx_eq!(track.score_match(&candidate, &params), 1.0);
        Ok(())
    }

    #[test]
    fn score_uses_appearance() -> Result<()> {
        let track = Track::new(
            1,
            Observation::new(
                1,
                Detection::new(None, unit_box(), 1.0, 0, None, Some(vec![1.0, 0.0])),
                Pose::identity(),
            ),
        );
        let candidate = |feature: Vec<f32>| {
            Observation::new(
                2,
                Detection::new(None, unit_box(), 1.0, 0, None, Some(feature)),
                Pose::identity(),
            )
        };

        let mut params = MatchParams::default();
        params.with_appearance_weight(0.5);

        assert_approx_eq!(track.score_match(&candidate(vec![1.0, 0.0]), &params), 1.0);
        assert_approx_eq!(track.score_match(&candidate(vec![0.0, 1.0]), &params), 0.5);

        params.with_appearance_weight(0.0);
        assert_approx_eq!(track.score_match(&candidate(vec![0.0, 1.0]), &params), 1.0);
        Ok(())
    }

    #[test]
    fn score_is_bounded() -> Result<()> {
        let track = track_at(&[1, 2, 3])?;
        let params = MatchParams::default();
        (0..50).for_each(|step| {
            let candidate = observation(
                4 + step % 7,
                1,
                BoundingBox::new(step as f32, (step * 2) as f32, 20.0, 15.0),
                Pose::identity(),
            );
            let score = track.score_match(&candidate, &params);
            assert!((0.0..=1.0).contains(&score));
        });
        Ok(())
    }

    #[test]
    fn eligibility() -> Result<()> {
        let track = track_at(&[5, 7])?;
        assert!(track.eligible_for_reconstruction(&MinObservations(2)));
        assert!(!track.eligible_for_reconstruction(&MinObservations::default()));
        assert!(track.eligible_for_reconstruction(&|observations: &[Observation]| {
            observations.len() == 2
        }));
        Ok(())
    }

    #[test]
    fn reconstruction_ownership() -> Result<()> {
        let mut fusion = RecordingFusionEngine::default();
        let mut track = track_at(&[5])?;
        assert!(!track.has_reconstruction());
        assert!(!track.release_reconstruction(&mut fusion));

        let handle = fusion.request_reconstruction(track.track_id())?;
        let handle_id = *handle.id();
        track.attach_reconstruction(handle, &mut fusion)?;
        assert!(track.has_reconstruction());
        assert_eq!(track.reconstruction().map(|handle| *handle.id()), Some(handle_id));

        // a second attach is refused and the extra handle is not leaked
        let extra = fusion.request_reconstruction(track.track_id())?;
        assert_eq!(
            track.attach_reconstruction(extra, &mut fusion),
            Err(TrackError::ReconstructionAlreadyAttached { track_id: 7 })
        );
        assert_eq!(fusion.log.borrow().live, 1);

        let detached = track.detach_reconstruction().unwrap();
        assert!(!track.has_reconstruction());
        assert_eq!(*detached.id(), handle_id);

        track.attach_reconstruction(detached, &mut fusion)?;
        assert!(track.release_reconstruction(&mut fusion));
        assert!(!track.has_reconstruction());
        assert_eq!(fusion.log.borrow().live, 0);
        assert_eq!(fusion.log.borrow().finalized.get(&handle_id), Some(&1));
        Ok(())
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "dropped with a live reconstruction")]
    fn dropping_live_reconstruction_panics() {
        let mut fusion = RecordingFusionEngine::default();
        let mut track = Track::new(4, observation(1, 1, unit_box(), Pose::identity()));
        let handle = fusion.request_reconstruction(4).unwrap();
        track.attach_reconstruction(handle, &mut fusion).unwrap();
        drop(track);
    }
}
