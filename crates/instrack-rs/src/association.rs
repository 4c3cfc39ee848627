use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use crate::*;
use anyhow::{anyhow, Result};
use rayon::prelude::*;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What happened while processing one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    /// The processed frame.
    pub frame_index: usize,
    /// Detections that continued an existing track.
    pub matches: Vec<Match>,
    /// Tracks started by unmatched detections.
    pub created: Vec<usize>,
    /// Tracks removed from the live set because they went stale.
    pub retired: Vec<usize>,
    /// Tracks whose reconstruction was released to make room for another track.
    pub evicted: Vec<usize>,
    /// Tracks whose reconstruction was released because they stopped being eligible.
    pub abandoned: Vec<usize>,
    /// Eligible tracks that could not obtain a reconstruction this frame. They are retried on
    /// their next update.
    pub allocation_failures: Vec<usize>,
    /// Every live `(track id, reconstruction id)` pair after this frame.
    pub reconstructions: Vec<(usize, Uuid)>,
}

/// This is the multi-track association engine.
///
/// Each frame, new detections are scored against the live tracks, resolved into a one-to-one
/// assignment, and used to extend or start tracks. Stale tracks are retired and eligible tracks
/// are forwarded to the [`FusionEngine`].
///
/// # Examples
///
/// ```
/// use instrack_rs::{
///     AssociationEngine, BoundingBox, Detection, FusionEngine, FusionError, MinObservations,
///     Observation, Pose, ReconstructionHandle,
/// };
///
/// // a fusion engine that keeps no geometry at all
/// struct NullFusion;
///
/// impl FusionEngine for NullFusion {
///     fn request_reconstruction(&mut self, track_id: usize) -> Result<ReconstructionHandle, FusionError> {
///         Ok(ReconstructionHandle::new(track_id))
///     }
///     fn extend_reconstruction(&mut self, _: &mut ReconstructionHandle, _: &Observation) -> Result<(), FusionError> {
///         Ok(())
///     }
///     fn finalize_reconstruction(&mut self, _: ReconstructionHandle) {}
/// }
///
/// let mut engine = AssociationEngine::new(NullFusion);
/// engine.with_eligibility(MinObservations(2));
///
/// for frame_index in 0..3 {
///     let detection = Detection::new(
///         None,
///         BoundingBox::new(10.0 + frame_index as f32, 10.0, 50.0, 50.0),
///         0.9,
///         1,
///         Some(String::from("car")),
///         None,
///     );
///     let report = engine
///         .process_frame(frame_index, vec![detection], Pose::identity())
///         .unwrap();
///     println!("{:?}", report);
/// }
///
/// // print tracks
/// for track in engine.tracks() {
///     println!(
///         "{} {} {}",
///         track.track_id(),
///         track.has_reconstruction(),
///         track.ascii_art(),
///     );
/// }
/// assert_eq!(engine.tracks().count(), 1);
/// ```
pub struct AssociationEngine<F: FusionEngine> {
    /// Thresholds and scoring parameters.
    config: AssociationConfig,
    /// Decides when a track deserves a reconstruction.
    eligibility: Box<dyn EligibilityPolicy>,
    /// The volumetric fusion engine owning the geometry behind each handle.
    fusion: F,
    /// Every live track, keyed by id.
    tracks: BTreeMap<usize, Track>,
    /// Used to allocate identifiers to new tracks.
    next_id: usize,
    /// The last processed frame.
    last_frame: Option<usize>,
}

impl<F: FusionEngine + fmt::Debug> fmt::Debug for AssociationEngine<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationEngine")
            .field("config", &self.config)
            .field("eligibility", &self.eligibility.describe())
            .field("fusion", &self.fusion)
            .field("tracks", &self.tracks)
            .field("next_id", &self.next_id)
            .field("last_frame", &self.last_frame)
            .finish()
    }
}

impl<F: FusionEngine> Drop for AssociationEngine<F> {
    fn drop(&mut self) {
        self.retire_all();
    }
}

impl<F: FusionEngine> AssociationEngine<F> {
    /// Returns a new AssociationEngine with the default configuration and eligibility policy.
    ///
    /// # Arguments
    ///
    /// * `fusion`: The fusion engine reconstructions are requested from.
    pub fn new(fusion: F) -> AssociationEngine<F> {
        AssociationEngine {
            config: AssociationConfig::default(),
            eligibility: Box::<MinObservations>::default(),
            fusion,
            tracks: BTreeMap::new(),
            next_id: 1,
            last_frame: None,
        }
    }

    /// Set config
    pub fn with_config(&mut self, config: AssociationConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Set the eligibility policy
    pub fn with_eligibility(&mut self, policy: impl EligibilityPolicy + 'static) -> &mut Self {
        self.eligibility = Box::new(policy);
        self
    }

    /// Return the config
    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }

    /// Return the fusion engine
    pub fn fusion(&self) -> &F {
        &self.fusion
    }

    /// Return the mutable fusion engine
    pub fn fusion_mut(&mut self) -> &mut F {
        &mut self.fusion
    }

    /// Return the last processed frame
    pub fn last_frame(&self) -> Option<usize> {
        self.last_frame
    }

    /// Return the live tracks ordered by id
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Return the live track with the given id
    pub fn track(&self, track_id: usize) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn has_track(&self, track_id: usize) -> bool {
        self.tracks.contains_key(&track_id)
    }

    /// Return every live track that owns a reconstruction together with its handle
    pub fn reconstructed_tracks(&self) -> impl Iterator<Item = (&Track, &ReconstructionHandle)> {
        self.tracks
            .values()
            .filter_map(|track| track.reconstruction().map(|handle| (track, handle)))
    }

    /// Number of live reconstructions
    pub fn live_reconstructions(&self) -> usize {
        self.tracks
            .values()
            .filter(|track| track.has_reconstruction())
            .count()
    }

    /// Draws every live track on a shared timeline, one line per track.
    pub fn ascii_timeline(&self) -> String {
        let origin = self
            .tracks
            .values()
            .map(Track::start_time)
            .min()
            .unwrap_or_default();
        let width = self
            .tracks
            .values()
            .map(Track::ascii_cell_width)
            .max()
            .unwrap_or_default();

        self.tracks
            .values()
            .map(|track| {
                format!(
                    "#{:>4} {}{}",
                    track.track_id(),
                    " ".repeat(width * (track.start_time() - origin)),
                    track.ascii_art_with_width(width)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Associate one frame of detections with the live tracks.
    ///
    /// # Parameters
    ///
    /// * `frame_index`: The current frame. Must be strictly greater than the previous one.
    /// * `detections`: The detections of the current frame.
    /// * `camera_pose`: The camera pose the detections were captured from.
    ///
    /// # Errors
    ///
    /// `TrackError::FrameOutOfOrder` if `frame_index` does not follow the last processed frame.
    /// Every error is raised before any track is touched, so a failed frame leaves the engine as it
    /// was and may be retried. Allocation failures of the fusion engine are not errors.
    ///
    /// The `detection_index` of each reported match is the position in `detections`, including
    /// detections dropped for low confidence.
    #[instrument(skip_all, fields(frame = frame_index))]
    pub fn process_frame(
        &mut self,
        frame_index: usize,
        detections: Vec<Detection>,
        camera_pose: Pose,
    ) -> Result<FrameReport> {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                return Err(TrackError::FrameOutOfOrder {
                    last,
                    attempted: frame_index,
                }
                .into());
            }
        }

        let mut report = FrameReport {
            frame_index,
            ..Default::default()
        };

        // the position of each kept detection in the input
        let min_confidence = self.config.min_detection_confidence;
        let (input_indices, observations): (Vec<_>, Vec<_>) = detections
            .into_iter()
            .enumerate()
            .filter(|(_, detection)| detection.confidence() >= min_confidence)
            .map(|(input_index, detection)| {
                (
                    input_index,
                    Observation::new(frame_index, detection, camera_pose.clone()),
                )
            })
            .unzip();

        // Step 1
        // Score every detection against the tracks seen recently enough to be continued.
        let params = &self.config.matching;
        let candidate_ids = self
            .tracks
            .values()
            .filter(|track| track.frames_since_seen(frame_index) <= params.max_gap)
            .map(Track::track_id)
            .collect::<Vec<_>>();

        let tracks = &self.tracks;
        let pairs = observations
            .par_iter()
            .enumerate()
            .flat_map_iter(|(detection_index, observation)| {
                candidate_ids.iter().map(move |track_id| {
                    ScoredPair::new(
                        *track_id,
                        detection_index,
                        tracks[track_id].score_match(observation, params),
                    )
                })
            })
            .filter(|pair| pair.score > 0.0)
            .collect::<Vec<_>>();

        // Step 2
        // Resolve the scores into a one-to-one assignment.
        let threshold = self.config.acceptance_threshold;
        let assignment = match self.config.assignment {
            AssignmentStrategy::Greedy => linear_assignment::greedy_matching(
                &pairs,
                &candidate_ids,
                observations.len(),
                threshold,
            ),
            AssignmentStrategy::Optimal => linear_assignment::optimal_matching(
                &pairs,
                &candidate_ids,
                observations.len(),
                threshold,
            )?,
        };

        // Step 3
        // Validate every match before the first track is modified.
        let mut observations = observations.into_iter().map(Some).collect::<Vec<_>>();
        let mut continued = Vec::with_capacity(assignment.matches.len());
        for matched in &assignment.matches {
            let observation = observations
                .get_mut(matched.detection_index)
                .and_then(Option::take)
                .ok_or_else(|| anyhow!("detection {} assigned twice", matched.detection_index))?;
            let last = self
                .tracks
                .get(&matched.track_id)
                .map(Track::end_time)
                .ok_or_else(|| anyhow!("track {} is not live", matched.track_id))?;
            if last >= frame_index {
                return Err(TrackError::OutOfOrderObservation {
                    track_id: matched.track_id,
                    last,
                    attempted: frame_index,
                }
                .into());
            }
            continued.push((*matched, observation));
        }
        self.last_frame = Some(frame_index);

        // Step 4
        // Extend matched tracks.
        let mut updated = Vec::with_capacity(observations.len());
        for (matched, observation) in continued {
            if let Some(track) = self.tracks.get_mut(&matched.track_id) {
                track.add_frame(observation)?;
            }

            let detection_index = input_indices[matched.detection_index];
            debug!(
                track_id = matched.track_id,
                detection = detection_index,
                score = matched.score,
                "continued track"
            );
            report.matches.push(Match {
                detection_index,
                ..matched
            });
            updated.push(matched.track_id);
        }

        // Step 5
        // Start new tracks from unmatched detections.
        for position in assignment.unmatched_detections {
            if let Some(observation) = observations[position].take() {
                let track_id = self.next_track_id();
                info!(
                    track_id,
                    detection = input_indices[position],
                    class_id = observation.detection().class_id(),
                    "started track"
                );
                self.tracks.insert(track_id, Track::new(track_id, observation));
                report.created.push(track_id);
                updated.push(track_id);
            }
        }

        // Step 6
        // Retire tracks that have been unseen for too long.
        let retirement_gap = self.config.retirement_gap;
        let stale = self
            .tracks
            .values()
            .filter(|track| track.frames_since_seen(frame_index) > retirement_gap)
            .map(Track::track_id)
            .collect::<Vec<_>>();
        for track_id in stale {
            if self.retire(track_id) {
                report.retired.push(track_id);
            }
        }

        // Step 7
        // Create, extend or abandon reconstructions of the tracks touched this frame.
        for track_id in updated {
            self.sweep(track_id, &mut report);
        }

        report.reconstructions = self
            .reconstructed_tracks()
            .map(|(track, handle)| (track.track_id(), *handle.id()))
            .collect();

        Ok(report)
    }

    /// Retire a track, releasing its reconstruction first.
    ///
    /// # Returns
    ///
    /// False if no live track has this id.
    pub fn retire(&mut self, track_id: usize) -> bool {
        match self.tracks.remove(&track_id) {
            Some(mut track) => {
                let released = track.release_reconstruction(&mut self.fusion);
                info!(
                    track_id,
                    observations = track.len(),
                    released,
                    "retired track"
                );
                true
            }
            None => false,
        }
    }

    /// Retire every live track, releasing all reconstructions.
    pub fn retire_all(&mut self) -> Vec<usize> {
        let track_ids = self.tracks.keys().copied().collect::<Vec<_>>();
        track_ids
            .into_iter()
            .filter(|track_id| self.retire(*track_id))
            .collect()
    }

    fn next_track_id(&mut self) -> usize {
        let track_id = self.next_id;
        self.next_id += 1;
        track_id
    }

    /// Eligibility sweep of a single updated track.
    fn sweep(&mut self, track_id: usize, report: &mut FrameReport) {
        let Some(track) = self.tracks.get_mut(&track_id) else {
            return;
        };
        let eligible = track.eligible_for_reconstruction(self.eligibility.as_ref());

        if track.has_reconstruction() {
            if !eligible {
                track.release_reconstruction(&mut self.fusion);
                info!(
                    track_id,
                    policy = %self.eligibility.describe(),
                    "abandoned reconstruction"
                );
                report.abandoned.push(track_id);
            } else if let Err(err) = track.extend_reconstruction(&mut self.fusion) {
                warn!(track_id, %err, "failed to extend reconstruction");
            }
            return;
        }

        if !eligible {
            return;
        }

        if let Some(max_live) = self.config.max_live_reconstructions {
            if self.live_reconstructions() >= max_live {
                match self.eviction_candidate(track_id) {
                    Some(victim) => {
                        if let Some(victim_track) = self.tracks.get_mut(&victim) {
                            victim_track.release_reconstruction(&mut self.fusion);
                        }
                        info!(track_id, victim, "evicted reconstruction");
                        report.evicted.push(victim);
                    }
                    None => {
                        debug!(track_id, max_live, "no reconstruction capacity");
                        report.allocation_failures.push(track_id);
                        return;
                    }
                }
            }
        }

        match self.fusion.request_reconstruction(track_id) {
            Ok(handle) => {
                let Some(track) = self.tracks.get_mut(&track_id) else {
                    self.fusion.finalize_reconstruction(handle);
                    return;
                };
                if let Err(err) = track.attach_reconstruction(handle, &mut self.fusion) {
                    error!(track_id, %err, "rejected reconstruction");
                    return;
                }
                if let Err(err) = track.extend_reconstruction(&mut self.fusion) {
                    warn!(track_id, %err, "failed to fuse first observation");
                }
                info!(track_id, observations = track.len(), "started reconstruction");
            }
            Err(err) => {
                warn!(track_id, %err, "reconstruction allocation failed, retrying on next update");
                report.allocation_failures.push(track_id);
            }
        }
    }

    /// The reconstruction to release so that `track_id` can obtain one: the stalest holder, then
    /// the one with the fewest observations, then the newest. Only holders ranking below the
    /// requester are considered.
    fn eviction_candidate(&self, track_id: usize) -> Option<usize> {
        let priority = |track: &Track| (track.end_time(), track.len(), Reverse(track.track_id()));
        let requester = priority(self.tracks.get(&track_id)?);

        self.tracks
            .values()
            .filter(|track| track.has_reconstruction() && track.track_id() != track_id)
            .min_by_key(|track| priority(track))
            .filter(|track| priority(track) < requester)
            .map(Track::track_id)
    }
}
