use anyhow::{anyhow, Result};
use fixedbitset::FixedBitSet;
use pathfinding::prelude::{kuhn_munkres, Matrix};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::trace;

/// Scores are scaled by this constant to convert from f32 [0.0..1.0] to i64 which satisfies the
/// `Ord` requirement of the Kuhn-Munkres solver.
const SCORE_SCALE: f32 = 1_000_000.0;

/// The score of continuing track `track_id` with detection `detection_index`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub track_id: usize,
    pub detection_index: usize,
    pub score: f32,
}

impl ScoredPair {
    pub fn new(track_id: usize, detection_index: usize, score: f32) -> ScoredPair {
        ScoredPair {
            track_id,
            detection_index,
            score,
        }
    }

    /// Whether the pair may be committed at all.
    fn admissible(&self, threshold: f32) -> bool {
        self.score > 0.0 && self.score >= threshold
    }
}

/// A committed (track, detection) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub track_id: usize,
    pub detection_index: usize,
    pub score: f32,
}

impl From<ScoredPair> for Match {
    fn from(pair: ScoredPair) -> Self {
        Match {
            track_id: pair.track_id,
            detection_index: pair.detection_index,
            score: pair.score,
        }
    }
}

/// The outcome of resolving one frame of scored pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// Committed pairs, one per track and per detection at most.
    pub matches: Vec<Match>,
    /// Candidate tracks that received no detection, ascending.
    pub unmatched_tracks: Vec<usize>,
    /// Detections that continue no track, ascending.
    pub unmatched_detections: Vec<usize>,
}

impl Assignment {
    fn from_matches(matches: Vec<Match>, track_ids: &[usize], detection_count: usize) -> Self {
        let mut matched_detections = FixedBitSet::with_capacity(detection_count);
        matches
            .iter()
            .for_each(|m| matched_detections.insert(m.detection_index));

        let mut unmatched_tracks = track_ids
            .iter()
            .copied()
            .filter(|track_id| !matches.iter().any(|m| m.track_id == *track_id))
            .collect::<Vec<_>>();
        unmatched_tracks.sort_unstable();

        let mut unmatched_detections = FixedBitSet::with_capacity(detection_count);
        unmatched_detections.insert_range(..);
        unmatched_detections.difference_with(&matched_detections);

        Assignment {
            matches,
            unmatched_tracks,
            unmatched_detections: unmatched_detections.ones().collect(),
        }
    }
}

/// Highest score first, then lower track id, then lower detection index.
fn priority(a: &ScoredPair, b: &ScoredPair) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(a.track_id.cmp(&b.track_id))
        .then(a.detection_index.cmp(&b.detection_index))
}

/// Solve the assignment greedily.
///
/// Repeatedly commits the remaining pair with the highest score at or above `threshold` and
/// removes both its track and its detection from further consideration.
///
/// # Parameters
///
/// * `pairs`: Scored (track, detection) pairs. Pairs not listed are never matched.
/// * `track_ids`: All candidate tracks of this frame.
/// * `detection_count`: Number of detections in this frame.
/// * `threshold`: Acceptance threshold. Pairs scoring 0 are never committed.
pub fn greedy_matching(
    pairs: &[ScoredPair],
    track_ids: &[usize],
    detection_count: usize,
    threshold: f32,
) -> Assignment {
    let track_positions = track_ids
        .iter()
        .enumerate()
        .map(|(position, track_id)| (*track_id, position))
        .collect::<HashMap<_, _>>();

    let mut candidates = pairs
        .iter()
        .filter(|pair| pair.admissible(threshold))
        .filter(|pair| pair.detection_index < detection_count)
        .filter(|pair| track_positions.contains_key(&pair.track_id))
        .copied()
        .collect::<Vec<_>>();
    candidates.sort_by(priority);

    let mut taken_tracks = FixedBitSet::with_capacity(track_ids.len());
    let mut taken_detections = FixedBitSet::with_capacity(detection_count);
    let mut matches = Vec::with_capacity(track_ids.len().min(detection_count));

    for pair in candidates {
        let track_position = track_positions[&pair.track_id];
        if taken_tracks[track_position] || taken_detections[pair.detection_index] {
            trace!(
                track_id = pair.track_id,
                detection = pair.detection_index,
                score = pair.score,
                "pair already resolved"
            );
            continue;
        }
        taken_tracks.insert(track_position);
        taken_detections.insert(pair.detection_index);
        matches.push(Match::from(pair));
    }

    Assignment::from_matches(matches, track_ids, detection_count)
}

/// Solve the assignment optimally, maximising the total score with the Kuhn-Munkres (aka
/// hungarian) algorithm. Pairs below `threshold` are treated as impossible.
///
/// # Parameters
///
/// See [`greedy_matching`].
pub fn optimal_matching(
    pairs: &[ScoredPair],
    track_ids: &[usize],
    detection_count: usize,
    threshold: f32,
) -> Result<Assignment> {
    if track_ids.is_empty() || detection_count == 0 {
        return Ok(Assignment::from_matches(vec![], track_ids, detection_count));
    }

    let track_positions = track_ids
        .iter()
        .enumerate()
        .map(|(position, track_id)| (*track_id, position))
        .collect::<HashMap<_, _>>();

    let mut scores = HashMap::<(usize, usize), ScoredPair>::new();
    pairs
        .iter()
        .filter(|pair| pair.admissible(threshold))
        .filter(|pair| pair.detection_index < detection_count)
        .for_each(|pair| {
            if let Some(position) = track_positions.get(&pair.track_id) {
                scores.insert((*position, pair.detection_index), *pair);
            }
        });

    // the solver requires no more rows than columns
    let transposed = track_ids.len() > detection_count;
    let (rows, columns) = if transposed {
        (detection_count, track_ids.len())
    } else {
        (track_ids.len(), detection_count)
    };

    let weights = (0..rows)
        .flat_map(|row| (0..columns).map(move |column| (row, column)))
        .map(|(row, column)| {
            let key = if transposed {
                (column, row)
            } else {
                (row, column)
            };
            scores
                .get(&key)
                .map(|pair| (pair.score * SCORE_SCALE) as i64)
                .unwrap_or(0)
        })
        .collect::<Vec<_>>();
    let weights = Matrix::from_vec(rows, columns, weights)
        .map_err(|err| anyhow!("invalid score matrix: {err:?}"))?;

    let (_, assigned) = kuhn_munkres(&weights);

    let mut matches = assigned
        .into_iter()
        .enumerate()
        .filter_map(|(row, column)| {
            let key = if transposed {
                (column, row)
            } else {
                (row, column)
            };
            scores.get(&key).copied().map(Match::from)
        })
        .collect::<Vec<_>>();
    matches.sort_by(|a, b| {
        priority(
            &ScoredPair::new(a.track_id, a.detection_index, a.score),
            &ScoredPair::new(b.track_id, b.detection_index, b.score),
        )
    });

    Ok(Assignment::from_matches(matches, track_ids, detection_count))
}

#[cfg(test)]
mod tests {
    use crate::linear_assignment::*;
    use anyhow::Result;

    fn pairs(scores: &[(usize, usize, f32)]) -> Vec<ScoredPair> {
        scores
            .iter()
            .map(|(track_id, detection_index, score)| {
                ScoredPair::new(*track_id, *detection_index, *score)
            })
            .collect()
    }

    #[test]
    fn greedy_highest_score_wins() {
        // two detections compete for track 4
        let assignment = greedy_matching(&pairs(&[(4, 0, 0.6), (4, 1, 0.9)]), &[4], 2, 0.3);

        assert_eq!(
            assignment.matches,
            vec![Match {
                track_id: 4,
                detection_index: 1,
                score: 0.9
            }]
        );
        assert!(assignment.unmatched_tracks.is_empty());
        assert_eq!(assignment.unmatched_detections, vec![0]);
    }

    #[test]
    fn greedy_threshold() {
        let assignment = greedy_matching(
            &pairs(&[(1, 0, 0.2), (2, 1, 0.5), (3, 2, 0.0)]),
            &[1, 2, 3],
            3,
            0.0,
        );
        assert_eq!(assignment.matches.len(), 2);

        let assignment = greedy_matching(
            &pairs(&[(1, 0, 0.2), (2, 1, 0.5), (3, 2, 0.0)]),
            &[1, 2, 3],
            3,
            0.3,
        );
        assert_eq!(
            assignment.matches,
            vec![Match {
                track_id: 2,
                detection_index: 1,
                score: 0.5
            }]
        );
        assert_eq!(assignment.unmatched_tracks, vec![1, 3]);
        assert_eq!(assignment.unmatched_detections, vec![0, 2]);
    }

    #[test]
    fn greedy_ties_prefer_lower_track_id() {
        let assignment = greedy_matching(&pairs(&[(9, 0, 0.5), (3, 0, 0.5)]), &[9, 3], 1, 0.1);
        assert_eq!(assignment.matches[0].track_id, 3);
        assert_eq!(assignment.unmatched_tracks, vec![9]);
    }

    #[test]
    fn greedy_vs_optimal() -> Result<()> {
        // greedy takes (1, 0) first and strands detection 1, optimal pairs both
        let scored = pairs(&[(1, 0, 0.9), (1, 1, 0.8), (2, 0, 0.7)]);

        let greedy = greedy_matching(&scored, &[1, 2], 2, 0.5);
        assert_eq!(greedy.matches.len(), 1);
        assert_eq!(greedy.unmatched_detections, vec![1]);

        let optimal = optimal_matching(&scored, &[1, 2], 2, 0.5)?;
        assert_eq!(
            optimal.matches,
            vec![
                Match {
                    track_id: 1,
                    detection_index: 1,
                    score: 0.8
                },
                Match {
                    track_id: 2,
                    detection_index: 0,
                    score: 0.7
                },
            ]
        );
        assert!(optimal.unmatched_tracks.is_empty());
        assert!(optimal.unmatched_detections.is_empty());
        Ok(())
    }

    #[test]
    fn optimal_more_tracks_than_detections() -> Result<()> {
        let scored = pairs(&[(1, 0, 0.4), (2, 0, 0.6), (3, 0, 0.1)]);
        let assignment = optimal_matching(&scored, &[1, 2, 3], 1, 0.2)?;

        assert_eq!(assignment.matches.len(), 1);
        assert_eq!(assignment.matches[0].track_id, 2);
        assert_eq!(assignment.unmatched_tracks, vec![1, 3]);
        assert!(assignment.unmatched_detections.is_empty());
        Ok(())
    }

    #[test]
    fn optimal_ignores_inadmissible() -> Result<()> {
        let scored = pairs(&[(1, 0, 0.1), (2, 1, 0.05)]);
        let assignment = optimal_matching(&scored, &[1, 2], 3, 0.2)?;

        assert!(assignment.matches.is_empty());
        assert_eq!(assignment.unmatched_tracks, vec![1, 2]);
        assert_eq!(assignment.unmatched_detections, vec![0, 1, 2]);

        let empty = optimal_matching(&scored, &[], 3, 0.2)?;
        assert_eq!(empty.unmatched_detections, vec![0, 1, 2]);
        Ok(())
    }
}
