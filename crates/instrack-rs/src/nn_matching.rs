use crate::Observation;
use ndarray::*;

/// Returns `x` scaled to unit length, or `None` for a zero vector.
fn normalize(x: ArrayView1<f32>) -> Option<Array1<f32>> {
    let norm = x.dot(&x).sqrt();
    if norm > f32::EPSILON {
        Some(x.mapv(|v| v / norm))
    } else {
        None
    }
}

/// Compute the cosine distance between each sample in `x` and the query `y`.
///
/// # Parameters
///
/// * `x`: A matrix of N non-normalized row-vectors (sample points).
/// * `y`: A non-normalized query vector.
///
/// # Returns
///
/// The smallest cosine distance in [0.0, 2.0] from `y` to any sample in `x`, or `None` when no sample is comparable.
pub fn cosine_distance(x: &Array2<f32>, y: &Array1<f32>) -> Option<f32> {
    if x.ncols() != y.len() {
        return None;
    }
    let y_norm = normalize(y.view())?;

    x.rows()
        .into_iter()
        .filter_map(normalize)
        .map(|x_norm| 1.0 - x_norm.dot(&y_norm))
        .reduce(f32::min)
}

/// Appearance similarity in [0.0, 1.0] between a candidate embedding and the most recent
/// embeddings stored on a track.
///
/// # Parameters
///
/// * `observations`: The track observations, oldest first.
/// * `feature`: The candidate embedding.
/// * `budget`: How many of the most recent embeddings are compared.
///
/// # Returns
///
/// `None` if either side carries no embedding, so appearance cannot contribute.
pub fn appearance_similarity(
    observations: &[Observation],
    feature: &Array1<f32>,
    budget: usize,
) -> Option<f32> {
    let samples = observations
        .iter()
        .rev()
        .filter_map(|observation| observation.detection().feature())
        .filter(|sample| sample.len() == feature.len())
        .take(budget)
        .map(|sample| sample.view())
        .collect::<Vec<_>>();

    if samples.is_empty() {
        return None;
    }

    let gallery = stack(Axis(0), &samples).ok()?;
    cosine_distance(&gallery, feature).map(|distance| (1.0 - distance).clamp(0.0, 1.0))
}
