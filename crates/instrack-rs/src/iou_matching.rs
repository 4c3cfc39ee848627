use crate::*;
use ndarray::*;

/// Compute intersection over union of two boxes.
///
/// # Returns
///
/// The intersection over union in [0.0, 1.0]. Degenerate (zero area) boxes yield 0.
pub fn intersection_over_union(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let area_intersection = a.intersection(b).map(|i| i.area()).unwrap_or(0.0);
    let area_union = a.area() + b.area() - area_intersection;

    if area_union <= 0.0 {
        0.0
    } else {
        (area_intersection / area_union).clamp(0.0, 1.0)
    }
}

/// Compute intersection over union of two instance masks.
///
/// # Returns
///
/// `None` if the masks do not share the same shape (they were taken at different resolutions), else the IoU in [0.0, 1.0].
pub fn mask_intersection_over_union(a: &Array2<bool>, b: &Array2<bool>) -> Option<f32> {
    if a.dim() != b.dim() {
        return None;
    }

    let (intersection, union) = Zip::from(a).and(b).fold((0usize, 0usize), |(i, u), &x, &y| {
        (i + usize::from(x && y), u + usize::from(x || y))
    });

    if union == 0 {
        Some(0.0)
    } else {
        Some(intersection as f32 / union as f32)
    }
}

/// Predict where the region of `last` lies at `frame_index`.
///
/// # Parameters
///
/// * `last`: The most recent observation of the track.
/// * `previous`: The observation before `last`, if any. Required by `MotionModel::ConstantVelocity`.
/// * `frame_index`: The frame to predict for.
/// * `motion_model`: How the box is carried forward.
pub fn predict_bbox(
    last: &Observation,
    previous: Option<&Observation>,
    frame_index: usize,
    motion_model: MotionModel,
) -> BoundingBox {
    let bbox = *last.detection().bbox();
    match (motion_model, previous) {
        (MotionModel::ConstantVelocity, Some(previous))
            if last.frame_index() > previous.frame_index() =>
        {
            let (last_x, last_y) = bbox.center();
            let (previous_x, previous_y) = previous.detection().bbox().center();
            let elapsed = (last.frame_index() - previous.frame_index()) as f32;
            let ahead = frame_index.saturating_sub(last.frame_index()) as f32;
            bbox.translate(
                (last_x - previous_x) / elapsed * ahead,
                (last_y - previous_y) / elapsed * ahead,
            )
        }
        _ => bbox,
    }
}

/// Spatial consistency between a track's last region and a candidate detection.
///
/// Masks are compared directly when both sides carry one of the same shape and the motion model
/// is static; otherwise the predicted box of the track is compared against the candidate box.
pub fn spatial_overlap(
    last: &Observation,
    previous: Option<&Observation>,
    candidate: &Observation,
    motion_model: MotionModel,
) -> f32 {
    if motion_model == MotionModel::Static {
        if let (Some(a), Some(b)) = (last.detection().mask(), candidate.detection().mask()) {
            if let Some(iou) = mask_intersection_over_union(a, b) {
                return iou;
            }
        }
    }

    let predicted = predict_bbox(last, previous, candidate.frame_index(), motion_model);
    intersection_over_union(&predicted, candidate.detection().bbox())
}
