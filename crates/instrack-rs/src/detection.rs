use crate::BoundingBox;
use ndarray::*;
use uuid::Uuid;

/// Detection represents one segmented object instance in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Unique detection identifier
    id: Uuid,
    /// Bounding box in top, left, width, height format.
    bbox: BoundingBox,
    /// Optional frame-sized instance mask, `true` where the instance is visible.
    mask: Option<Array2<bool>>,
    /// Detection confidence score.
    confidence: f32,
    /// Semantic class identifier.
    class_id: usize,
    /// Optional class name
    class_name: Option<String>,
    /// A feature vector that describes the appearance of the instance.
    feature: Option<Array1<f32>>,
}

impl Detection {
    /// Returns a new Detection
    ///
    /// # Parameters
    ///
    /// * `id`: An optional identifier, a random one is generated when `None`.
    /// * `bbox`: A bounding box object.
    /// * `confidence`: Detection confidence score.
    /// * `class_id`: The semantic class identifier.
    /// * `class_name`: An optional human readable class name.
    /// * `feature`: A feature vector that describes the object contained in this image.
    pub fn new(
        id: Option<Uuid>,
        bbox: BoundingBox,
        confidence: f32,
        class_id: usize,
        class_name: Option<String>,
        feature: Option<Vec<f32>>,
    ) -> Detection {
        Detection {
            id: id.unwrap_or_else(Uuid::new_v4),
            bbox,
            mask: None,
            confidence,
            class_id,
            class_name,
            feature: feature.map(Array1::from_vec),
        }
    }

    /// Attach an instance mask to the detection
    pub fn with_mask(mut self, mask: Array2<bool>) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Returns the unique id of the detection
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Returns a BoundingBox of the detection co-ordinates
    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Returns the instance mask of the detection
    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_ref()
    }

    /// Returns the confidence of the detection
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the class identifier of the detection
    pub fn class_id(&self) -> usize {
        self.class_id
    }

    /// Returns the class name of the detection
    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Returns the feature array of the detection
    pub fn feature(&self) -> Option<&Array1<f32>> {
        self.feature.as_ref()
    }
}
