use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use instrack_rs::{BoundingBox, Detection, Pose};
use ndarray::*;
use serde::Deserialize;
use std::{fs::File, io::Read, path::Path};

/// One row of the detections file.
///
/// ```text
/// frame,class_id,class_name,x,y,width,height,confidence,feature
/// 1,2,car,102.4,547.8,83.8,250.8,0.93,0.12 -0.40 0.77
/// ```
#[derive(Debug, Deserialize)]
struct DetectionRecord {
    frame: usize,
    class_id: usize,
    #[serde(default)]
    class_name: Option<String>,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    /// Whitespace separated appearance embedding.
    #[serde(default)]
    feature: Option<String>,
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = anyhow::Error;

    fn try_from(record: DetectionRecord) -> Result<Self> {
        let feature = record
            .feature
            .filter(|feature| !feature.trim().is_empty())
            .map(|feature| {
                feature
                    .split_whitespace()
                    .map(str::parse::<f32>)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()
            .with_context(|| format!("invalid feature in frame {}", record.frame))?;

        Ok(Detection::new(
            None,
            BoundingBox::new(record.x, record.y, record.width, record.height),
            record.confidence,
            record.class_id,
            record.class_name.filter(|name| !name.is_empty()),
            feature,
        ))
    }
}

/// Read a detections file grouped by frame, in order of first appearance.
pub fn read_detections(path: &Path) -> Result<IndexMap<usize, Vec<Detection>>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_detections(file)
}

fn parse_detections<R: Read>(input: R) -> Result<IndexMap<usize, Vec<Detection>>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(input);

    let mut frames = IndexMap::<usize, Vec<Detection>>::new();
    for record in reader.deserialize::<DetectionRecord>() {
        let record = record?;
        let frame = record.frame;
        let detection = Detection::try_from(record)?;
        frames
            .entry(frame)
            .and_modify(|detections| detections.push(detection.clone()))
            .or_insert(vec![detection]);
    }

    Ok(frames)
}

/// Read a camera trajectory, one headerless row per frame: the frame index followed by the top
/// three rows of the 4x4 camera pose in row-major order.
pub fn read_poses(path: &Path) -> Result<IndexMap<usize, Pose>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    parse_poses(file)
}

fn parse_poses<R: Read>(input: R) -> Result<IndexMap<usize, Pose>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut poses = IndexMap::new();
    for record in reader.records() {
        let record = record?;
        if record.len() != 13 {
            return Err(anyhow!(
                "pose row must have 13 columns, found {}",
                record.len()
            ));
        }

        let frame = record[0]
            .parse::<usize>()
            .with_context(|| format!("invalid frame index {:?}", &record[0]))?;
        let values = record
            .iter()
            .skip(1)
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid pose for frame {}", frame))?;

        let mut matrix = Array2::<f64>::eye(4);
        matrix
            .slice_mut(s![0..3, ..])
            .assign(&Array2::from_shape_vec((3, 4), values)?);
        poses.insert(frame, Pose::new(matrix)?);
    }

    Ok(poses)
}
