mod utils;
use anyhow::{Context, Ok, Result};
use clap::Parser;
use instrack_rs::{
    AllOf, AssignmentStrategy, AssociationConfig, AssociationEngine, MinObservations,
    MinPoseDiversity, Pose,
};
use itertools::{Itertools, MinMaxResult};
use std::{
    fs::OpenOptions,
    io::{BufWriter, Write},
    path::PathBuf,
};
use tracing::info;
use utils::*;

/// Replay recorded instance detections through the association engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The detections csv
    #[arg(short, long)]
    detections: PathBuf,

    /// The camera trajectory csv. Frames without a pose reuse the previous one
    #[arg(short, long)]
    poses: Option<PathBuf>,

    /// Where to write the per frame track rows
    #[arg(short, long)]
    output: PathBuf,

    /// A json file with the association configuration. Flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// The minimum score for a detection to continue a track
    #[arg(short, long)]
    acceptance_threshold: Option<f32>,

    /// The largest frame gap a track can bridge
    #[arg(short, long)]
    max_gap: Option<usize>,

    /// Tracks unseen for more frames than this are retired
    #[arg(short, long)]
    retirement_gap: Option<usize>,

    /// The number of observations required before reconstructing a track
    #[arg(long, default_value_t = 3)]
    min_observations: usize,

    /// Additionally require the camera to move this far while observing a track
    #[arg(long)]
    min_translation: Option<f64>,

    /// The maximum number of simultaneous reconstructions
    #[arg(long)]
    max_reconstructions: Option<usize>,

    /// Use the optimal assignment instead of the greedy one
    #[arg(long, default_value_t = false)]
    optimal: bool,

    /// Print the track timeline at the end
    #[arg(long, default_value_t = false)]
    ascii: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            serde_json::from_reader::<_, AssociationConfig>(file)?
        }
        None => AssociationConfig::default(),
    };
    if let Some(acceptance_threshold) = args.acceptance_threshold {
        config.with_acceptance_threshold(acceptance_threshold);
    }
    if let Some(max_gap) = args.max_gap {
        config.matching.with_max_gap(max_gap);
    }
    if let Some(retirement_gap) = args.retirement_gap {
        config.with_retirement_gap(retirement_gap);
    }
    if let Some(max_reconstructions) = args.max_reconstructions {
        config.with_max_live_reconstructions(max_reconstructions);
    }
    if args.optimal {
        config.with_assignment(AssignmentStrategy::Optimal);
    }

    let mut policy = AllOf::new().and(MinObservations(args.min_observations));
    if let Some(translation) = args.min_translation {
        policy = policy.and(MinPoseDiversity {
            translation,
            rotation: f64::INFINITY,
        });
    }

    let mut frames = input::read_detections(&args.detections)?;
    let poses = match &args.poses {
        Some(path) => input::read_poses(path)?,
        None => Default::default(),
    };

    let (first, last) = match frames.keys().copied().minmax() {
        MinMaxResult::NoElements => {
            info!("no detections");
            return Ok(());
        }
        MinMaxResult::OneElement(frame) => (frame, frame),
        MinMaxResult::MinMax(first, last) => (first, last),
    };

    let mut engine =
        AssociationEngine::new(fusion::BudgetedFusionEngine::new(config.max_live_reconstructions));
    engine.with_config(config).with_eligibility(policy);

    let mut file = BufWriter::new(
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?,
    );

    let mut camera_pose = Pose::identity();
    for frame_index in first..=last {
        if let Some(pose) = poses.get(&frame_index) {
            camera_pose = pose.clone();
        }
        let detections = frames.swap_remove(&frame_index).unwrap_or_default();

        let report = engine.process_frame(frame_index, detections, camera_pose.clone())?;
        info!(
            frame = frame_index,
            matches = report.matches.len(),
            created = report.created.len(),
            retired = report.retired.len(),
            reconstructions = report.reconstructions.len(),
            "processed frame"
        );

        // output format
        // <frame>, <id>, <bb_left>, <bb_top>, <bb_width>, <bb_height>, <conf>, <x>, <y>, <z>
        engine
            .tracks()
            .filter(|track| track.end_time() == frame_index)
            .try_for_each(|track| {
                let bbox = track.last_observation().detection().bbox();
                file.write_all(
                    format!(
                        "{frame_index},{},{:.3},{:.3},{:.3},{:.3},1,-1,-1,-1\n",
                        track.track_id(),
                        bbox.x(),
                        bbox.y(),
                        bbox.width(),
                        bbox.height()
                    )
                    .as_bytes(),
                )
            })?;
    }
    file.flush()?;

    if args.ascii {
        println!("{}", engine.ascii_timeline());
    }

    let retired = engine.retire_all();
    let fusion = engine.fusion();
    info!(
        tracks = retired.len(),
        reconstructions = fusion.created(),
        finalized = fusion.finalized(),
        live = fusion.live(),
        "finished"
    );

    Ok(())
}
