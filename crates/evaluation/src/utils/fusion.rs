use instrack_rs::{FusionEngine, FusionError, Observation, ReconstructionHandle};
use tracing::{debug, info};

/// Reconstruction state kept behind each handle.
#[derive(Debug, Default)]
struct Volume {
    fused: usize,
    first_frame: Option<usize>,
    last_frame: Option<usize>,
}

/// A fusion engine that only keeps bookkeeping about the fused observations and can be limited to
/// a fixed number of simultaneous reconstructions.
#[derive(Debug, Default)]
pub struct BudgetedFusionEngine {
    capacity: Option<usize>,
    live: usize,
    created: usize,
    finalized: usize,
}

impl BudgetedFusionEngine {
    pub fn new(capacity: Option<usize>) -> Self {
        BudgetedFusionEngine {
            capacity,
            ..Default::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn created(&self) -> usize {
        self.created
    }

    pub fn finalized(&self) -> usize {
        self.finalized
    }
}

impl FusionEngine for BudgetedFusionEngine {
    fn request_reconstruction(&mut self, track_id: usize) -> Result<ReconstructionHandle, FusionError> {
        if let Some(capacity) = self.capacity {
            if self.live >= capacity {
                return Err(FusionError::ResourceExhausted { live: self.live });
            }
        }
        self.live += 1;
        self.created += 1;
        debug!(track_id, live = self.live, "allocated volume");
        Ok(ReconstructionHandle::new(track_id).with_payload(Volume::default()))
    }

    fn extend_reconstruction(
        &mut self,
        handle: &mut ReconstructionHandle,
        observation: &Observation,
    ) -> Result<(), FusionError> {
        let volume = handle
            .payload_mut::<Volume>()
            .ok_or_else(|| FusionError::Failed(String::from("foreign reconstruction handle")))?;
        volume.fused += 1;
        volume.first_frame.get_or_insert(observation.frame_index());
        volume.last_frame = Some(observation.frame_index());
        Ok(())
    }

    fn finalize_reconstruction(&mut self, handle: ReconstructionHandle) {
        self.live -= 1;
        self.finalized += 1;
        if let Some(volume) = handle.payload::<Volume>() {
            info!(
                track_id = handle.track_id(),
                fused = volume.fused,
                first_frame = volume.first_frame,
                last_frame = volume.last_frame,
                "finalized reconstruction"
            );
        }
    }
}
