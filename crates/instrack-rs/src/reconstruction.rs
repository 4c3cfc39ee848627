use crate::{FusionError, Observation};
use std::any::Any;
use std::fmt;
use uuid::Uuid;

/// Opaque, exclusively owned reference to a dense reconstruction maintained by a [`FusionEngine`].
///
/// The handle is neither `Clone` nor `Copy`: whoever holds it owns the underlying resource and is
/// responsible for handing it back through [`FusionEngine::finalize_reconstruction`].
pub struct ReconstructionHandle {
    id: Uuid,
    track_id: usize,
    payload: Option<Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for ReconstructionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconstructionHandle")
            .field("id", &self.id)
            .field("track_id", &self.track_id)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

impl ReconstructionHandle {
    /// Returns a new handle for the reconstruction of `track_id`.
    pub fn new(track_id: usize) -> ReconstructionHandle {
        ReconstructionHandle {
            id: Uuid::new_v4(),
            track_id,
            payload: None,
        }
    }

    /// Attach engine specific state to the handle.
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Box::new(payload));
        self
    }

    /// Return the unique id of the handle
    pub fn id(&self) -> &Uuid {
        &self.id
    }

    /// Return the track the reconstruction was requested for
    pub fn track_id(&self) -> usize {
        self.track_id
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }

    pub fn payload_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.payload.as_deref_mut()?.downcast_mut::<T>()
    }
}

/// The volumetric fusion engine that owns the dense geometry behind each handle.
///
/// Calls may block while resources are acquired. Failures are reported as [`FusionError`]s and are
/// treated as recoverable by the association engine.
pub trait FusionEngine {
    /// Allocate a new reconstruction for `track_id`.
    fn request_reconstruction(&mut self, track_id: usize)
        -> Result<ReconstructionHandle, FusionError>;

    /// Fuse `observation` into the reconstruction behind `handle`.
    fn extend_reconstruction(
        &mut self,
        handle: &mut ReconstructionHandle,
        observation: &Observation,
    ) -> Result<(), FusionError>;

    /// Tear down the reconstruction, consuming the handle.
    fn finalize_reconstruction(&mut self, handle: ReconstructionHandle);
}

#[cfg(test)]
pub(crate) mod mock {
    use crate::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use uuid::Uuid;

    /// Everything a [`RecordingFusionEngine`] was asked to do.
    #[derive(Debug, Default)]
    pub struct FusionLog {
        pub requested: Vec<usize>,
        pub extended: Vec<(usize, usize)>,
        pub finalized: HashMap<Uuid, usize>,
        pub finalized_tracks: Vec<usize>,
        pub live: usize,
    }

    /// A fusion engine that records calls and optionally runs out of capacity.
    #[derive(Debug, Default, Clone)]
    pub struct RecordingFusionEngine {
        pub log: Rc<RefCell<FusionLog>>,
        pub capacity: Option<usize>,
    }

    impl RecordingFusionEngine {
        pub fn with_capacity(capacity: usize) -> Self {
            RecordingFusionEngine {
                log: Rc::default(),
                capacity: Some(capacity),
            }
        }
    }

    impl FusionEngine for RecordingFusionEngine {
        fn request_reconstruction(
            &mut self,
            track_id: usize,
        ) -> Result<ReconstructionHandle, FusionError> {
            let mut log = self.log.borrow_mut();
            if let Some(capacity) = self.capacity {
                if log.live >= capacity {
                    return Err(FusionError::ResourceExhausted { live: log.live });
                }
            }
            log.requested.push(track_id);
            log.live += 1;
            Ok(ReconstructionHandle::new(track_id).with_payload(0usize))
        }

        fn extend_reconstruction(
            &mut self,
            handle: &mut ReconstructionHandle,
            observation: &Observation,
        ) -> Result<(), FusionError> {
            if let Some(fused) = handle.payload_mut::<usize>() {
                *fused += 1;
            }
            self.log
                .borrow_mut()
                .extended
                .push((handle.track_id(), observation.frame_index()));
            Ok(())
        }

        fn finalize_reconstruction(&mut self, handle: ReconstructionHandle) {
            let mut log = self.log.borrow_mut();
            *log.finalized.entry(*handle.id()).or_default() += 1;
            log.finalized_tracks.push(handle.track_id());
            log.live -= 1;
        }
    }
}
