//! Bookkeeping of running collectors.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use uuid::Uuid;

use super::pipeline::PipelineStatus;
use crate::etw::{SessionName, SourceError, StopHandle};

/// Everything needed to stop one running collector from another thread.
#[derive(Clone)]
pub struct CollectorHandle {
    pub id: Uuid,
    pub session: SessionName,
    stop: StopHandle,
    status: Arc<PipelineStatus>,
}

impl CollectorHandle {
    pub fn new(id: Uuid, session: SessionName, stop: StopHandle, status: Arc<PipelineStatus>) -> Self {
        Self { id, session, stop, status }
    }

    pub fn status(&self) -> &Arc<PipelineStatus> {
        &self.status
    }

    /// Marks the pipeline as terminating, ends its event loop and disposes
    /// of its session. Safe to call repeatedly.
    pub fn stop(&self) -> Result<(), SourceError> {
        self.status.request_stop();
        self.stop.stop_processing();
        self.stop.stop_session()
    }
}

/// Handles keyed by collector id. Inserted when a pipeline reports started,
/// removed when it terminates or when the supervisor stops it.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<Mutex<HashMap<Uuid, CollectorHandle>>>,
}

impl HandleRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, CollectorHandle>> {
        // A panicking pipeline must not take the registry down with it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, handle: CollectorHandle) {
        self.lock().insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<CollectorHandle> {
        self.lock().remove(id)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Takes every handle out, leaving the registry empty.
    pub fn drain(&self) -> Vec<CollectorHandle> {
        self.lock().drain().map(|(_, h)| h).collect()
    }
}
