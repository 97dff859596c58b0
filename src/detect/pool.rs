use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::{VisionError, VisionResult};
use crate::frame::Frame;

/// Thread-safe pool of equivalent detector instances.
///
/// Each instance sits behind its own `Mutex` because `DetectorBackend::detect`
/// takes `&mut self`: at most one inference is in flight per instance. Callers
/// take the first idle instance, or wait on one chosen round-robin when all are
/// busy.
pub struct DetectorPool {
    slots: Vec<Mutex<Box<dyn DetectorBackend>>>,
    next: AtomicUsize,
    name: &'static str,
}

impl DetectorPool {
    pub fn new(backends: Vec<Box<dyn DetectorBackend>>) -> Result<Self> {
        let name = backends
            .first()
            .map(|backend| backend.name())
            .ok_or_else(|| anyhow!("detector pool needs at least one backend"))?;
        if let Some(other) = backends.iter().find(|backend| backend.name() != name) {
            return Err(anyhow!(
                "detector pool instances must be equivalent, got '{}' and '{}'",
                name,
                other.name()
            ));
        }
        Ok(Self {
            slots: backends.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
            name,
        })
    }

    /// Pool with a single instance.
    pub fn single<B: DetectorBackend + 'static>(backend: B) -> Self {
        let name = backend.name();
        let boxed: Box<dyn DetectorBackend> = Box::new(backend);
        Self {
            slots: vec![Mutex::new(boxed)],
            next: AtomicUsize::new(0),
            name,
        }
    }

    /// Backend identifier shared by all instances.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run warm-up on every instance.
    pub fn warm_up(&self) -> Result<()> {
        for slot in &self.slots {
            let mut guard = slot
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            guard.warm_up()?;
        }
        Ok(())
    }

    /// Run detection on one pooled instance.
    pub fn detect(&self, frame: &Frame) -> VisionResult<Vec<Detection>> {
        let mut guard = self.checkout()?;
        guard.detect(frame).map_err(|err| {
            VisionError::processing(format!("{} detector failed: {:#}", self.name, err))
        })
    }

    fn checkout(&self) -> VisionResult<MutexGuard<'_, Box<dyn DetectorBackend>>> {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        for offset in 0..self.slots.len() {
            let slot = &self.slots[(start + offset) % self.slots.len()];
            match slot.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => {
                    return Err(VisionError::processing("detector lock poisoned"))
                }
            }
        }
        self.slots[start]
            .lock()
            .map_err(|_| VisionError::processing("detector lock poisoned"))
    }
}
