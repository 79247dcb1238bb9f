use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<C> {
    value: Option<Arc<C>>,
    leases: usize,
}

/// Process-wide context a transform needs while it runs, such as the registry
/// used to decode contract payloads.
///
/// Established lazily by the first task that asks for it, reused by every later
/// task, and only torn down through [`SharedContext::release_if_idle`] once no
/// lease is outstanding. Establishing happens under the lock, so concurrent
/// first users wait instead of racing to build it twice.
pub struct SharedContext<C> {
    slot: Mutex<Slot<C>>,
    establishments: AtomicUsize,
}

impl<C> SharedContext<C> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                leases: 0,
            }),
            establishments: AtomicUsize::new(0),
        }
    }

    /// Lease the context, building it with `establish` if it is not live.
    pub fn acquire<E, F>(&self, establish: F) -> Result<ContextLease<'_, C>, E>
    where
        F: FnOnce() -> Result<C, E>,
    {
        let mut slot = self.slot.lock();
        let value = match slot.value.clone() {
            Some(value) => value,
            None => {
                let value = Arc::new(establish()?);
                self.establishments.fetch_add(1, Ordering::SeqCst);
                log::debug!("transform context established");
                slot.value = Some(Arc::clone(&value));
                value
            }
        };
        slot.leases += 1;

        Ok(ContextLease { owner: self, value })
    }

    /// Tear the context down if nobody holds a lease. Returns whether it was
    /// released.
    pub fn release_if_idle(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.leases == 0 && slot.value.is_some() {
            slot.value = None;
            log::debug!("transform context released");
            true
        } else {
            false
        }
    }

    pub fn is_established(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    pub fn active_leases(&self) -> usize {
        self.slot.lock().leases
    }

    /// How many times the context has been built.
    pub fn establishments(&self) -> usize {
        self.establishments.load(Ordering::SeqCst)
    }
}

impl<C> Default for SharedContext<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII lease on a [`SharedContext`].
pub struct ContextLease<'a, C> {
    owner: &'a SharedContext<C>,
    value: Arc<C>,
}

impl<C> Deref for ContextLease<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.value
    }
}

impl<C> Drop for ContextLease<'_, C> {
    fn drop(&mut self) {
        let mut slot = self.owner.slot.lock();
        slot.leases = slot.leases.saturating_sub(1);
    }
}
