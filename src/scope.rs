//! Resource scopes: batch release of arrays.
//!
//! A scope never owns the arrays registered with it. It keeps weak handles
//! keyed by array id; closing the scope releases every array that is still
//! registered. An array belongs to at most one scope at a time.

use crate::error::Error;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

static SCOPE_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Something a scope can release.
pub(crate) trait ManagedResource {
    fn resource_id(&self) -> usize;
    /// Forgets the owning scope without releasing anything.
    fn clear_scope(&self);
    /// Releases the underlying buffer.
    fn release(&self) -> Result<(), Error>;
}

pub(crate) struct ScopeState {
    id: usize,
    closed: bool,
    resources: BTreeMap<usize, Weak<dyn ManagedResource>>,
}

/// Shared handle to a scope's state, held weakly by member arrays.
pub(crate) type ScopeRef = Weak<RefCell<ScopeState>>;

/// Tracks arrays and releases the ones still registered when closed.
///
/// Dropping a scope closes it.
pub struct ResourceScope {
    state: Rc<RefCell<ScopeState>>,
}

impl ResourceScope {
    pub fn new() -> Self {
        let id = SCOPE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        crate::debug_println!("scope {} opened", id);
        ResourceScope {
            state: Rc::new(RefCell::new(ScopeState {
                id,
                closed: false,
                resources: BTreeMap::new(),
            })),
        }
    }

    pub fn id(&self) -> usize {
        self.state.borrow().id
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Number of live arrays currently registered.
    pub fn len(&self) -> usize {
        self.state
            .borrow()
            .resources
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the array with `id` is registered here.
    pub fn contains_id(&self, id: usize) -> bool {
        self.state.borrow().resources.contains_key(&id)
    }

    /// Releases every registered array. Closing twice is a no-op.
    pub fn close(&self) {
        let drained = {
            let mut state = self.state.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.resources)
        };

        let mut released = 0usize;
        for weak in drained.into_values() {
            let Some(resource) = weak.upgrade() else {
                continue;
            };
            resource.clear_scope();
            match resource.release() {
                Ok(()) => released += 1,
                Err(e) => log::debug!(
                    "scope {}: array {} not released: {}",
                    self.id(),
                    resource.resource_id(),
                    e
                ),
            }
        }
        log::debug!("scope {} closed, released {} arrays", self.id(), released);
    }

    pub(crate) fn handle(&self) -> ScopeRef {
        Rc::downgrade(&self.state)
    }
}

impl Default for ResourceScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceScope {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ResourceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ResourceScope")
            .field("id", &state.id)
            .field("closed", &state.closed)
            .field("members", &state.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Removes `id` from the scope behind `scope`, if it is still open.
pub(crate) fn unregister(scope: &ScopeRef, id: usize) {
    if let Some(state) = scope.upgrade() {
        if let Ok(mut state) = state.try_borrow_mut() {
            state.resources.remove(&id);
        }
    }
}

/// Whether `scope` is alive and still accepting members.
pub(crate) fn is_open(scope: &ScopeRef) -> bool {
    scope
        .upgrade()
        .map(|s| !s.borrow().closed)
        .unwrap_or(false)
}

pub(crate) fn same_scope(scope: &ScopeRef, other: &ResourceScope) -> bool {
    Weak::ptr_eq(scope, &other.handle())
}

/// Re-registers a resource with the scope behind a weak handle.
pub(crate) fn register_with(
    scope: &ScopeRef,
    resource: Weak<dyn ManagedResource>,
    id: usize,
) -> Result<(), Error> {
    let state = scope.upgrade().ok_or(Error::ScopeClosed)?;
    let mut state = state.borrow_mut();
    if state.closed {
        return Err(Error::ScopeClosed);
    }
    state.resources.insert(id, resource);
    Ok(())
}
