//! Handle Registry
//!
//! Native code cannot hold a reference to a Rust handler, so handlers are
//! published here and native code is given an integer token instead. Tokens
//! start at 1, only ever increase, and are never reused while the process
//! runs; 0 is reserved as "no handle".

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{BridgeError, BridgeResult};
use crate::http::Handler;

/// Opaque token naming a registered handler
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroUsize);

impl Handle {
    /// Interpret a token received from native code; 0 yields `None`
    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Handle)
    }

    /// Token value as passed to native code
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct HandleTable {
    // None once usize::MAX has been issued
    next: Option<NonZeroUsize>,
    entries: HashMap<Handle, Arc<dyn Handler>>,
}

/// Concurrency-safe token → handler table.
///
/// The lock guards only the table. Handlers are cloned out and invoked after
/// the lock is released, so a handler may itself register or unregister.
pub struct HandleRegistry {
    table: RwLock<HandleTable>,
}

static GLOBAL: Lazy<Arc<HandleRegistry>> = Lazy::new(|| Arc::new(HandleRegistry::new()));

impl HandleRegistry {
    pub fn new() -> Self {
        Self::starting_at(NonZeroUsize::MIN)
    }

    pub(super) fn starting_at(first: NonZeroUsize) -> Self {
        Self {
            table: RwLock::new(HandleTable {
                next: Some(first),
                entries: HashMap::new(),
            }),
        }
    }

    /// Process-wide registry, created on first use and never torn down.
    ///
    /// Native request dispatch resolves tokens against this instance.
    pub fn global() -> Arc<HandleRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Publish a handler and return its new token.
    ///
    /// # Panics
    ///
    /// Panics once every `usize` token has been issued, since tokens are never
    /// reused. The table is left unchanged.
    pub fn register(&self, handler: Arc<dyn Handler>) -> Handle {
        let mut table = self.table.write();
        // Unreachable on 64-bit targets: a billion registrations a second
        // would take centuries. On 32-bit it takes 2^32 - 1 registrations.
        let next = table.next.expect("handle counter exhausted");
        let handle = Handle(next);
        table.next = next.checked_add(1);
        table.entries.insert(handle, handler);
        handle
    }

    /// Publish a handler for the lifetime of the returned guard
    pub fn register_scoped(&self, handler: Arc<dyn Handler>) -> HandleGuard<'_> {
        let handle = self.register(handler);
        HandleGuard {
            registry: self,
            handle,
        }
    }

    /// Look up the handler published under `handle`
    pub fn resolve(&self, handle: Handle) -> BridgeResult<Arc<dyn Handler>> {
        let table = self.table.read();
        table
            .entries
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::HandleNotFound(handle.get()))
    }

    /// Look up a token exactly as native code passed it
    pub fn resolve_raw(&self, raw: usize) -> BridgeResult<Arc<dyn Handler>> {
        let handle = Handle::from_raw(raw).ok_or(BridgeError::HandleNotFound(raw))?;
        self.resolve(handle)
    }

    /// Remove a token; removing an unknown token does nothing
    pub fn unregister(&self, handle: Handle) {
        let removed = self.table.write().entries.remove(&handle);
        // dropped outside the lock: a handler's Drop may touch the registry
        drop(removed);
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.table.read().entries.contains_key(&handle)
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration that is removed when the guard drops, including on unwind
pub struct HandleGuard<'r> {
    registry: &'r HandleRegistry,
    handle: Handle,
}

impl HandleGuard<'_> {
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}
