//! Handle tables: opaque ids handed to the external caller, one table per entity kind.
//!
//! A table is the single owner of its object references. Ids come from a per-table
//! wrapping counter; an id is never issued while another live (or reserved) entry holds it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Opaque identifier of one live native object. Issued handles are never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// Placeholder for an argument that cannot name any object; no table ever holds it.
    pub const UNISSUED: Handle = Handle(0);

    /// Wrap a raw id received from the external caller. Zero is never valid.
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != 0).then_some(Handle(raw))
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity kinds that get their own handle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandleKind {
    Carrier,
    Session,
    Stream,
    Group,
    FileTransfer,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleKind::Carrier => "carrier",
            HandleKind::Session => "session",
            HandleKind::Stream => "stream",
            HandleKind::Group => "group",
            HandleKind::FileTransfer => "file transfer",
        };
        f.write_str(s)
    }
}

struct Entry<T> {
    object: Arc<T>,
    owner: Option<Handle>,
}

struct Slots<T> {
    next: u32,
    entries: HashMap<Handle, Entry<T>>,
    reserved: HashSet<Handle>,
}

impl<T> Slots<T> {
    fn allocate(&mut self) -> Handle {
        loop {
            let candidate = self.next;
            self.next = self.next.wrapping_add(1);
            if candidate == 0 {
                continue;
            }
            let handle = Handle(candidate);
            if !self.entries.contains_key(&handle) && !self.reserved.contains(&handle) {
                return handle;
            }
        }
    }
}

/// Mapping from [`Handle`] to a native object of one kind, safe for concurrent use.
pub struct HandleTable<T> {
    kind: HandleKind,
    slots: RwLock<Slots<T>>,
    // Serializes reserve+insert pairs against remove_all so a teardown never races a
    // half-finished registration.
    teardown: Mutex<()>,
}

impl<T> HandleTable<T> {
    pub fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            slots: RwLock::new(Slots {
                next: 1,
                entries: HashMap::new(),
                reserved: HashSet::new(),
            }),
            teardown: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Store `object` under a fresh id.
    pub fn register(&self, object: T) -> Handle {
        self.register_entry(None, object)
    }

    /// Store `object` under a fresh id, owned by `owner` (a handle of another table).
    pub fn register_owned(&self, owner: Handle, object: T) -> Handle {
        self.register_entry(Some(owner), object)
    }

    fn register_entry(&self, owner: Option<Handle>, object: T) -> Handle {
        let mut slots = self.slots.write();
        let handle = slots.allocate();
        slots.entries.insert(
            handle,
            Entry {
                object: Arc::new(object),
                owner,
            },
        );
        tracing::debug!(kind = %self.kind, %handle, "handle registered");
        handle
    }

    /// Allocate an id before the object exists, so native callbacks can be tagged with it.
    /// Complete with [`insert`](Self::insert) or give it back with [`release`](Self::release).
    pub fn reserve(&self) -> Handle {
        let _guard = self.teardown.lock();
        let mut slots = self.slots.write();
        let handle = slots.allocate();
        slots.reserved.insert(handle);
        handle
    }

    /// Bind an object to a reserved id. Returns false if the id was not reserved.
    pub fn insert(&self, handle: Handle, owner: Option<Handle>, object: T) -> bool {
        let mut slots = self.slots.write();
        if !slots.reserved.remove(&handle) {
            return false;
        }
        slots.entries.insert(
            handle,
            Entry {
                object: Arc::new(object),
                owner,
            },
        );
        tracing::debug!(kind = %self.kind, %handle, "handle registered");
        true
    }

    /// Give back a reserved id whose object was never created.
    pub fn release(&self, handle: Handle) {
        self.slots.write().reserved.remove(&handle);
    }

    pub fn lookup(&self, handle: Handle) -> Option<Arc<T>> {
        self.slots
            .read()
            .entries
            .get(&handle)
            .map(|e| Arc::clone(&e.object))
    }

    /// Like [`lookup`](Self::lookup) but fails with [`BridgeError::InvalidHandle`].
    pub fn get(&self, handle: Handle) -> Result<Arc<T>, BridgeError> {
        self.lookup(handle)
            .ok_or(BridgeError::InvalidHandle(self.kind))
    }

    pub fn owner_of(&self, handle: Handle) -> Option<Handle> {
        self.slots.read().entries.get(&handle).and_then(|e| e.owner)
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.read().entries.contains_key(&handle)
    }

    /// Remove one entry. Removing an absent handle is a no-op.
    pub fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        let removed = self.slots.write().entries.remove(&handle).map(|e| e.object);
        if removed.is_some() {
            tracing::debug!(kind = %self.kind, %handle, "handle removed");
        }
        removed
    }

    /// Drop every entry in one step.
    pub fn remove_all(&self) -> Vec<(Handle, Arc<T>)> {
        let _guard = self.teardown.lock();
        let mut slots = self.slots.write();
        let drained: Vec<_> = slots
            .entries
            .drain()
            .map(|(h, e)| (h, e.object))
            .collect();
        if !drained.is_empty() {
            tracing::debug!(kind = %self.kind, count = drained.len(), "table cleared");
        }
        drained
    }

    /// Remove every entry owned by `owner`, returning them for native cleanup.
    pub fn remove_owned_by(&self, owner: Handle) -> Vec<(Handle, Arc<T>)> {
        let mut slots = self.slots.write();
        let doomed: Vec<Handle> = slots
            .entries
            .iter()
            .filter(|(_, e)| e.owner == Some(owner))
            .map(|(h, _)| *h)
            .collect();
        doomed
            .into_iter()
            .filter_map(|h| slots.entries.remove(&h).map(|e| (h, e.object)))
            .collect()
    }

    /// Handles currently owned by `owner`.
    pub fn owned_by(&self, owner: Handle) -> Vec<Handle> {
        self.slots
            .read()
            .entries
            .iter()
            .filter(|(_, e)| e.owner == Some(owner))
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn handles(&self) -> Vec<Handle> {
        self.slots.read().entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}
