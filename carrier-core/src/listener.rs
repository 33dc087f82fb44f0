//! Listener registry: at most one sink per event category, replaceable at runtime.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::EventRecord;

/// Event categories, with the numeric codes the JavaScript side uses in `setListener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventCategory {
    Lifecycle = 1,
    Session = 2,
    Stream = 3,
    FriendInvite = 4,
    Group = 5,
    FileTransfer = 6,
}

impl EventCategory {
    pub const ALL: [EventCategory; 6] = [
        EventCategory::Lifecycle,
        EventCategory::Session,
        EventCategory::Stream,
        EventCategory::FriendInvite,
        EventCategory::Group,
        EventCategory::FileTransfer,
    ];

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EventCategory::Lifecycle),
            2 => Some(EventCategory::Session),
            3 => Some(EventCategory::Stream),
            4 => Some(EventCategory::FriendInvite),
            5 => Some(EventCategory::Group),
            6 => Some(EventCategory::FileTransfer),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    fn slot(self) -> usize {
        self as usize - 1
    }
}

impl From<EventCategory> for u8 {
    fn from(c: EventCategory) -> u8 {
        c.code()
    }
}

impl TryFrom<u8> for EventCategory {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        EventCategory::from_code(code).ok_or_else(|| format!("unknown event category {code}"))
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventCategory::Lifecycle => "lifecycle",
            EventCategory::Session => "session",
            EventCategory::Stream => "stream",
            EventCategory::FriendInvite => "friend-invite",
            EventCategory::Group => "group",
            EventCategory::FileTransfer => "file-transfer",
        };
        f.write_str(s)
    }
}

/// Consumer of event records. Implementations must not block for long: they run on
/// the native library's callback thread.
pub trait EventSink: Send + Sync {
    fn deliver(&self, record: &EventRecord);
}

impl<F> EventSink for F
where
    F: Fn(&EventRecord) + Send + Sync,
{
    fn deliver(&self, record: &EventRecord) {
        self(record)
    }
}

/// Sink that forwards clones of each record into a channel.
pub struct ChannelSink {
    tx: parking_lot::Mutex<mpsc::Sender<EventRecord>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<EventRecord>) -> Self {
        Self {
            tx: parking_lot::Mutex::new(tx),
        }
    }

    /// Sink plus the receiving end.
    pub fn pair() -> (Self, mpsc::Receiver<EventRecord>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, record: &EventRecord) {
        // Receiver gone means the consumer stopped listening; nothing to do.
        let _ = self.tx.lock().send(record.clone());
    }
}

/// One slot per category. Last writer wins; the replaced sink is dropped without notice.
#[derive(Default)]
pub struct ListenerRegistry {
    slots: RwLock<[Option<Arc<dyn EventSink>>; 6]>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listener(&self, category: EventCategory, sink: Arc<dyn EventSink>) {
        self.slots.write()[category.slot()] = Some(sink);
        tracing::debug!(%category, "listener set");
    }

    /// Current sink, cloned out so the caller can deliver without holding the lock.
    pub fn get_listener(&self, category: EventCategory) -> Option<Arc<dyn EventSink>> {
        self.slots.read()[category.slot()].clone()
    }

    pub fn clear_listener(&self, category: EventCategory) -> Option<Arc<dyn EventSink>> {
        self.slots.write()[category.slot()].take()
    }

    pub fn clear_all(&self) {
        let mut slots = self.slots.write();
        for slot in slots.iter_mut() {
            *slot = None;
        }
    }

    pub fn is_registered(&self, category: EventCategory) -> bool {
        self.slots.read()[category.slot()].is_some()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered: Vec<_> = EventCategory::ALL
            .iter()
            .filter(|c| self.is_registered(**c))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("registered", &registered)
            .finish()
    }
}
