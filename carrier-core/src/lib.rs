//! Carrier bridge core: exposes a peer-to-peer carrier SDK to JavaScript plugin hosts.
//! The host sends `(command, args)` and receives JSON results; native callbacks come back
//! as event records delivered to the sink registered for their category.

pub mod args;
pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod ffi;
pub mod handle;
pub mod listener;
pub mod loopback;
pub mod native;
pub mod router;

pub use bridge::{Bridge, SinkProvider, SUCCESS};
pub use command::Command;
pub use config::{BootstrapList, BootstrapNode, BridgeConfig, ConfigError};
pub use error::{BridgeError, CommandError, NativeError, NativeResult, INVALID_ID};
pub use event::{EventRecord, FileTransferEvent, GroupEvent, SessionEvent, StreamEvent};
pub use handle::{Handle, HandleKind, HandleTable};
pub use listener::{ChannelSink, EventCategory, EventSink, ListenerRegistry};
pub use loopback::{LoopbackLibrary, LoopbackNetwork};
pub use router::{Callback, EventRouter, Origin};
