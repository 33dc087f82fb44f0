//! Collaborator seam: traits the native carrier library implements, plus the value types
//! that cross it. The bridge only ever talks to these traits.

use std::path::PathBuf;

use serde::{Deserialize, Serialize, Serializer};

use crate::config::BootstrapNode;
use crate::error::NativeResult;
use crate::event::{CarrierEvent, FileTransferEvent, FriendInviteEvent, GroupEvent, SessionEvent, StreamEvent};
use crate::router::Callback;

/// Enum carried on the wire as its integer value.
macro_rules! numeric_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "i32", try_from = "i32")]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_value(v: i32) -> Option<Self> {
                match v {
                    $(x if x == $value => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn value(self) -> i32 {
                self as i32
            }
        }

        impl From<$name> for i32 {
            fn from(v: $name) -> i32 {
                v.value()
            }
        }

        impl TryFrom<i32> for $name {
            type Error = String;

            fn try_from(v: i32) -> Result<Self, String> {
                $name::from_value(v)
                    .ok_or_else(|| format!("invalid {} value {}", stringify!($name), v))
            }
        }
    };
}

numeric_enum! {
    pub enum ConnectionStatus {
        Connected = 0,
        Disconnected = 1,
    }
}

numeric_enum! {
    pub enum PresenceStatus {
        None = 0,
        Away = 1,
        Busy = 2,
    }
}

numeric_enum! {
    pub enum StreamType {
        Audio = 0,
        Video = 1,
        Text = 2,
        Application = 3,
        Message = 4,
    }
}

numeric_enum! {
    /// Stream lifecycle. A healthy stream walks Initialized, TransportReady, Connecting, Connected.
    pub enum StreamState {
        Raw = 0,
        Initialized = 1,
        TransportReady = 2,
        Connecting = 3,
        Connected = 4,
        Deactivated = 5,
        Closed = 6,
        Error = 7,
    }
}

numeric_enum! {
    pub enum CandidateType {
        Host = 0,
        ServerReflexive = 1,
        PeerReflexive = 2,
        Relayed = 3,
    }
}

numeric_enum! {
    pub enum NetworkTopology {
        Lan = 0,
        P2p = 1,
        Relayed = 2,
    }
}

numeric_enum! {
    pub enum PortForwardingProtocol {
        Tcp = 1,
    }
}

numeric_enum! {
    pub enum CloseReason {
        Normal = 0,
        Timeout = 1,
        Error = 2,
    }
}

numeric_enum! {
    pub enum FileTransferState {
        Initialized = 1,
        Connecting = 2,
        Connected = 3,
        Closed = 4,
        Failed = 5,
    }
}

/// Stream option bits as passed to `addStream`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamOptions(u32);

impl StreamOptions {
    pub const COMPRESS: StreamOptions = StreamOptions(1);
    pub const PLAIN: StreamOptions = StreamOptions(2);
    pub const RELIABLE: StreamOptions = StreamOptions(4);
    pub const MULTIPLEXING: StreamOptions = StreamOptions(8);
    pub const PORT_FORWARDING: StreamOptions = StreamOptions(16);

    const ALL: u32 = 0x1f;

    /// Rejects unknown bits.
    pub fn from_bits(bits: u32) -> Option<Self> {
        (bits & !Self::ALL == 0).then_some(StreamOptions(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: StreamOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for StreamOptions {
    type Output = StreamOptions;

    fn bitor(self, rhs: StreamOptions) -> StreamOptions {
        StreamOptions(self.0 | rhs.0)
    }
}

/// Profile of a user: self or friend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub has_avatar: bool,
    pub gender: String,
    pub phone: String,
    pub email: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendInfo {
    pub status: ConnectionStatus,
    pub label: String,
    pub presence: PresenceStatus,
    pub user_info: UserInfo,
}

impl FriendInfo {
    pub fn user_id(&self) -> &str {
        &self.user_info.user_id
    }
}

/// Serialize a friend list as `{ userId: info }`, the shape the JavaScript side indexes by.
pub fn serialize_friend_map<S: Serializer>(friends: &[FriendInfo], s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;
    let mut map = s.serialize_map(Some(friends.len()))?;
    for friend in friends {
        map.serialize_entry(friend.user_id(), friend)?;
    }
    map.end()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressInfo {
    #[serde(rename = "type")]
    pub candidate_type: CandidateType,
    pub address: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub related_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub related_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub topology: NetworkTopology,
    pub local_addr: AddressInfo,
    pub remote_addr: AddressInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTransferInfo {
    pub filename: String,
    pub file_id: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPeer {
    #[serde(rename = "peerName")]
    pub name: String,
    #[serde(rename = "peerUserId")]
    pub user_id: String,
}

/// Options for creating one carrier instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierOptions {
    pub udp_enabled: bool,
    pub persistent_location: PathBuf,
    pub bootstraps: Vec<BootstrapNode>,
}

/// Entry points of the native library that need no instance.
pub trait NativeLibrary: Send + Sync {
    fn version(&self) -> String;
    fn is_valid_address(&self, address: &str) -> bool;
    fn is_valid_id(&self, id: &str) -> bool;
    fn id_from_address(&self, address: &str) -> Option<String>;
    fn generate_file_id(&self) -> String;

    /// Create an instance. All of its lifecycle callbacks go through `callback`.
    fn create_carrier(
        &self,
        options: CarrierOptions,
        callback: Callback<CarrierEvent>,
    ) -> NativeResult<Box<dyn NativeCarrier>>;
}

/// One running carrier instance (a node identity).
pub trait NativeCarrier: Send + Sync {
    fn start(&self, interval_ms: u32) -> NativeResult<()>;
    /// Stop the instance. Every object created from it becomes unusable.
    fn kill(&self);
    fn is_ready(&self) -> bool;

    fn node_id(&self) -> String;
    fn user_id(&self) -> String;
    fn address(&self) -> String;

    fn self_info(&self) -> NativeResult<UserInfo>;
    fn set_self_info(&self, info: UserInfo) -> NativeResult<()>;
    fn nospam(&self) -> NativeResult<u32>;
    fn set_nospam(&self, nospam: u32) -> NativeResult<()>;
    fn presence(&self) -> NativeResult<PresenceStatus>;
    fn set_presence(&self, presence: PresenceStatus) -> NativeResult<()>;

    fn friends(&self) -> NativeResult<Vec<FriendInfo>>;
    fn friend(&self, user_id: &str) -> NativeResult<FriendInfo>;
    fn label_friend(&self, user_id: &str, label: &str) -> NativeResult<()>;
    fn is_friend(&self, user_id: &str) -> NativeResult<bool>;
    fn add_friend(&self, address: &str, hello: &str) -> NativeResult<()>;
    fn accept_friend(&self, user_id: &str) -> NativeResult<()>;
    fn remove_friend(&self, user_id: &str) -> NativeResult<()>;
    /// Returns true when the message was stored for offline delivery.
    fn send_friend_message(&self, to: &str, message: &[u8]) -> NativeResult<bool>;
    fn invite_friend(
        &self,
        to: &str,
        data: &str,
        callback: Callback<FriendInviteEvent>,
    ) -> NativeResult<()>;
    fn reply_friend_invite(
        &self,
        to: &str,
        status: i32,
        reason: Option<&str>,
        data: Option<&str>,
    ) -> NativeResult<()>;

    fn new_session(&self, to: &str) -> NativeResult<Box<dyn NativeSession>>;
    fn new_group(&self, callback: Callback<GroupEvent>) -> NativeResult<Box<dyn NativeGroup>>;
    fn join_group(
        &self,
        friend_id: &str,
        cookie: &[u8],
        callback: Callback<GroupEvent>,
    ) -> NativeResult<Box<dyn NativeGroup>>;
    fn new_file_transfer(
        &self,
        to: &str,
        info: Option<FileTransferInfo>,
        callback: Callback<FileTransferEvent>,
    ) -> NativeResult<Box<dyn NativeFileTransfer>>;
}

pub trait NativeSession: Send + Sync {
    fn peer(&self) -> String;
    fn request(&self, callback: Callback<SessionEvent>) -> NativeResult<()>;
    fn reply_request(&self, status: i32, reason: Option<&str>) -> NativeResult<()>;
    fn start(&self, sdp: &str) -> NativeResult<()>;
    fn add_stream(
        &self,
        stream_type: StreamType,
        options: StreamOptions,
        callback: Callback<StreamEvent>,
    ) -> NativeResult<Box<dyn NativeStream>>;
    fn remove_stream(&self, stream_id: i32) -> NativeResult<()>;
    fn add_service(
        &self,
        service: &str,
        protocol: PortForwardingProtocol,
        host: &str,
        port: &str,
    ) -> NativeResult<()>;
    fn remove_service(&self, service: &str);
    fn close(&self);
}

pub trait NativeStream: Send + Sync {
    fn id(&self) -> i32;
    fn transport_info(&self) -> NativeResult<TransportInfo>;
    fn write(&self, data: &[u8]) -> NativeResult<usize>;
    fn open_channel(&self, cookie: &str) -> NativeResult<i32>;
    fn close_channel(&self, channel: i32) -> NativeResult<()>;
    fn write_channel(&self, channel: i32, data: &[u8]) -> NativeResult<usize>;
    fn pend_channel(&self, channel: i32) -> NativeResult<()>;
    fn resume_channel(&self, channel: i32) -> NativeResult<()>;
    fn open_port_forwarding(
        &self,
        service: &str,
        protocol: PortForwardingProtocol,
        host: &str,
        port: &str,
    ) -> NativeResult<i32>;
    fn close_port_forwarding(&self, pf_id: i32) -> NativeResult<()>;
}

pub trait NativeGroup: Send + Sync {
    fn invite(&self, friend_id: &str) -> NativeResult<()>;
    fn send_message(&self, message: &[u8]) -> NativeResult<()>;
    fn title(&self) -> NativeResult<String>;
    fn set_title(&self, title: &str) -> NativeResult<()>;
    fn peers(&self) -> NativeResult<Vec<GroupPeer>>;
    fn peer(&self, peer_id: &str) -> NativeResult<GroupPeer>;
    fn leave(&self) -> NativeResult<()>;
}

pub trait NativeFileTransfer: Send + Sync {
    fn connect(&self) -> NativeResult<()>;
    fn accept_connect(&self) -> NativeResult<()>;
    fn add_file(&self, info: FileTransferInfo) -> NativeResult<()>;
    fn pull_data(&self, file_id: &str, offset: u64) -> NativeResult<()>;
    fn write_data(&self, file_id: &str, data: &[u8]) -> NativeResult<usize>;
    fn send_finish(&self, file_id: &str) -> NativeResult<()>;
    fn cancel_transfer(&self, file_id: &str, status: i32, reason: &str) -> NativeResult<()>;
    fn pend_transfer(&self, file_id: &str) -> NativeResult<()>;
    fn resume_transfer(&self, file_id: &str) -> NativeResult<()>;
    fn file_id(&self, filename: &str) -> NativeResult<String>;
    fn file_name(&self, file_id: &str) -> NativeResult<String>;
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_enums_serialize_as_numbers() {
        assert_eq!(serde_json::to_value(StreamState::Connected).unwrap(), 4);
        assert_eq!(serde_json::to_value(PresenceStatus::Busy).unwrap(), 2);
        let t: StreamType = serde_json::from_value(serde_json::json!(1)).unwrap();
        assert_eq!(t, StreamType::Video);
        assert!(serde_json::from_value::<FileTransferState>(serde_json::json!(0)).is_err());
    }

    #[test]
    fn stream_options_reject_unknown_bits() {
        let opts = StreamOptions::from_bits(8 | 16).unwrap();
        assert!(opts.contains(StreamOptions::MULTIPLEXING));
        assert!(opts.contains(StreamOptions::PORT_FORWARDING));
        assert!(!opts.contains(StreamOptions::PLAIN));
        assert!(StreamOptions::from_bits(32).is_none());
    }

    #[test]
    fn friend_info_shape() {
        let info = FriendInfo {
            status: ConnectionStatus::Connected,
            label: "bob".into(),
            presence: PresenceStatus::None,
            user_info: UserInfo {
                user_id: "u1".into(),
                ..UserInfo::default()
            },
        };
        let v = serde_json::to_value(&info).unwrap();
        assert_eq!(v["status"], 0);
        assert_eq!(v["userInfo"]["userId"], "u1");
        assert_eq!(v["userInfo"]["hasAvatar"], false);
    }
}
