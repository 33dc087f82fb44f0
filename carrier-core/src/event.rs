//! Native events, one tagged union per category, and the JSON record handed to sinks.

use base64::Engine as _;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::handle::Handle;
use crate::listener::EventCategory;
use crate::native::{
    serialize_friend_map, CloseReason, ConnectionStatus, FileTransferInfo, FileTransferState,
    FriendInfo, PresenceStatus, StreamState, UserInfo,
};
use crate::router::Origin;

/// A native event belonging to exactly one category.
pub trait Event: Serialize + Send + 'static {
    const CATEGORY: EventCategory;
}

/// Instance lifecycle, friend and incoming-request events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum CarrierEvent {
    #[serde(rename = "onIdle")]
    Idle,
    #[serde(rename = "onConnection")]
    Connection { status: ConnectionStatus },
    #[serde(rename = "onReady")]
    Ready,
    #[serde(rename = "onSelfInfoChanged", rename_all = "camelCase")]
    SelfInfoChanged { user_info: UserInfo },
    #[serde(rename = "onFriends")]
    Friends {
        #[serde(serialize_with = "serialize_friend_map")]
        friends: Vec<FriendInfo>,
    },
    #[serde(rename = "onFriendConnection", rename_all = "camelCase")]
    FriendConnection {
        friend_id: String,
        status: ConnectionStatus,
    },
    #[serde(rename = "onFriendInfoChanged", rename_all = "camelCase")]
    FriendInfoChanged {
        friend_id: String,
        friend_info: FriendInfo,
    },
    #[serde(rename = "onFriendPresence", rename_all = "camelCase")]
    FriendPresence {
        friend_id: String,
        presence: PresenceStatus,
    },
    #[serde(rename = "onFriendAdded", rename_all = "camelCase")]
    FriendAdded { friend_info: FriendInfo },
    #[serde(rename = "onFriendRemoved", rename_all = "camelCase")]
    FriendRemoved { friend_id: String },
    #[serde(rename = "onFriendRequest", rename_all = "camelCase")]
    FriendRequest {
        user_id: String,
        user_info: UserInfo,
        hello: String,
    },
    #[serde(rename = "onFriendMessage", rename_all = "camelCase")]
    FriendMessage {
        from: String,
        #[serde(serialize_with = "utf8_text")]
        message: Vec<u8>,
        is_offline: bool,
    },
    #[serde(rename = "onFriendInviteRequest")]
    FriendInviteRequest {
        from: String,
        #[serde(rename = "message")]
        data: String,
    },
    #[serde(rename = "onSessionRequest")]
    SessionRequest { from: String, sdp: String },
    #[serde(rename = "onGroupInvite")]
    GroupInvite {
        from: String,
        #[serde(rename = "cookieCode", serialize_with = "base58_bytes")]
        cookie: Vec<u8>,
    },
    #[serde(rename = "onConnectRequest")]
    ConnectRequest { from: String, info: FileTransferInfo },
}

impl Event for CarrierEvent {
    const CATEGORY: EventCategory = EventCategory::Lifecycle;
}

/// Completion of a session request, tagged with the caller's handler id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum SessionEvent {
    #[serde(rename = "onCompletion")]
    Completion {
        status: i32,
        reason: Option<String>,
        sdp: Option<String>,
    },
}

impl Event for SessionEvent {
    const CATEGORY: EventCategory = EventCategory::Session;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum StreamEvent {
    #[serde(rename = "onStateChanged")]
    StateChanged { state: StreamState },
    #[serde(rename = "onStreamData")]
    StreamData {
        #[serde(serialize_with = "base64_bytes")]
        data: Vec<u8>,
    },
    #[serde(rename = "onChannelOpen")]
    ChannelOpen { channel: i32, cookie: String },
    #[serde(rename = "onChannelOpened")]
    ChannelOpened { channel: i32 },
    #[serde(rename = "onChannelClose")]
    ChannelClose { channel: i32, reason: CloseReason },
    #[serde(rename = "onChannelData")]
    ChannelData {
        channel: i32,
        #[serde(serialize_with = "base64_bytes")]
        data: Vec<u8>,
    },
    #[serde(rename = "onChannelPending")]
    ChannelPending { channel: i32 },
    #[serde(rename = "onChannelResume")]
    ChannelResume { channel: i32 },
}

impl Event for StreamEvent {
    const CATEGORY: EventCategory = EventCategory::Stream;
}

/// Peer's reply to a friend invite, tagged with the caller's handler id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum FriendInviteEvent {
    #[serde(rename = "onReceived")]
    Received {
        from: String,
        status: i32,
        reason: Option<String>,
        data: Option<String>,
    },
}

impl Event for FriendInviteEvent {
    const CATEGORY: EventCategory = EventCategory::FriendInvite;
}

/// Group events, tagged with the generated group id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum GroupEvent {
    #[serde(rename = "onGroupConnected")]
    Connected,
    #[serde(rename = "onGroupMessage")]
    Message {
        from: String,
        #[serde(serialize_with = "utf8_text")]
        message: Vec<u8>,
    },
    #[serde(rename = "onGroupTitle")]
    Title { from: String, title: String },
    #[serde(rename = "onPeerName", rename_all = "camelCase")]
    PeerName { peer_id: String, peer_name: String },
    #[serde(rename = "onPeerListChanged")]
    PeerListChanged,
}

impl Event for GroupEvent {
    const CATEGORY: EventCategory = EventCategory::Group;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum FileTransferEvent {
    #[serde(rename = "onStateChanged")]
    StateChanged { state: FileTransferState },
    #[serde(rename = "onFileRequest", rename_all = "camelCase")]
    FileRequest {
        file_id: String,
        filename: String,
        size: u64,
    },
    #[serde(rename = "onPullRequest", rename_all = "camelCase")]
    PullRequest { file_id: String, offset: u64 },
    #[serde(rename = "onData", rename_all = "camelCase")]
    Data {
        file_id: String,
        #[serde(serialize_with = "base64_bytes")]
        data: Vec<u8>,
    },
    #[serde(rename = "onDataFinished", rename_all = "camelCase")]
    DataFinished { file_id: String },
    #[serde(rename = "onPending", rename_all = "camelCase")]
    Pending { file_id: String },
    #[serde(rename = "onResume", rename_all = "camelCase")]
    Resume { file_id: String },
    #[serde(rename = "onCancel", rename_all = "camelCase")]
    Cancel {
        file_id: String,
        status: i32,
        reason: String,
    },
}

impl Event for FileTransferEvent {
    const CATEGORY: EventCategory = EventCategory::FileTransfer;
}

fn utf8_text<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| S::Error::custom(format!("message is not valid utf-8: {e}")))?;
    s.serialize_str(text)
}

fn base64_bytes<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn base58_bytes<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&bs58::encode(bytes).into_string())
}

/// What a sink receives: routing metadata plus the event's own fields, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub category: EventCategory,
    pub name: String,
    /// Handle of the originating object.
    pub id: Handle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_transfer_id: Option<Handle>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventRecord {
    pub fn new(category: EventCategory, name: impl Into<String>, id: Handle) -> Self {
        Self {
            category,
            name: name.into(),
            id,
            handler_id: None,
            group_id: None,
            file_transfer_id: None,
            fields: Map::new(),
        }
    }

    /// Build the record for `event` raised by the object described by `origin`.
    pub fn from_event<E: Event>(origin: &Origin, event: &E) -> Result<Self, BridgeError> {
        let value =
            serde_json::to_value(event).map_err(|e| BridgeError::EventPayload(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(BridgeError::EventPayload("event is not an object".into()));
        };
        let name = match fields.remove("name") {
            Some(Value::String(name)) => name,
            _ => return Err(BridgeError::EventPayload("event has no name".into())),
        };
        let mut record = EventRecord::new(E::CATEGORY, name, origin.handle);
        record.handler_id = origin.handler_id;
        record.group_id = origin.group_id.clone();
        if E::CATEGORY == EventCategory::FileTransfer {
            record.file_transfer_id = Some(origin.handle);
        }
        record.fields = fields;
        Ok(record)
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
