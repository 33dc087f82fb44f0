//! Command set: every operation the JavaScript side can invoke, parsed from
//! `(name, positional args)` into a typed value before anything is looked up.

use serde_json::Value;

use crate::args::Args;
use crate::config::InstanceConfig;
use crate::error::BridgeError;
use crate::handle::Handle;
use crate::listener::EventCategory;
use crate::native::{FileTransferInfo, PortForwardingProtocol, PresenceStatus, StreamOptions, StreamType};

/// Field of the self profile addressed by `setSelfInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfInfoField {
    Name,
    Description,
    Gender,
    Phone,
    Email,
    Region,
    HasAvatar,
}

impl SelfInfoField {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "name" => SelfInfoField::Name,
            "description" => SelfInfoField::Description,
            "gender" => SelfInfoField::Gender,
            "phone" => SelfInfoField::Phone,
            "email" => SelfInfoField::Email,
            "region" => SelfInfoField::Region,
            "hasAvatar" => SelfInfoField::HasAvatar,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetListener { category: EventCategory },
    GetVersion,
    GetIdFromAddress { address: String },
    IsValidAddress { address: String },
    IsValidId { id: String },
    CreateObject { dir: String, config: InstanceConfig },

    CarrierStart { carrier: Handle, interval: u32 },
    IsReady { carrier: Handle },
    GetSelfInfo { carrier: Handle },
    SetSelfInfo { carrier: Handle, field: SelfInfoField, name: String, value: String },
    GetNospam { carrier: Handle },
    SetNospam { carrier: Handle, nospam: u32 },
    GetPresence { carrier: Handle },
    SetPresence { carrier: Handle, presence: PresenceStatus },
    GetFriends { carrier: Handle },
    GetFriend { carrier: Handle, user_id: String },
    LabelFriend { carrier: Handle, user_id: String, label: String },
    IsFriend { carrier: Handle, user_id: String },
    AcceptFriend { carrier: Handle, user_id: String },
    RemoveFriend { carrier: Handle, user_id: String },
    AddFriend { carrier: Handle, address: String, hello: String },
    SendFriendMessage { carrier: Handle, to: String, message: String },
    InviteFriend { carrier: Handle, to: String, data: String, handler_id: i64 },
    ReplyFriendInvite {
        carrier: Handle,
        to: String,
        status: i32,
        reason: Option<String>,
        data: Option<String>,
    },
    Destroy { carrier: Handle },

    NewSession { carrier: Handle, to: String },
    SessionClose { session: Handle },
    GetPeer { session: Handle },
    SessionRequest { session: Handle, handler_id: i64 },
    SessionReplyRequest { session: Handle, status: i32, reason: Option<String> },
    SessionStart { session: Handle, sdp: String },
    AddStream { session: Handle, stream_type: StreamType, options: StreamOptions },
    RemoveStream { session: Handle, stream: Handle },
    AddService {
        session: Handle,
        service: String,
        protocol: PortForwardingProtocol,
        host: String,
        port: String,
    },
    RemoveService { session: Handle, service: String },

    GetTransportInfo { stream: Handle },
    StreamWrite { stream: Handle, data: Vec<u8> },
    OpenChannel { stream: Handle, cookie: String },
    CloseChannel { stream: Handle, channel: i32 },
    WriteChannel { stream: Handle, channel: i32, data: Vec<u8> },
    PendChannel { stream: Handle, channel: i32 },
    ResumeChannel { stream: Handle, channel: i32 },
    OpenPortForwarding {
        stream: Handle,
        service: String,
        protocol: PortForwardingProtocol,
        host: String,
        port: String,
    },
    ClosePortForwarding { stream: Handle, pf_id: i32 },

    CreateGroup { carrier: Handle },
    JoinGroup { carrier: Handle, friend_id: String, cookie: Vec<u8> },
    InviteGroup { group_id: String, friend_id: String },
    LeaveGroup { carrier: Handle, group_id: String },
    SendGroupMessage { group_id: String, message: String },
    GetGroupTitle { group_id: String },
    SetGroupTitle { group_id: String, title: String },
    GetGroupPeers { group_id: String },
    GetGroupPeer { group_id: String, peer_id: String },

    GenerateFileTransFileId,
    NewFileTransfer { carrier: Handle, to: String, info: Option<FileTransferInfo> },
    CloseFileTrans { transfer: Handle },
    GetFileTransFileId { transfer: Handle, filename: String },
    GetFileTransFileName { transfer: Handle, file_id: String },
    FileTransConnect { transfer: Handle },
    AcceptFileTransConnect { transfer: Handle },
    AddFileTransFile { transfer: Handle, info: FileTransferInfo },
    PullFileTransData { transfer: Handle, file_id: String, offset: u64 },
    WriteFileTransData { transfer: Handle, file_id: String, data: Vec<u8> },
    SendFileTransFinish { transfer: Handle, file_id: String },
    CancelFileTrans { transfer: Handle, file_id: String, status: i32, reason: String },
    PendFileTrans { transfer: Handle, file_id: String },
    ResumeFileTrans { transfer: Handle, file_id: String },
}

fn enum_arg<T>(args: &Args<'_>, i: usize, parse: fn(i32) -> Option<T>, what: &str) -> Result<T, BridgeError> {
    parse(args.i32(i)?).ok_or_else(|| BridgeError::invalid_argument(format!("unknown {what}")))
}

impl Command {
    /// Parse a command. Argument count and types are checked here; whether an id is
    /// live is only known once the bridge resolves it.
    pub fn parse(name: &str, values: &[Value]) -> Result<Command, BridgeError> {
        let a = Args::new(values);
        // Object-scoped commands name their target first.
        let target = || a.handle(0);

        let cmd = match name {
            "setListener" => {
                let code = a.int(0)?;
                let category = u8::try_from(code)
                    .ok()
                    .and_then(EventCategory::from_code)
                    .ok_or_else(|| BridgeError::invalid_argument(format!("unknown listener type {code}")))?;
                Command::SetListener { category }
            }
            "getVersion" => Command::GetVersion,
            "getIdFromAddress" => Command::GetIdFromAddress { address: a.non_empty(0)? },
            "isValidAddress" => Command::IsValidAddress { address: a.non_empty(0)? },
            "isValidId" => Command::IsValidId { id: a.non_empty(0)? },
            "createObject" => Command::CreateObject {
                dir: a.string(0)?,
                config: InstanceConfig::from_json(&a.string(1)?)?,
            },

            "carrierStart" => Command::CarrierStart { carrier: target()?, interval: a.u32(1)? },
            "isReady" => Command::IsReady { carrier: target()? },
            "getSelfInfo" => Command::GetSelfInfo { carrier: target()? },
            "setSelfInfo" => {
                let name = a.string(1)?;
                let field = SelfInfoField::parse(&name)
                    .ok_or_else(|| BridgeError::invalid_argument(format!("unknown self info field {name}")))?;
                Command::SetSelfInfo { carrier: target()?, field, name, value: a.string(2)? }
            }
            "getNospam" => Command::GetNospam { carrier: target()? },
            "setNospam" => Command::SetNospam { carrier: target()?, nospam: a.u32(1)? },
            "getPresence" => Command::GetPresence { carrier: target()? },
            "setPresence" => Command::SetPresence {
                carrier: target()?,
                presence: enum_arg(&a, 1, PresenceStatus::from_value, "presence")?,
            },
            "getFriends" => Command::GetFriends { carrier: target()? },
            "getFriend" => Command::GetFriend { carrier: target()?, user_id: a.string(1)? },
            "labelFriend" => Command::LabelFriend {
                carrier: target()?,
                user_id: a.string(1)?,
                label: a.string(2)?,
            },
            "isFriend" => Command::IsFriend { carrier: target()?, user_id: a.string(1)? },
            "acceptFriend" => Command::AcceptFriend { carrier: target()?, user_id: a.string(1)? },
            "removeFriend" => Command::RemoveFriend { carrier: target()?, user_id: a.string(1)? },
            "addFriend" => Command::AddFriend {
                carrier: target()?,
                address: a.string(1)?,
                hello: a.string(2)?,
            },
            "sendFriendMessage" => Command::SendFriendMessage {
                carrier: target()?,
                to: a.string(1)?,
                message: a.string(2)?,
            },
            "inviteFriend" => Command::InviteFriend {
                carrier: target()?,
                to: a.string(1)?,
                data: a.string(2)?,
                handler_id: a.int(3)?,
            },
            "replyFriendInvite" => Command::ReplyFriendInvite {
                carrier: target()?,
                to: a.string(1)?,
                status: a.i32(2)?,
                reason: a.opt_string(3)?,
                data: a.opt_string(4)?,
            },
            "destroy" => Command::Destroy { carrier: target()? },

            "newSession" => Command::NewSession { carrier: target()?, to: a.string(1)? },
            "sessionClose" => Command::SessionClose { session: target()? },
            "getPeer" => Command::GetPeer { session: target()? },
            "sessionRequest" => Command::SessionRequest { session: target()?, handler_id: a.int(1)? },
            "sessionReplyRequest" => {
                let status = a.i32(1)?;
                // A refusal must say why.
                let reason = if status == 0 { a.opt_string(2)? } else { Some(a.string(2)?) };
                Command::SessionReplyRequest { session: target()?, status, reason }
            }
            "sessionStart" => Command::SessionStart { session: target()?, sdp: a.string(1)? },
            "addStream" => Command::AddStream {
                session: target()?,
                stream_type: enum_arg(&a, 1, StreamType::from_value, "stream type")?,
                options: StreamOptions::from_bits(a.u32(2)?)
                    .ok_or_else(|| BridgeError::invalid_argument("unknown stream options"))?,
            },
            "removeStream" => Command::RemoveStream {
                session: target()?,
                stream: a.handle(1)?,
            },
            "addService" => Command::AddService {
                session: target()?,
                service: a.non_empty(1)?,
                protocol: enum_arg(&a, 2, PortForwardingProtocol::from_value, "protocol")?,
                host: a.string(3)?,
                port: a.port(4)?,
            },
            "removeService" => Command::RemoveService { session: target()?, service: a.non_empty(1)? },

            "getTransportInfo" => Command::GetTransportInfo { stream: target()? },
            "streamWrite" => Command::StreamWrite { stream: target()?, data: a.base64(1)? },
            "openChannel" => Command::OpenChannel { stream: target()?, cookie: a.string(1)? },
            "closeChannel" => Command::CloseChannel { stream: target()?, channel: a.i32(1)? },
            "writeChannel" => Command::WriteChannel {
                stream: target()?,
                channel: a.i32(1)?,
                data: a.base64(2)?,
            },
            "pendChannel" => Command::PendChannel { stream: target()?, channel: a.i32(1)? },
            "resumeChannel" => Command::ResumeChannel { stream: target()?, channel: a.i32(1)? },
            "openPortForwarding" => Command::OpenPortForwarding {
                stream: target()?,
                service: a.non_empty(1)?,
                protocol: enum_arg(&a, 2, PortForwardingProtocol::from_value, "protocol")?,
                host: a.string(3)?,
                port: a.port(4)?,
            },
            "closePortForwarding" => Command::ClosePortForwarding { stream: target()?, pf_id: a.i32(1)? },

            "createGroup" => Command::CreateGroup { carrier: target()? },
            "joinGroup" => Command::JoinGroup {
                carrier: target()?,
                friend_id: a.string(1)?,
                cookie: a.base58(2)?,
            },
            "inviteGroup" => Command::InviteGroup { group_id: a.string(0)?, friend_id: a.string(1)? },
            "leaveGroup" => Command::LeaveGroup { carrier: target()?, group_id: a.string(1)? },
            "sendGroupMessage" => Command::SendGroupMessage { group_id: a.string(0)?, message: a.string(1)? },
            "getGroupTitle" => Command::GetGroupTitle { group_id: a.string(0)? },
            "setGroupTitle" => Command::SetGroupTitle { group_id: a.string(0)?, title: a.string(1)? },
            "getGroupPeers" => Command::GetGroupPeers { group_id: a.string(0)? },
            "getGroupPeer" => Command::GetGroupPeer { group_id: a.string(0)?, peer_id: a.string(1)? },

            "generateFileTransFileId" => Command::GenerateFileTransFileId,
            "newFileTransfer" => Command::NewFileTransfer {
                carrier: target()?,
                to: a.string(1)?,
                info: a.opt_object(2)?,
            },
            "closeFileTrans" => Command::CloseFileTrans { transfer: target()? },
            "getFileTransFileId" => Command::GetFileTransFileId { transfer: target()?, filename: a.string(1)? },
            "getFileTransFileName" => Command::GetFileTransFileName { transfer: target()?, file_id: a.string(1)? },
            "fileTransConnect" => Command::FileTransConnect { transfer: target()? },
            "acceptFileTransConnect" => Command::AcceptFileTransConnect { transfer: target()? },
            "addFileTransFile" => Command::AddFileTransFile { transfer: target()?, info: a.object(1)? },
            "pullFileTransData" => Command::PullFileTransData {
                transfer: target()?,
                file_id: a.string(1)?,
                offset: a.u64(2)?,
            },
            "writeFileTransData" => Command::WriteFileTransData {
                transfer: target()?,
                file_id: a.string(1)?,
                data: a.base64(2)?,
            },
            "sendFileTransFinish" => Command::SendFileTransFinish { transfer: target()?, file_id: a.string(1)? },
            "cancelFileTrans" => Command::CancelFileTrans {
                transfer: target()?,
                file_id: a.string(1)?,
                status: a.i32(2)?,
                reason: a.string(3)?,
            },
            "pendFileTrans" => Command::PendFileTrans { transfer: target()?, file_id: a.string(1)? },
            "resumeFileTrans" => Command::ResumeFileTrans { transfer: target()?, file_id: a.string(1)? },

            other => return Err(BridgeError::UnknownCommand(other.to_string())),
        };
        Ok(cmd)
    }
}
