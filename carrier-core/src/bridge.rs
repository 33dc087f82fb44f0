//! The bridge: handle tables, listener registry and router wired to a native library,
//! plus the command dispatcher the JavaScript host calls.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::command::{Command, SelfInfoField};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, CommandError, NativeError};
use crate::event::{FileTransferEvent, FriendInviteEvent, GroupEvent, SessionEvent, StreamEvent};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::listener::{EventCategory, EventSink, ListenerRegistry};
use crate::native::{
    FriendInfo, GroupPeer, NativeCarrier, NativeFileTransfer, NativeGroup, NativeLibrary,
    NativeSession, NativeStream,
};
use crate::router::{EventRouter, Origin};

/// Result string of commands that have nothing else to report.
pub const SUCCESS: &str = "Success!";

const DEFAULT_GROUP_TITLE: &str = "Untitled";

/// Supplies the sink installed by the `setListener` command. The host decides where
/// events for a category go; the bridge only asks when the command arrives.
pub type SinkProvider = Arc<dyn Fn(EventCategory) -> Arc<dyn EventSink> + Send + Sync>;

/// A group and the id the caller knows it by.
pub struct GroupEntry {
    pub native: Box<dyn NativeGroup>,
    pub group_id: String,
}

pub struct Bridge {
    library: Arc<dyn NativeLibrary>,
    config: BridgeConfig,
    router: Arc<EventRouter>,
    carriers: HandleTable<Box<dyn NativeCarrier>>,
    /// Owned by their carrier.
    sessions: HandleTable<Box<dyn NativeSession>>,
    /// Owned by their session.
    streams: HandleTable<Box<dyn NativeStream>>,
    /// Owned by their carrier.
    groups: HandleTable<GroupEntry>,
    group_ids: RwLock<HashMap<String, Handle>>,
    /// Owned by their carrier.
    transfers: HandleTable<Box<dyn NativeFileTransfer>>,
    sink_provider: RwLock<Option<SinkProvider>>,
}

fn friend_map(friends: &[FriendInfo]) -> Value {
    Value::Object(
        friends
            .iter()
            .map(|f| (f.user_id().to_owned(), json!(f)))
            .collect(),
    )
}

fn peer_map(peers: &[GroupPeer]) -> Value {
    Value::Object(
        peers
            .iter()
            .map(|p| (p.user_id.clone(), json!(p)))
            .collect(),
    )
}

impl Bridge {
    pub fn new(library: Arc<dyn NativeLibrary>, config: BridgeConfig) -> Self {
        let listeners = Arc::new(ListenerRegistry::new());
        Self {
            library,
            config,
            router: Arc::new(EventRouter::new(listeners)),
            carriers: HandleTable::new(HandleKind::Carrier),
            sessions: HandleTable::new(HandleKind::Session),
            streams: HandleTable::new(HandleKind::Stream),
            groups: HandleTable::new(HandleKind::Group),
            group_ids: RwLock::new(HashMap::new()),
            transfers: HandleTable::new(HandleKind::FileTransfer),
            sink_provider: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        self.router.listeners()
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    /// Replace the sink for `category`. Events already in flight go to whichever sink is
    /// registered when they are delivered.
    pub fn set_listener(&self, category: EventCategory, sink: Arc<dyn EventSink>) {
        self.listeners().set_listener(category, sink);
    }

    /// Source of sinks for the `setListener` command.
    pub fn set_sink_provider(&self, provider: SinkProvider) {
        *self.sink_provider.write() = Some(provider);
    }

    pub fn clear_sink_provider(&self) {
        self.sink_provider.write().take();
    }

    /// Number of live handles of one kind.
    pub fn live(&self, kind: HandleKind) -> usize {
        match kind {
            HandleKind::Carrier => self.carriers.len(),
            HandleKind::Session => self.sessions.len(),
            HandleKind::Stream => self.streams.len(),
            HandleKind::Group => self.groups.len(),
            HandleKind::FileTransfer => self.transfers.len(),
        }
    }

    /// Run one command. On failure the returned error's `Display` is the message for
    /// the caller's error channel.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> Result<Value, CommandError> {
        Command::parse(name, args)
            .and_then(|cmd| self.execute(cmd))
            .map_err(|e| {
                tracing::debug!(command = name, error = %e, "command failed");
                CommandError::new(name, e)
            })
    }

    /// Destroy every carrier instance. Used by hosts on teardown.
    pub fn shutdown(&self) {
        let handles = self.carriers.handles();
        let count = handles.len();
        for h in handles {
            // A concurrent destroy may have won; nothing left to do then.
            let _ = self.destroy_carrier(h);
        }
        if count > 0 {
            tracing::info!(count, "bridge shut down");
        }
    }

    fn group_by_id(&self, group_id: &str) -> Result<(Handle, Arc<GroupEntry>), BridgeError> {
        let handle = self
            .group_ids
            .read()
            .get(group_id)
            .copied()
            .ok_or(BridgeError::InvalidHandle(HandleKind::Group))?;
        Ok((handle, self.groups.get(handle)?))
    }

    /// Fails when `carrier` was destroyed while its child was being created. The child is
    /// taken out of `table` and released unless the destroy cascade already did so.
    fn ensure_carrier<T>(
        &self,
        carrier: Handle,
        table: &HandleTable<T>,
        child: Handle,
        release: impl FnOnce(&T),
    ) -> Result<(), BridgeError> {
        if self.carriers.contains(carrier) {
            return Ok(());
        }
        if let Some(orphan) = table.remove(child) {
            release(&orphan);
        }
        tracing::debug!(%carrier, %child, "carrier destroyed during child creation");
        Err(BridgeError::InvalidHandle(HandleKind::Carrier))
    }

    fn register_group(
        &self,
        handle: Handle,
        carrier: Handle,
        entry: GroupEntry,
    ) -> Result<Value, BridgeError> {
        let group_id = entry.group_id.clone();
        self.groups.insert(handle, Some(carrier), entry);
        self.group_ids.write().insert(group_id.clone(), handle);
        if let Err(e) = self.ensure_carrier(carrier, &self.groups, handle, |g| {
            let _ = g.native.leave();
        }) {
            self.group_ids.write().remove(&group_id);
            return Err(e);
        }
        tracing::debug!(%carrier, group = %group_id, "group registered");
        Ok(json!({ "groupId": group_id }))
    }

    fn forget_group(&self, handle: Handle) {
        if let Some(entry) = self.groups.remove(handle) {
            self.group_ids.write().remove(&entry.group_id);
        }
    }

    fn close_session(&self, handle: Handle) -> Result<(), BridgeError> {
        let session = self
            .sessions
            .remove(handle)
            .ok_or(BridgeError::InvalidHandle(HandleKind::Session))?;
        let streams = self.streams.remove_owned_by(handle);
        session.close();
        tracing::debug!(session = %handle, streams = streams.len(), "session closed");
        Ok(())
    }

    fn destroy_carrier(&self, handle: Handle) -> Result<(), BridgeError> {
        let carrier = self
            .carriers
            .remove(handle)
            .ok_or(BridgeError::InvalidHandle(HandleKind::Carrier))?;
        for (session, native) in self.sessions.remove_owned_by(handle) {
            self.streams.remove_owned_by(session);
            native.close();
        }
        for (group, _) in self.groups.remove_owned_by(handle) {
            self.group_ids.write().retain(|_, h| *h != group);
        }
        for (_, transfer) in self.transfers.remove_owned_by(handle) {
            transfer.close();
        }
        carrier.kill();
        tracing::info!(carrier = %handle, "carrier destroyed");
        Ok(())
    }

    fn execute(&self, cmd: Command) -> Result<Value, BridgeError> {
        match cmd {
            Command::SetListener { category } => {
                let provider = self.sink_provider.read().clone().ok_or_else(|| {
                    BridgeError::invalid_argument("no event channel for setListener")
                })?;
                self.set_listener(category, provider(category));
                Ok(Value::Null)
            }
            Command::GetVersion => Ok(json!(self.library.version())),
            Command::GetIdFromAddress { address } => self
                .library
                .id_from_address(&address)
                .map(Value::String)
                .ok_or(BridgeError::Native(NativeError::INVALID_ARGS)),
            Command::IsValidAddress { address } => {
                Ok(json!(self.library.is_valid_address(&address).to_string()))
            }
            Command::IsValidId { id } => Ok(json!(self.library.is_valid_id(&id).to_string())),
            Command::CreateObject { dir, config } => {
                let options = self.config.carrier_options(&dir, config)?;
                let handle = self.carriers.reserve();
                let native = match self
                    .library
                    .create_carrier(options, self.router.callback(Origin::new(handle)))
                {
                    Ok(native) => native,
                    Err(e) => {
                        self.carriers.release(handle);
                        return Err(e.into());
                    }
                };
                let summary = (|| -> Result<Value, NativeError> {
                    Ok(json!({
                        "id": handle,
                        "nodeId": native.node_id(),
                        "userId": native.user_id(),
                        "address": native.address(),
                        "nospam": native.nospam()?,
                        "presence": native.presence()?,
                    }))
                })();
                match summary {
                    Ok(summary) => {
                        tracing::info!(carrier = %handle, dir = %dir, "carrier created");
                        self.carriers.insert(handle, None, native);
                        Ok(summary)
                    }
                    Err(e) => {
                        native.kill();
                        self.carriers.release(handle);
                        Err(e.into())
                    }
                }
            }

            Command::CarrierStart { carrier, interval } => {
                self.carriers.get(carrier)?.start(interval)?;
                Ok(json!("ok"))
            }
            Command::IsReady { carrier } => {
                Ok(json!({ "isReady": self.carriers.get(carrier)?.is_ready() }))
            }
            Command::GetSelfInfo { carrier } => Ok(json!(self.carriers.get(carrier)?.self_info()?)),
            Command::SetSelfInfo {
                carrier,
                field,
                name,
                value,
            } => {
                let native = self.carriers.get(carrier)?;
                let mut info = native.self_info()?;
                match field {
                    SelfInfoField::Name => info.name = value.clone(),
                    SelfInfoField::Description => info.description = value.clone(),
                    SelfInfoField::Gender => info.gender = value.clone(),
                    SelfInfoField::Phone => info.phone = value.clone(),
                    SelfInfoField::Email => info.email = value.clone(),
                    SelfInfoField::Region => info.region = value.clone(),
                    SelfInfoField::HasAvatar => info.has_avatar = value == "true",
                }
                native.set_self_info(info)?;
                Ok(json!({ "name": name, "value": value }))
            }
            Command::GetNospam { carrier } => {
                Ok(json!({ "nospam": self.carriers.get(carrier)?.nospam()? }))
            }
            Command::SetNospam { carrier, nospam } => {
                self.carriers.get(carrier)?.set_nospam(nospam)?;
                Ok(json!({ "nospam": nospam }))
            }
            Command::GetPresence { carrier } => {
                Ok(json!({ "presence": self.carriers.get(carrier)?.presence()? }))
            }
            Command::SetPresence { carrier, presence } => {
                self.carriers.get(carrier)?.set_presence(presence)?;
                Ok(json!({ "presence": presence }))
            }
            Command::GetFriends { carrier } => {
                let friends = self.carriers.get(carrier)?.friends()?;
                Ok(json!({ "friends": friend_map(&friends) }))
            }
            Command::GetFriend { carrier, user_id } => {
                Ok(json!(self.carriers.get(carrier)?.friend(&user_id)?))
            }
            Command::LabelFriend {
                carrier,
                user_id,
                label,
            } => {
                self.carriers.get(carrier)?.label_friend(&user_id, &label)?;
                Ok(json!({ "userId": user_id, "label": label }))
            }
            Command::IsFriend { carrier, user_id } => {
                let is_friend = self.carriers.get(carrier)?.is_friend(&user_id)?;
                Ok(json!({ "userId": user_id, "isFriend": is_friend }))
            }
            Command::AcceptFriend { carrier, user_id } => {
                self.carriers.get(carrier)?.accept_friend(&user_id)?;
                Ok(json!({ "userId": user_id }))
            }
            Command::RemoveFriend { carrier, user_id } => {
                self.carriers.get(carrier)?.remove_friend(&user_id)?;
                Ok(json!({ "userId": user_id }))
            }
            Command::AddFriend {
                carrier,
                address,
                hello,
            } => {
                self.carriers.get(carrier)?.add_friend(&address, &hello)?;
                Ok(json!({ "address": address }))
            }
            Command::SendFriendMessage {
                carrier,
                to,
                message,
            } => {
                let is_offline = self
                    .carriers
                    .get(carrier)?
                    .send_friend_message(&to, message.as_bytes())?;
                Ok(json!({ "isOffline": is_offline }))
            }
            Command::InviteFriend {
                carrier,
                to,
                data,
                handler_id,
            } => {
                let native = self.carriers.get(carrier)?;
                let callback = self
                    .router
                    .callback::<FriendInviteEvent>(Origin::new(carrier).with_handler(handler_id));
                native.invite_friend(&to, &data, callback)?;
                Ok(json!({ "to": to, "data": data }))
            }
            Command::ReplyFriendInvite {
                carrier,
                to,
                status,
                reason,
                data,
            } => {
                self.carriers.get(carrier)?.reply_friend_invite(
                    &to,
                    status,
                    reason.as_deref(),
                    data.as_deref(),
                )?;
                Ok(json!({ "to": to, "status": status, "reason": reason, "data": data }))
            }
            Command::Destroy { carrier } => {
                self.destroy_carrier(carrier)?;
                Ok(json!({}))
            }

            Command::NewSession { carrier, to } => {
                let session = self.carriers.get(carrier)?.new_session(&to)?;
                let peer = session.peer();
                let handle = self.sessions.register_owned(carrier, session);
                self.ensure_carrier(carrier, &self.sessions, handle, |s| s.close())?;
                Ok(json!({ "id": handle, "peer": peer }))
            }
            Command::SessionClose { session } => {
                self.close_session(session)?;
                Ok(Value::Null)
            }
            Command::GetPeer { session } => Ok(json!({ "peer": self.sessions.get(session)?.peer() })),
            Command::SessionRequest {
                session,
                handler_id,
            } => {
                let native = self.sessions.get(session)?;
                let callback = self
                    .router
                    .callback::<SessionEvent>(Origin::new(session).with_handler(handler_id));
                native.request(callback)?;
                Ok(Value::Null)
            }
            Command::SessionReplyRequest {
                session,
                status,
                reason,
            } => {
                self.sessions
                    .get(session)?
                    .reply_request(status, reason.as_deref())?;
                Ok(json!({ "status": status, "reason": reason }))
            }
            Command::SessionStart { session, sdp } => {
                self.sessions.get(session)?.start(&sdp)?;
                Ok(json!({ "sdp": sdp }))
            }
            Command::AddStream {
                session,
                stream_type,
                options,
            } => {
                let native = self.sessions.get(session)?;
                let handle = self.streams.reserve();
                let callback = self.router.callback::<StreamEvent>(Origin::new(handle));
                let stream = match native.add_stream(stream_type, options, callback) {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.streams.release(handle);
                        return Err(e.into());
                    }
                };
                let stream_id = stream.id();
                self.streams.insert(handle, Some(session), stream);
                // Lost a race with sessionClose: the stream died with its session.
                if !self.sessions.contains(session) {
                    self.streams.remove(handle);
                    return Err(BridgeError::InvalidHandle(HandleKind::Session));
                }
                Ok(json!({
                    "objId": handle,
                    "id": stream_id,
                    "type": stream_type,
                    "options": options,
                }))
            }
            Command::RemoveStream { session, stream } => {
                let native = self.sessions.get(session)?;
                if self.streams.owner_of(stream) != Some(session) {
                    return Err(BridgeError::InvalidHandle(HandleKind::Stream));
                }
                let target = self.streams.get(stream)?;
                native.remove_stream(target.id())?;
                self.streams.remove(stream);
                Ok(Value::Null)
            }
            Command::AddService {
                session,
                service,
                protocol,
                host,
                port,
            } => {
                self.sessions
                    .get(session)?
                    .add_service(&service, protocol, &host, &port)?;
                Ok(json!({ "service": service, "protocol": protocol, "host": host, "port": port }))
            }
            Command::RemoveService { session, service } => {
                self.sessions.get(session)?.remove_service(&service);
                Ok(json!({ "service": service }))
            }

            Command::GetTransportInfo { stream } => {
                Ok(json!(self.streams.get(stream)?.transport_info()?))
            }
            Command::StreamWrite { stream, data } => {
                let written = self.streams.get(stream)?.write(&data)?;
                Ok(json!({ "written": written }))
            }
            Command::OpenChannel { stream, cookie } => {
                let channel = self.streams.get(stream)?.open_channel(&cookie)?;
                Ok(json!({ "channel": channel }))
            }
            Command::CloseChannel { stream, channel } => {
                self.streams.get(stream)?.close_channel(channel)?;
                Ok(json!({ "channel": channel }))
            }
            Command::WriteChannel {
                stream,
                channel,
                data,
            } => {
                let written = self.streams.get(stream)?.write_channel(channel, &data)?;
                Ok(json!({ "channel": channel, "written": written }))
            }
            Command::PendChannel { stream, channel } => {
                self.streams.get(stream)?.pend_channel(channel)?;
                Ok(json!({ "channel": channel }))
            }
            Command::ResumeChannel { stream, channel } => {
                self.streams.get(stream)?.resume_channel(channel)?;
                Ok(json!({ "channel": channel }))
            }
            Command::OpenPortForwarding {
                stream,
                service,
                protocol,
                host,
                port,
            } => {
                let pf_id = self
                    .streams
                    .get(stream)?
                    .open_port_forwarding(&service, protocol, &host, &port)?;
                Ok(json!({
                    "pfId": pf_id,
                    "service": service,
                    "protocol": protocol,
                    "host": host,
                    "port": port,
                }))
            }
            Command::ClosePortForwarding { stream, pf_id } => {
                self.streams.get(stream)?.close_port_forwarding(pf_id)?;
                Ok(json!({ "pfId": pf_id }))
            }

            Command::CreateGroup { carrier } => {
                let native = self.carriers.get(carrier)?;
                let group_id = uuid::Uuid::new_v4().simple().to_string();
                let handle = self.groups.reserve();
                let callback = self
                    .router
                    .callback::<GroupEvent>(Origin::new(handle).with_group(group_id.clone()));
                let group = native.new_group(callback).and_then(|g| {
                    match g.set_title(DEFAULT_GROUP_TITLE) {
                        Ok(()) => Ok(g),
                        Err(e) => {
                            let _ = g.leave();
                            Err(e)
                        }
                    }
                });
                match group {
                    Ok(group) => self.register_group(
                        handle,
                        carrier,
                        GroupEntry {
                            native: group,
                            group_id,
                        },
                    ),
                    Err(e) => {
                        self.groups.release(handle);
                        Err(e.into())
                    }
                }
            }
            Command::JoinGroup {
                carrier,
                friend_id,
                cookie,
            } => {
                let native = self.carriers.get(carrier)?;
                let group_id = uuid::Uuid::new_v4().simple().to_string();
                let handle = self.groups.reserve();
                let callback = self
                    .router
                    .callback::<GroupEvent>(Origin::new(handle).with_group(group_id.clone()));
                match native.join_group(&friend_id, &cookie, callback) {
                    Ok(group) => self.register_group(
                        handle,
                        carrier,
                        GroupEntry {
                            native: group,
                            group_id,
                        },
                    ),
                    Err(e) => {
                        self.groups.release(handle);
                        Err(e.into())
                    }
                }
            }
            Command::InviteGroup {
                group_id,
                friend_id,
            } => {
                self.group_by_id(&group_id)?.1.native.invite(&friend_id)?;
                Ok(json!(SUCCESS))
            }
            Command::LeaveGroup { carrier, group_id } => {
                self.carriers.get(carrier)?;
                let (handle, entry) = self.group_by_id(&group_id)?;
                if self.groups.owner_of(handle) != Some(carrier) {
                    return Err(BridgeError::InvalidHandle(HandleKind::Group));
                }
                entry.native.leave()?;
                self.forget_group(handle);
                Ok(json!(SUCCESS))
            }
            Command::SendGroupMessage { group_id, message } => {
                self.group_by_id(&group_id)?
                    .1
                    .native
                    .send_message(message.as_bytes())?;
                Ok(json!(SUCCESS))
            }
            Command::GetGroupTitle { group_id } => {
                let title = self.group_by_id(&group_id)?.1.native.title()?;
                Ok(json!({ "groupTitle": title }))
            }
            Command::SetGroupTitle { group_id, title } => {
                let (_, entry) = self.group_by_id(&group_id)?;
                entry.native.set_title(&title)?;
                Ok(json!({ "groupTitle": entry.native.title()? }))
            }
            Command::GetGroupPeers { group_id } => {
                let peers = self.group_by_id(&group_id)?.1.native.peers()?;
                Ok(json!({ "peers": peer_map(&peers) }))
            }
            Command::GetGroupPeer { group_id, peer_id } => {
                let peer = self.group_by_id(&group_id)?.1.native.peer(&peer_id)?;
                Ok(json!({ "peer": peer }))
            }

            Command::GenerateFileTransFileId => {
                Ok(json!({ "fileId": self.library.generate_file_id() }))
            }
            Command::NewFileTransfer { carrier, to, info } => {
                let native = self.carriers.get(carrier)?;
                let handle = self.transfers.reserve();
                let callback = self.router.callback::<FileTransferEvent>(Origin::new(handle));
                match native.new_file_transfer(&to, info, callback) {
                    Ok(transfer) => {
                        self.transfers.insert(handle, Some(carrier), transfer);
                        self.ensure_carrier(carrier, &self.transfers, handle, |t| t.close())?;
                        Ok(json!({ "fileTransferId": handle }))
                    }
                    Err(e) => {
                        self.transfers.release(handle);
                        Err(e.into())
                    }
                }
            }
            Command::CloseFileTrans { transfer } => {
                self.transfers
                    .remove(transfer)
                    .ok_or(BridgeError::InvalidHandle(HandleKind::FileTransfer))?
                    .close();
                Ok(json!(SUCCESS))
            }
            Command::GetFileTransFileId { transfer, filename } => {
                let file_id = self.transfers.get(transfer)?.file_id(&filename)?;
                Ok(json!({ "fileId": file_id }))
            }
            Command::GetFileTransFileName { transfer, file_id } => {
                let filename = self.transfers.get(transfer)?.file_name(&file_id)?;
                Ok(json!({ "filename": filename }))
            }
            Command::FileTransConnect { transfer } => {
                self.transfers.get(transfer)?.connect()?;
                Ok(json!(SUCCESS))
            }
            Command::AcceptFileTransConnect { transfer } => {
                self.transfers.get(transfer)?.accept_connect()?;
                Ok(json!(SUCCESS))
            }
            Command::AddFileTransFile { transfer, info } => {
                self.transfers.get(transfer)?.add_file(info)?;
                Ok(json!(SUCCESS))
            }
            Command::PullFileTransData {
                transfer,
                file_id,
                offset,
            } => {
                self.transfers.get(transfer)?.pull_data(&file_id, offset)?;
                Ok(json!(SUCCESS))
            }
            Command::WriteFileTransData {
                transfer,
                file_id,
                data,
            } => {
                self.transfers.get(transfer)?.write_data(&file_id, &data)?;
                Ok(json!(SUCCESS))
            }
            Command::SendFileTransFinish { transfer, file_id } => {
                self.transfers.get(transfer)?.send_finish(&file_id)?;
                Ok(json!(SUCCESS))
            }
            Command::CancelFileTrans {
                transfer,
                file_id,
                status,
                reason,
            } => {
                self.transfers
                    .get(transfer)?
                    .cancel_transfer(&file_id, status, &reason)?;
                Ok(json!(SUCCESS))
            }
            Command::PendFileTrans { transfer, file_id } => {
                self.transfers.get(transfer)?.pend_transfer(&file_id)?;
                Ok(json!(SUCCESS))
            }
            Command::ResumeFileTrans { transfer, file_id } => {
                self.transfers.get(transfer)?.resume_transfer(&file_id)?;
                Ok(json!(SUCCESS))
            }
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("carriers", &self.carriers.len())
            .field("sessions", &self.sessions.len())
            .field("streams", &self.streams.len())
            .field("groups", &self.groups.len())
            .field("transfers", &self.transfers.len())
            .finish()
    }
}
