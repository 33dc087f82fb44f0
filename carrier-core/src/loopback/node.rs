//! A loopback carrier instance: identity, profile, friends, and the per-node callback thread.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::identity::{self, Keypair};
use super::store::{self, FriendRecord, PersistedState};
use super::{group, session, transfer, Dispatcher, LoopbackNetwork};
use crate::error::{NativeError, NativeResult};
use crate::event::{CarrierEvent, FileTransferEvent, FriendInviteEvent, GroupEvent};
use crate::native::{
    CarrierOptions, ConnectionStatus, FileTransferInfo, FriendInfo, NativeCarrier, NativeFileTransfer,
    NativeGroup, NativeSession, PresenceStatus, UserInfo,
};
use crate::router::Callback;

const MAX_MESSAGE_LEN: usize = 64 * 1024;
/// Messages held per recipient while it is offline.
pub(crate) const MAX_OFFLINE_MESSAGES: usize = 100;

struct NodeState {
    running: bool,
    killed: bool,
    nospam: u32,
    presence: PresenceStatus,
    self_info: UserInfo,
    friends: BTreeMap<String, FriendRecord>,
}

pub(crate) struct Node {
    pub(crate) network: Arc<LoopbackNetwork>,
    pub(crate) user_id: String,
    keypair: Keypair,
    location: PathBuf,
    callback: Callback<CarrierEvent>,
    dispatcher: Dispatcher,
    state: Mutex<NodeState>,
}

impl Node {
    pub(crate) fn create(
        network: Arc<LoopbackNetwork>,
        options: CarrierOptions,
        callback: Callback<CarrierEvent>,
    ) -> NativeResult<Arc<Node>> {
        let location = options.persistent_location;
        let persisted = store::load(&location).map_err(|e| {
            tracing::warn!(location = %location.display(), error = %e, "unusable node state");
            NativeError::BAD_PERSISTENT_DATA
        })?;
        let (keypair, nospam, mut self_info, friends) = match persisted {
            Some(s) => (
                Keypair::from_secret_bytes(s.secret),
                s.nospam,
                s.self_info,
                s.friends,
            ),
            None => (
                Keypair::generate(),
                rand::random(),
                UserInfo::default(),
                BTreeMap::new(),
            ),
        };
        let user_id = keypair.user_id();
        self_info.user_id = user_id.clone();

        let short: String = user_id.chars().take(8).collect();
        let dispatcher = Dispatcher::spawn(format!("carrier-{short}"))
            .map_err(|_| NativeError::OUT_OF_MEMORY)?;
        let node = Arc::new(Node {
            network: Arc::clone(&network),
            user_id: user_id.clone(),
            keypair,
            location,
            callback,
            dispatcher,
            state: Mutex::new(NodeState {
                running: false,
                killed: false,
                nospam,
                presence: PresenceStatus::None,
                self_info,
                friends,
            }),
        });

        {
            let mut net = network.lock();
            if net.nodes.get(&user_id).and_then(|n| n.upgrade()).is_some() {
                drop(net);
                node.dispatcher.stop();
                return Err(NativeError::ALREADY_EXIST);
            }
            net.nodes.insert(user_id.clone(), Arc::downgrade(&node));
        }
        if let Err(e) = store::save(&node.location, &node.snapshot()) {
            tracing::warn!(error = %e, "cannot write node state");
            node.shutdown();
            return Err(NativeError::INVALID_PERSISTENCE_FILE);
        }
        tracing::info!(
            user = %user_id,
            udp = options.udp_enabled,
            bootstraps = options.bootstraps.len(),
            "loopback node created"
        );
        Ok(node)
    }

    /// Queue `event` for `callback` on this node's callback thread.
    pub(crate) fn post<E: Send + 'static>(&self, callback: &Callback<E>, event: E) {
        let callback = callback.clone();
        if !self.dispatcher.post(Box::new(move || callback.call(event))) {
            tracing::trace!(user = %self.user_id, "node stopped, callback dropped");
        }
    }

    pub(crate) fn emit(&self, event: CarrierEvent) {
        self.post(&self.callback, event);
    }

    pub(crate) fn is_online(&self) -> bool {
        let s = self.state.lock();
        s.running && !s.killed
    }

    pub(crate) fn require_running(&self) -> NativeResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(NativeError::NOT_READY)
        }
    }

    fn require_alive(&self) -> NativeResult<()> {
        if self.state.lock().killed {
            Err(NativeError::WRONG_STATE)
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_friend(&self, user_id: &str) -> bool {
        self.state.lock().friends.contains_key(user_id)
    }

    /// Node of a friend that is currently online.
    pub(crate) fn online_friend(&self, user_id: &str) -> NativeResult<Arc<Node>> {
        if !self.is_friend(user_id) {
            return Err(NativeError::NOT_EXIST);
        }
        self.network.online(user_id).ok_or(NativeError::NOT_READY)
    }

    pub(crate) fn self_info(&self) -> UserInfo {
        self.state.lock().self_info.clone()
    }

    fn nospam(&self) -> u32 {
        self.state.lock().nospam
    }

    fn label_for(&self, user_id: &str) -> String {
        self.state
            .lock()
            .friends
            .get(user_id)
            .map(|r| r.label.clone())
            .unwrap_or_default()
    }

    /// How this node appears in a friend list that gave it `label`.
    fn seen_as(&self, label: String) -> FriendInfo {
        let s = self.state.lock();
        FriendInfo {
            status: if s.running && !s.killed {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            },
            label,
            presence: s.presence,
            user_info: s.self_info.clone(),
        }
    }

    fn friend_info(&self, user_id: &str) -> Option<FriendInfo> {
        let record = self.state.lock().friends.get(user_id).cloned()?;
        Some(match self.network.online(user_id) {
            Some(peer) => peer.seen_as(record.label),
            None => FriendInfo {
                status: ConnectionStatus::Disconnected,
                label: record.label,
                presence: PresenceStatus::None,
                user_info: record.user_info,
            },
        })
    }

    fn friend_ids(&self) -> Vec<String> {
        self.state.lock().friends.keys().cloned().collect()
    }

    fn online_friends(&self) -> Vec<Arc<Node>> {
        self.friend_ids()
            .iter()
            .filter_map(|id| self.network.online(id))
            .collect()
    }

    fn remember_friend(&self, user_info: UserInfo) {
        let mut s = self.state.lock();
        let label = s
            .friends
            .get(&user_info.user_id)
            .map(|r| r.label.clone())
            .unwrap_or_default();
        s.friends
            .insert(user_info.user_id.clone(), FriendRecord { user_info, label });
    }

    fn forget_friend(&self, user_id: &str) -> bool {
        self.state.lock().friends.remove(user_id).is_some()
    }

    fn snapshot(&self) -> PersistedState {
        let s = self.state.lock();
        PersistedState {
            secret: self.keypair.secret_bytes(),
            nospam: s.nospam,
            self_info: s.self_info.clone(),
            friends: s.friends.clone(),
        }
    }

    fn persist(&self) {
        if let Err(e) = store::save(&self.location, &self.snapshot()) {
            tracing::warn!(user = %self.user_id, error = %e, "cannot write node state");
        }
    }

    fn start(&self, interval_ms: u32) -> NativeResult<()> {
        {
            let mut s = self.state.lock();
            if s.killed {
                return Err(NativeError::WRONG_STATE);
            }
            if s.running {
                return Err(NativeError::ALREADY_RUN);
            }
            s.running = true;
        }
        self.emit(CarrierEvent::Connection {
            status: ConnectionStatus::Connected,
        });
        let friends = self
            .friend_ids()
            .iter()
            .filter_map(|id| self.friend_info(id))
            .collect();
        self.emit(CarrierEvent::Friends { friends });
        self.emit(CarrierEvent::Ready);

        for peer in self.online_friends() {
            self.emit(CarrierEvent::FriendConnection {
                friend_id: peer.user_id.clone(),
                status: ConnectionStatus::Connected,
            });
            peer.emit(CarrierEvent::FriendConnection {
                friend_id: self.user_id.clone(),
                status: ConnectionStatus::Connected,
            });
        }
        let queued = self
            .network
            .lock()
            .offline_messages
            .remove(&self.user_id)
            .unwrap_or_default();
        for (from, message) in queued {
            self.emit(CarrierEvent::FriendMessage {
                from,
                message,
                is_offline: true,
            });
        }
        tracing::info!(user = %self.user_id, interval_ms, "loopback node started");
        Ok(())
    }

    /// Stop the node. Idempotent.
    pub(crate) fn shutdown(&self) {
        let was_running = {
            let mut s = self.state.lock();
            if s.killed {
                return;
            }
            s.killed = true;
            std::mem::replace(&mut s.running, false)
        };
        if was_running {
            for peer in self.online_friends() {
                peer.emit(CarrierEvent::FriendConnection {
                    friend_id: self.user_id.clone(),
                    status: ConnectionStatus::Disconnected,
                });
            }
        }
        group::leave_all(&self.network, &self.user_id);
        {
            let mut net = self.network.lock();
            let me = self.user_id.as_str();
            if net
                .nodes
                .get(me)
                .is_some_and(|w| std::ptr::eq(w.as_ptr(), self))
            {
                net.nodes.remove(me);
            }
            net.session_requests.retain(|(to, from), _| to != me && from != me);
            net.transfer_requests.retain(|(to, from), _| to != me && from != me);
            net.invites.retain(|(to, from), _| to != me && from != me);
            net.group_invites.retain(|(invitee, _), _| invitee != me);
        }
        self.persist();
        self.dispatcher.stop();
        tracing::info!(user = %self.user_id, "loopback node killed");
    }
}

/// [`NativeCarrier`] backed by a loopback [`Node`]. Dropping it kills the node.
pub struct LoopbackCarrier {
    node: Arc<Node>,
}

impl LoopbackCarrier {
    pub(crate) fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

impl Drop for LoopbackCarrier {
    fn drop(&mut self) {
        self.node.shutdown();
    }
}

impl NativeCarrier for LoopbackCarrier {
    fn start(&self, interval_ms: u32) -> NativeResult<()> {
        self.node.start(interval_ms)
    }

    fn kill(&self) {
        self.node.shutdown();
    }

    fn is_ready(&self) -> bool {
        self.node.is_online()
    }

    fn node_id(&self) -> String {
        self.node.user_id.clone()
    }

    fn user_id(&self) -> String {
        self.node.user_id.clone()
    }

    fn address(&self) -> String {
        self.node.keypair.address(self.node.nospam())
    }

    fn self_info(&self) -> NativeResult<UserInfo> {
        Ok(self.node.self_info())
    }

    fn set_self_info(&self, mut info: UserInfo) -> NativeResult<()> {
        let node = &self.node;
        node.require_alive()?;
        info.user_id = node.user_id.clone();
        let renamed = {
            let mut s = node.state.lock();
            let renamed = s.self_info.name != info.name;
            s.self_info = info.clone();
            renamed
        };
        node.persist();
        for peer in node.online_friends() {
            peer.remember_friend(info.clone());
            peer.persist();
            let friend_info = node.seen_as(peer.label_for(&node.user_id));
            peer.emit(CarrierEvent::FriendInfoChanged {
                friend_id: node.user_id.clone(),
                friend_info,
            });
        }
        if renamed {
            group::rename_member(&node.network, &node.user_id, &info.name);
        }
        Ok(())
    }

    fn nospam(&self) -> NativeResult<u32> {
        Ok(self.node.nospam())
    }

    fn set_nospam(&self, nospam: u32) -> NativeResult<()> {
        self.node.require_alive()?;
        self.node.state.lock().nospam = nospam;
        self.node.persist();
        Ok(())
    }

    fn presence(&self) -> NativeResult<PresenceStatus> {
        Ok(self.node.state.lock().presence)
    }

    fn set_presence(&self, presence: PresenceStatus) -> NativeResult<()> {
        let node = &self.node;
        node.require_alive()?;
        node.state.lock().presence = presence;
        for peer in node.online_friends() {
            peer.emit(CarrierEvent::FriendPresence {
                friend_id: node.user_id.clone(),
                presence,
            });
        }
        Ok(())
    }

    fn friends(&self) -> NativeResult<Vec<FriendInfo>> {
        Ok(self
            .node
            .friend_ids()
            .iter()
            .filter_map(|id| self.node.friend_info(id))
            .collect())
    }

    fn friend(&self, user_id: &str) -> NativeResult<FriendInfo> {
        self.node.friend_info(user_id).ok_or(NativeError::NOT_EXIST)
    }

    fn label_friend(&self, user_id: &str, label: &str) -> NativeResult<()> {
        {
            let mut s = self.node.state.lock();
            let record = s.friends.get_mut(user_id).ok_or(NativeError::NOT_EXIST)?;
            record.label = label.to_string();
        }
        self.node.persist();
        Ok(())
    }

    fn is_friend(&self, user_id: &str) -> NativeResult<bool> {
        if !identity::is_valid_user_id(user_id) {
            return Err(NativeError::INVALID_USERID);
        }
        Ok(self.node.is_friend(user_id))
    }

    fn add_friend(&self, address: &str, hello: &str) -> NativeResult<()> {
        let node = &self.node;
        node.require_running()?;
        let (key, nospam) = identity::parse_address(address).ok_or(NativeError::INVALID_ARGS)?;
        let to = bs58::encode(key).into_string();
        if to == node.user_id {
            return Err(NativeError::INVALID_ARGS);
        }
        if node.is_friend(&to) {
            return Err(NativeError::ALREADY_EXIST);
        }
        match node.network.online(&to) {
            Some(peer) if peer.nospam() == nospam => {
                node.network
                    .lock()
                    .friend_requests
                    .insert((to.clone(), node.user_id.clone()));
                peer.emit(CarrierEvent::FriendRequest {
                    user_id: node.user_id.clone(),
                    user_info: node.self_info(),
                    hello: hello.to_string(),
                });
            }
            Some(_) => tracing::debug!(%to, "stale nospam, friend request dropped"),
            None => tracing::debug!(%to, "peer offline, friend request dropped"),
        }
        Ok(())
    }

    fn accept_friend(&self, user_id: &str) -> NativeResult<()> {
        let node = &self.node;
        node.require_running()?;
        let matched = node
            .network
            .lock()
            .friend_requests
            .remove(&(node.user_id.clone(), user_id.to_string()));
        if !matched {
            return Err(NativeError::NO_MATCHED_REQUEST);
        }
        let peer = node.network.node(user_id);
        let peer_info = peer.as_ref().map(|p| p.self_info()).unwrap_or_else(|| UserInfo {
            user_id: user_id.to_string(),
            ..UserInfo::default()
        });
        node.remember_friend(peer_info);
        node.persist();
        if let Some(peer) = &peer {
            peer.remember_friend(node.self_info());
            peer.persist();
            let seen = node.seen_as(peer.label_for(&node.user_id));
            peer.emit(CarrierEvent::FriendAdded { friend_info: seen });
        }
        if let Some(friend_info) = node.friend_info(user_id) {
            node.emit(CarrierEvent::FriendAdded { friend_info });
        }
        if let Some(peer) = peer.filter(|p| p.is_online()) {
            node.emit(CarrierEvent::FriendConnection {
                friend_id: peer.user_id.clone(),
                status: ConnectionStatus::Connected,
            });
            peer.emit(CarrierEvent::FriendConnection {
                friend_id: node.user_id.clone(),
                status: ConnectionStatus::Connected,
            });
        }
        Ok(())
    }

    fn remove_friend(&self, user_id: &str) -> NativeResult<()> {
        let node = &self.node;
        if !node.forget_friend(user_id) {
            return Err(NativeError::NOT_EXIST);
        }
        node.persist();
        node.emit(CarrierEvent::FriendRemoved {
            friend_id: user_id.to_string(),
        });
        if let Some(peer) = node.network.node(user_id) {
            if peer.forget_friend(&node.user_id) {
                peer.persist();
                peer.emit(CarrierEvent::FriendRemoved {
                    friend_id: node.user_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn send_friend_message(&self, to: &str, message: &[u8]) -> NativeResult<bool> {
        let node = &self.node;
        node.require_running()?;
        if !node.is_friend(to) {
            return Err(NativeError::NOT_EXIST);
        }
        if message.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(NativeError::LIMIT_EXCEEDED);
        }
        match node.network.online(to) {
            Some(peer) => {
                peer.emit(CarrierEvent::FriendMessage {
                    from: node.user_id.clone(),
                    message: message.to_vec(),
                    is_offline: false,
                });
                Ok(false)
            }
            None => {
                let mut net = node.network.lock();
                let queue = net.offline_messages.entry(to.to_string()).or_default();
                if queue.len() >= MAX_OFFLINE_MESSAGES {
                    return Err(NativeError::LIMIT_EXCEEDED);
                }
                queue.push((node.user_id.clone(), message.to_vec()));
                Ok(true)
            }
        }
    }

    fn invite_friend(
        &self,
        to: &str,
        data: &str,
        callback: Callback<FriendInviteEvent>,
    ) -> NativeResult<()> {
        let node = &self.node;
        node.require_running()?;
        if data.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        let peer = node.online_friend(to)?;
        node.network
            .lock()
            .invites
            .entry((to.to_string(), node.user_id.clone()))
            .or_default()
            .push_back(callback);
        peer.emit(CarrierEvent::FriendInviteRequest {
            from: node.user_id.clone(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn reply_friend_invite(
        &self,
        to: &str,
        status: i32,
        reason: Option<&str>,
        data: Option<&str>,
    ) -> NativeResult<()> {
        let node = &self.node;
        node.require_running()?;
        let well_formed = if status == 0 {
            data.is_some()
        } else {
            reason.is_some()
        };
        if !well_formed {
            return Err(NativeError::INVALID_ARGS);
        }
        let callback = {
            let mut net = node.network.lock();
            let key = (node.user_id.clone(), to.to_string());
            let callback = net.invites.get_mut(&key).and_then(|q| q.pop_front());
            if net.invites.get(&key).is_some_and(|q| q.is_empty()) {
                net.invites.remove(&key);
            }
            callback
        }
        .ok_or(NativeError::NO_MATCHED_REQUEST)?;
        if let Some(peer) = node.network.node(to) {
            peer.post(
                &callback,
                FriendInviteEvent::Received {
                    from: node.user_id.clone(),
                    status,
                    reason: reason.map(str::to_string),
                    data: data.map(str::to_string),
                },
            );
        }
        Ok(())
    }

    fn new_session(&self, to: &str) -> NativeResult<Box<dyn NativeSession>> {
        self.node.require_running()?;
        if !identity::is_valid_user_id(to) {
            return Err(NativeError::INVALID_USERID);
        }
        if !self.node.is_friend(to) {
            return Err(NativeError::NOT_EXIST);
        }
        Ok(session::open(&self.node, to))
    }

    fn new_group(&self, callback: Callback<GroupEvent>) -> NativeResult<Box<dyn NativeGroup>> {
        group::create(&self.node, callback)
    }

    fn join_group(
        &self,
        friend_id: &str,
        cookie: &[u8],
        callback: Callback<GroupEvent>,
    ) -> NativeResult<Box<dyn NativeGroup>> {
        group::join(&self.node, friend_id, cookie, callback)
    }

    fn new_file_transfer(
        &self,
        to: &str,
        info: Option<FileTransferInfo>,
        callback: Callback<FileTransferEvent>,
    ) -> NativeResult<Box<dyn NativeFileTransfer>> {
        transfer::open(&self.node, to, info, callback)
    }
}
