//! Loopback groups: rooms keyed by a random cookie, with events fanned out to members.

use std::sync::{Arc, Weak};

use super::node::Node;
use super::LoopbackNetwork;
use crate::error::{NativeError, NativeResult};
use crate::event::{CarrierEvent, GroupEvent};
use crate::native::{GroupPeer, NativeGroup};
use crate::router::Callback;

const COOKIE_LEN: usize = 16;
const MAX_TITLE_LEN: usize = 127;

struct Member {
    user_id: String,
    name: String,
    node: Weak<Node>,
    callback: Callback<GroupEvent>,
}

pub(crate) struct Room {
    title: String,
    members: Vec<Member>,
}

impl Room {
    fn has(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    /// Live members other than `user_id`, ready for a fan-out.
    fn others(&self, user_id: &str) -> Vec<(Arc<Node>, Callback<GroupEvent>)> {
        self.members
            .iter()
            .filter(|m| m.user_id != user_id)
            .filter_map(|m| Some((m.node.upgrade()?, m.callback.clone())))
            .collect()
    }

    fn everyone(&self) -> Vec<(Arc<Node>, Callback<GroupEvent>)> {
        self.others("")
    }
}

fn fan_out(targets: Vec<(Arc<Node>, Callback<GroupEvent>)>, event: GroupEvent) {
    for (node, callback) in targets {
        node.post(&callback, event.clone());
    }
}

fn member(node: &Arc<Node>, callback: Callback<GroupEvent>) -> Member {
    Member {
        user_id: node.user_id.clone(),
        name: node.self_info().name,
        node: Arc::downgrade(node),
        callback,
    }
}

pub(crate) fn create(
    node: &Arc<Node>,
    callback: Callback<GroupEvent>,
) -> NativeResult<Box<dyn NativeGroup>> {
    node.require_running()?;
    let cookie = rand::random::<[u8; COOKIE_LEN]>().to_vec();
    let me = member(node, callback.clone());
    node.network.lock().rooms.insert(
        cookie.clone(),
        Room {
            title: String::new(),
            members: vec![me],
        },
    );
    node.post(&callback, GroupEvent::Connected);
    tracing::debug!(user = %node.user_id, "group created");
    Ok(Box::new(LoopbackGroup {
        node: Arc::clone(node),
        cookie,
    }))
}

pub(crate) fn join(
    node: &Arc<Node>,
    friend_id: &str,
    cookie: &[u8],
    callback: Callback<GroupEvent>,
) -> NativeResult<Box<dyn NativeGroup>> {
    node.require_running()?;
    if !node.is_friend(friend_id) {
        return Err(NativeError::NOT_EXIST);
    }
    let me = member(node, callback.clone());
    let targets = {
        let mut net = node.network.lock();
        let key = (node.user_id.clone(), cookie.to_vec());
        if net.group_invites.get(&key).map(String::as_str) != Some(friend_id) {
            return Err(NativeError::NO_MATCHED_REQUEST);
        }
        let room = net.rooms.get_mut(cookie).ok_or(NativeError::NOT_EXIST)?;
        if room.has(&node.user_id) {
            return Err(NativeError::ALREADY_EXIST);
        }
        room.members.push(me);
        let targets = room.everyone();
        net.group_invites.remove(&key);
        targets
    };
    node.post(&callback, GroupEvent::Connected);
    fan_out(targets, GroupEvent::PeerListChanged);
    Ok(Box::new(LoopbackGroup {
        node: Arc::clone(node),
        cookie: cookie.to_vec(),
    }))
}

/// Drop `user_id` from every room. Used when a node is killed.
pub(crate) fn leave_all(network: &LoopbackNetwork, user_id: &str) {
    let mut notify = Vec::new();
    {
        let mut net = network.lock();
        for room in net.rooms.values_mut() {
            if room.has(user_id) {
                room.members.retain(|m| m.user_id != user_id);
                notify.extend(room.everyone());
            }
        }
        net.rooms.retain(|_, room| !room.members.is_empty());
    }
    fan_out(notify, GroupEvent::PeerListChanged);
}

/// Propagate a profile name change to the other members of the user's rooms.
pub(crate) fn rename_member(network: &LoopbackNetwork, user_id: &str, name: &str) {
    let mut notify = Vec::new();
    {
        let mut net = network.lock();
        for room in net.rooms.values_mut() {
            let Some(m) = room.members.iter_mut().find(|m| m.user_id == user_id) else {
                continue;
            };
            m.name = name.to_string();
            notify.extend(room.others(user_id));
        }
    }
    fan_out(
        notify,
        GroupEvent::PeerName {
            peer_id: user_id.to_string(),
            peer_name: name.to_string(),
        },
    );
}

pub struct LoopbackGroup {
    node: Arc<Node>,
    cookie: Vec<u8>,
}

impl LoopbackGroup {
    /// Run `f` on this group's room, provided this node is still a member.
    fn with_room<R>(&self, f: impl FnOnce(&mut Room) -> NativeResult<R>) -> NativeResult<R> {
        let mut net = self.node.network.lock();
        let room = net
            .rooms
            .get_mut(&self.cookie)
            .filter(|r| r.has(&self.node.user_id))
            .ok_or(NativeError::NOT_EXIST)?;
        f(room)
    }
}

impl NativeGroup for LoopbackGroup {
    fn invite(&self, friend_id: &str) -> NativeResult<()> {
        let peer = self.node.online_friend(friend_id)?;
        self.with_room(|room| {
            if room.has(friend_id) {
                Err(NativeError::ALREADY_EXIST)
            } else {
                Ok(())
            }
        })?;
        self.node.network.lock().group_invites.insert(
            (friend_id.to_string(), self.cookie.clone()),
            self.node.user_id.clone(),
        );
        peer.emit(CarrierEvent::GroupInvite {
            from: self.node.user_id.clone(),
            cookie: self.cookie.clone(),
        });
        Ok(())
    }

    fn send_message(&self, message: &[u8]) -> NativeResult<()> {
        if message.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        let me = &self.node.user_id;
        let targets = self.with_room(|room| Ok(room.others(me)))?;
        fan_out(
            targets,
            GroupEvent::Message {
                from: me.clone(),
                message: message.to_vec(),
            },
        );
        Ok(())
    }

    fn title(&self) -> NativeResult<String> {
        self.with_room(|room| Ok(room.title.clone()))
    }

    fn set_title(&self, title: &str) -> NativeResult<()> {
        if title.len() > MAX_TITLE_LEN {
            return Err(NativeError::INVALID_ARGS);
        }
        let me = &self.node.user_id;
        let targets = self.with_room(|room| {
            room.title = title.to_string();
            Ok(room.others(me))
        })?;
        fan_out(
            targets,
            GroupEvent::Title {
                from: me.clone(),
                title: title.to_string(),
            },
        );
        Ok(())
    }

    fn peers(&self) -> NativeResult<Vec<GroupPeer>> {
        self.with_room(|room| {
            Ok(room
                .members
                .iter()
                .map(|m| GroupPeer {
                    name: m.name.clone(),
                    user_id: m.user_id.clone(),
                })
                .collect())
        })
    }

    fn peer(&self, peer_id: &str) -> NativeResult<GroupPeer> {
        self.with_room(|room| {
            room.members
                .iter()
                .find(|m| m.user_id == peer_id)
                .map(|m| GroupPeer {
                    name: m.name.clone(),
                    user_id: m.user_id.clone(),
                })
                .ok_or(NativeError::NOT_EXIST)
        })
    }

    fn leave(&self) -> NativeResult<()> {
        let me = &self.node.user_id;
        let targets = {
            let mut net = self.node.network.lock();
            let room = net
                .rooms
                .get_mut(&self.cookie)
                .filter(|r| r.has(me))
                .ok_or(NativeError::NOT_EXIST)?;
            room.members.retain(|m| &m.user_id != me);
            let targets = room.everyone();
            if room.members.is_empty() {
                net.rooms.remove(&self.cookie);
            }
            targets
        };
        fan_out(targets, GroupEvent::PeerListChanged);
        Ok(())
    }
}
