//! Loopback file transfers, paired per (sender, receiver).
//!
//! Connect posts a connect request to the peer; once the peer accepts, each side offers
//! its files and every pull, data, finish, pend, resume and cancel is relayed across.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::node::Node;
use crate::error::{NativeError, NativeResult};
use crate::event::{CarrierEvent, FileTransferEvent};
use crate::native::{FileTransferInfo, FileTransferState, NativeFileTransfer};
use crate::router::Callback;

struct TransferState {
    phase: FileTransferState,
    remote: Weak<TransferShared>,
    /// Files this side sends, by file id.
    outgoing: HashMap<String, FileTransferInfo>,
    /// Files the peer offered.
    incoming: HashMap<String, FileTransferInfo>,
    /// Outgoing files the receiver paused.
    paused: HashSet<String>,
}

pub(crate) struct TransferShared {
    node: Arc<Node>,
    peer: String,
    callback: Callback<FileTransferEvent>,
    state: Mutex<TransferState>,
}

fn check_info(info: &FileTransferInfo) -> NativeResult<()> {
    if info.filename.is_empty() || info.file_id.is_empty() {
        Err(NativeError::INVALID_ARGS)
    } else {
        Ok(())
    }
}

pub(crate) fn open(
    node: &Arc<Node>,
    to: &str,
    info: Option<FileTransferInfo>,
    callback: Callback<FileTransferEvent>,
) -> NativeResult<Box<dyn NativeFileTransfer>> {
    node.require_running()?;
    if !node.is_friend(to) {
        return Err(NativeError::NOT_EXIST);
    }
    let mut outgoing = HashMap::new();
    if let Some(info) = info {
        check_info(&info)?;
        outgoing.insert(info.file_id.clone(), info);
    }
    let shared = Arc::new(TransferShared {
        node: Arc::clone(node),
        peer: to.to_string(),
        callback,
        state: Mutex::new(TransferState {
            phase: FileTransferState::Initialized,
            remote: Weak::new(),
            outgoing,
            incoming: HashMap::new(),
            paused: HashSet::new(),
        }),
    });
    shared.emit(FileTransferEvent::StateChanged {
        state: FileTransferState::Initialized,
    });
    Ok(Box::new(LoopbackTransfer { shared }))
}

impl TransferShared {
    fn emit(&self, event: FileTransferEvent) {
        self.node.post(&self.callback, event);
    }

    fn set_phase(&self, phase: FileTransferState) {
        self.state.lock().phase = phase;
        self.emit(FileTransferEvent::StateChanged { state: phase });
    }

    fn connected_remote(&self) -> NativeResult<Arc<TransferShared>> {
        let s = self.state.lock();
        if s.phase != FileTransferState::Connected {
            return Err(NativeError::WRONG_STATE);
        }
        s.remote.upgrade().ok_or(NativeError::WRONG_STATE)
    }

    /// Announce one of our files to the peer.
    fn offer(&self, remote: &TransferShared, info: FileTransferInfo) {
        remote
            .state
            .lock()
            .incoming
            .insert(info.file_id.clone(), info.clone());
        remote.emit(FileTransferEvent::FileRequest {
            file_id: info.file_id,
            filename: info.filename,
            size: info.size,
        });
    }

    fn offer_all(&self, remote: &TransferShared) {
        let files: Vec<_> = self.state.lock().outgoing.values().cloned().collect();
        for info in files {
            self.offer(remote, info);
        }
    }

    fn require_outgoing(&self, file_id: &str) -> NativeResult<()> {
        if self.state.lock().outgoing.contains_key(file_id) {
            Ok(())
        } else {
            Err(NativeError::NOT_EXIST)
        }
    }

    fn require_incoming(&self, file_id: &str) -> NativeResult<FileTransferInfo> {
        self.state
            .lock()
            .incoming
            .get(file_id)
            .cloned()
            .ok_or(NativeError::NOT_EXIST)
    }
}

pub struct LoopbackTransfer {
    shared: Arc<TransferShared>,
}

impl NativeFileTransfer for LoopbackTransfer {
    fn connect(&self) -> NativeResult<()> {
        let s = &self.shared;
        let info = {
            let state = s.state.lock();
            if state.phase != FileTransferState::Initialized {
                return Err(NativeError::WRONG_STATE);
            }
            state
                .outgoing
                .values()
                .next()
                .cloned()
                .ok_or(NativeError::INVALID_ARGS)?
        };
        let peer = s.node.online_friend(&s.peer)?;
        s.node.network.lock().transfer_requests.insert(
            (s.peer.clone(), s.node.user_id.clone()),
            Arc::downgrade(s),
        );
        s.set_phase(FileTransferState::Connecting);
        peer.emit(CarrierEvent::ConnectRequest {
            from: s.node.user_id.clone(),
            info,
        });
        Ok(())
    }

    fn accept_connect(&self) -> NativeResult<()> {
        let s = &self.shared;
        if s.state.lock().phase != FileTransferState::Initialized {
            return Err(NativeError::WRONG_STATE);
        }
        let sender = s
            .node
            .network
            .lock()
            .transfer_requests
            .remove(&(s.node.user_id.clone(), s.peer.clone()))
            .and_then(|w| w.upgrade())
            .ok_or(NativeError::NO_MATCHED_REQUEST)?;
        sender.state.lock().remote = Arc::downgrade(s);
        s.state.lock().remote = Arc::downgrade(&sender);
        sender.set_phase(FileTransferState::Connected);
        s.set_phase(FileTransferState::Connected);
        sender.offer_all(s);
        s.offer_all(&sender);
        Ok(())
    }

    fn add_file(&self, info: FileTransferInfo) -> NativeResult<()> {
        let s = &self.shared;
        check_info(&info)?;
        let remote = {
            let mut state = s.state.lock();
            if state.outgoing.contains_key(&info.file_id) {
                return Err(NativeError::ALREADY_EXIST);
            }
            state.outgoing.insert(info.file_id.clone(), info.clone());
            (state.phase == FileTransferState::Connected)
                .then(|| state.remote.upgrade())
                .flatten()
        };
        if let Some(remote) = remote {
            s.offer(&remote, info);
        }
        Ok(())
    }

    fn pull_data(&self, file_id: &str, offset: u64) -> NativeResult<()> {
        let s = &self.shared;
        let remote = s.connected_remote()?;
        let info = s.require_incoming(file_id)?;
        if offset > info.size {
            return Err(NativeError::INVALID_ARGS);
        }
        remote.emit(FileTransferEvent::PullRequest {
            file_id: file_id.to_string(),
            offset,
        });
        Ok(())
    }

    fn write_data(&self, file_id: &str, data: &[u8]) -> NativeResult<usize> {
        let s = &self.shared;
        if data.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        let remote = s.connected_remote()?;
        s.require_outgoing(file_id)?;
        if s.state.lock().paused.contains(file_id) {
            return Err(NativeError::BUSY);
        }
        remote.emit(FileTransferEvent::Data {
            file_id: file_id.to_string(),
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn send_finish(&self, file_id: &str) -> NativeResult<()> {
        let s = &self.shared;
        let remote = s.connected_remote()?;
        s.require_outgoing(file_id)?;
        remote.emit(FileTransferEvent::DataFinished {
            file_id: file_id.to_string(),
        });
        Ok(())
    }

    fn cancel_transfer(&self, file_id: &str, status: i32, reason: &str) -> NativeResult<()> {
        let s = &self.shared;
        let remote = s.connected_remote()?;
        {
            let state = s.state.lock();
            if !state.outgoing.contains_key(file_id) && !state.incoming.contains_key(file_id) {
                return Err(NativeError::NOT_EXIST);
            }
        }
        remote.emit(FileTransferEvent::Cancel {
            file_id: file_id.to_string(),
            status,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn pend_transfer(&self, file_id: &str) -> NativeResult<()> {
        let s = &self.shared;
        let remote = s.connected_remote()?;
        s.require_incoming(file_id)?;
        remote.state.lock().paused.insert(file_id.to_string());
        remote.emit(FileTransferEvent::Pending {
            file_id: file_id.to_string(),
        });
        Ok(())
    }

    fn resume_transfer(&self, file_id: &str) -> NativeResult<()> {
        let s = &self.shared;
        let remote = s.connected_remote()?;
        s.require_incoming(file_id)?;
        remote.state.lock().paused.remove(file_id);
        remote.emit(FileTransferEvent::Resume {
            file_id: file_id.to_string(),
        });
        Ok(())
    }

    fn file_id(&self, filename: &str) -> NativeResult<String> {
        let state = self.shared.state.lock();
        state
            .outgoing
            .values()
            .chain(state.incoming.values())
            .find(|f| f.filename == filename)
            .map(|f| f.file_id.clone())
            .ok_or(NativeError::NOT_EXIST)
    }

    fn file_name(&self, file_id: &str) -> NativeResult<String> {
        let state = self.shared.state.lock();
        state
            .outgoing
            .get(file_id)
            .or_else(|| state.incoming.get(file_id))
            .map(|f| f.filename.clone())
            .ok_or(NativeError::NOT_EXIST)
    }

    fn close(&self) {
        let s = &self.shared;
        let remote = {
            let mut state = s.state.lock();
            if state.phase == FileTransferState::Closed {
                return;
            }
            std::mem::take(&mut state.remote).upgrade()
        };
        s.set_phase(FileTransferState::Closed);
        if let Some(remote) = remote {
            remote.state.lock().remote = Weak::new();
            remote.set_phase(FileTransferState::Closed);
        }
        s.node
            .network
            .lock()
            .transfer_requests
            .retain(|_, w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(s)));
    }
}

impl Drop for LoopbackTransfer {
    fn drop(&mut self) {
        self.close();
    }
}
