//! Loopback sessions and streams.
//!
//! A session is linked to its peer's session once the peer replies to the request.
//! Streams pair up by stream id: both sides add streams in the same order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::node::Node;
use crate::error::{NativeError, NativeResult};
use crate::event::{CarrierEvent, SessionEvent, StreamEvent};
use crate::native::{
    AddressInfo, CandidateType, CloseReason, NativeSession, NativeStream, NetworkTopology,
    PortForwardingProtocol, StreamOptions, StreamState, StreamType, TransportInfo,
};
use crate::router::Callback;

/// Bytes a stream accepts before its session is connected.
const MAX_PENDING_BYTES: usize = 64 * 1024;

#[derive(Default)]
struct SessionState {
    closed: bool,
    started: bool,
    /// Set on the side that sent the request once the peer accepted.
    initiator: bool,
    request: Option<Callback<SessionEvent>>,
    remote: Weak<SessionShared>,
    streams: Vec<Arc<StreamShared>>,
    next_stream_id: i32,
    services: HashMap<String, (PortForwardingProtocol, String, u16)>,
}

pub(crate) struct SessionShared {
    node: Arc<Node>,
    peer: String,
    state: Mutex<SessionState>,
}

impl SessionShared {
    fn remote(&self) -> Option<Arc<SessionShared>> {
        self.state.lock().remote.upgrade()
    }

    fn stream(&self, id: i32) -> Option<Arc<StreamShared>> {
        self.state
            .lock()
            .streams
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    fn sdp(&self) -> String {
        let streams = self.state.lock().streams.len();
        format!(
            "v=0\r\no={} loopback\r\ns=carrier\r\na=streams:{streams}\r\n",
            self.node.user_id
        )
    }

    fn has_service(&self, service: &str) -> bool {
        self.state.lock().services.contains_key(service)
    }
}

pub struct LoopbackSession {
    shared: Arc<SessionShared>,
}

pub(crate) fn open(node: &Arc<Node>, peer: &str) -> Box<dyn NativeSession> {
    Box::new(LoopbackSession {
        shared: Arc::new(SessionShared {
            node: Arc::clone(node),
            peer: peer.to_string(),
            state: Mutex::new(SessionState {
                next_stream_id: 1,
                ..SessionState::default()
            }),
        }),
    })
}

/// Link two sessions that agreed to talk.
fn link(requester: &Arc<SessionShared>, responder: &Arc<SessionShared>) {
    {
        let mut s = requester.state.lock();
        s.remote = Arc::downgrade(responder);
        s.initiator = true;
    }
    responder.state.lock().remote = Arc::downgrade(requester);
}

impl NativeSession for LoopbackSession {
    fn peer(&self) -> String {
        self.shared.peer.clone()
    }

    fn request(&self, callback: Callback<SessionEvent>) -> NativeResult<()> {
        let shared = &self.shared;
        {
            let mut s = shared.state.lock();
            if s.closed || s.remote.strong_count() > 0 {
                return Err(NativeError::WRONG_STATE);
            }
            if s.request.is_some() {
                return Err(NativeError::ALREADY_EXIST);
            }
            s.request = Some(callback);
        }
        let Some(peer) = shared.node.network.online(&shared.peer) else {
            shared.state.lock().request = None;
            return Err(NativeError::NOT_READY);
        };
        shared.node.network.lock().session_requests.insert(
            (shared.peer.clone(), shared.node.user_id.clone()),
            Arc::downgrade(shared),
        );
        peer.emit(CarrierEvent::SessionRequest {
            from: shared.node.user_id.clone(),
            sdp: shared.sdp(),
        });
        Ok(())
    }

    fn reply_request(&self, status: i32, reason: Option<&str>) -> NativeResult<()> {
        let shared = &self.shared;
        if status != 0 && reason.is_none() {
            return Err(NativeError::INVALID_ARGS);
        }
        if shared.state.lock().closed {
            return Err(NativeError::WRONG_STATE);
        }
        let requester = shared
            .node
            .network
            .lock()
            .session_requests
            .remove(&(shared.node.user_id.clone(), shared.peer.clone()))
            .and_then(|w| w.upgrade())
            .ok_or(NativeError::NO_MATCHED_REQUEST)?;
        let callback = requester.state.lock().request.take();
        let event = if status == 0 {
            link(&requester, shared);
            SessionEvent::Completion {
                status,
                reason: None,
                sdp: Some(shared.sdp()),
            }
        } else {
            SessionEvent::Completion {
                status,
                reason: reason.map(str::to_string),
                sdp: None,
            }
        };
        if let Some(callback) = callback {
            requester.node.post(&callback, event);
        }
        Ok(())
    }

    fn start(&self, sdp: &str) -> NativeResult<()> {
        let shared = &self.shared;
        if sdp.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        let streams = {
            let mut s = shared.state.lock();
            if s.closed || s.remote.strong_count() == 0 {
                return Err(NativeError::WRONG_STATE);
            }
            if s.started {
                return Err(NativeError::ALREADY_RUN);
            }
            s.started = true;
            s.streams.clone()
        };
        let initiator = shared.state.lock().initiator;
        for stream in streams {
            stream.connect(initiator);
        }
        Ok(())
    }

    fn add_stream(
        &self,
        stream_type: StreamType,
        options: StreamOptions,
        callback: Callback<StreamEvent>,
    ) -> NativeResult<Box<dyn NativeStream>> {
        let shared = &self.shared;
        if options.contains(StreamOptions::PORT_FORWARDING)
            && !options.contains(StreamOptions::MULTIPLEXING)
        {
            return Err(NativeError::INVALID_ARGS);
        }
        let (stream, connect_now) = {
            let mut s = shared.state.lock();
            if s.closed {
                return Err(NativeError::WRONG_STATE);
            }
            let id = s.next_stream_id;
            s.next_stream_id += 1;
            let stream = Arc::new(StreamShared {
                id,
                stream_type,
                options,
                node: Arc::clone(&shared.node),
                session: Arc::downgrade(shared),
                callback,
                state: Mutex::new(StreamInner::new()),
            });
            s.streams.push(Arc::clone(&stream));
            (stream, s.started.then_some(s.initiator))
        };
        stream.set_state(StreamState::Initialized);
        stream.set_state(StreamState::TransportReady);
        if let Some(initiator) = connect_now {
            stream.connect(initiator);
        }
        Ok(Box::new(LoopbackStream { shared: stream }))
    }

    fn remove_stream(&self, stream_id: i32) -> NativeResult<()> {
        let stream = {
            let mut s = self.shared.state.lock();
            let pos = s
                .streams
                .iter()
                .position(|st| st.id == stream_id)
                .ok_or(NativeError::NOT_EXIST)?;
            s.streams.remove(pos)
        };
        stream.close();
        Ok(())
    }

    fn add_service(
        &self,
        service: &str,
        protocol: PortForwardingProtocol,
        host: &str,
        port: &str,
    ) -> NativeResult<()> {
        let port: u16 = port.parse().map_err(|_| NativeError::INVALID_ARGS)?;
        if host.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        let mut s = self.shared.state.lock();
        if s.closed {
            return Err(NativeError::WRONG_STATE);
        }
        if s.services.contains_key(service) {
            return Err(NativeError::ALREADY_EXIST);
        }
        s.services
            .insert(service.to_string(), (protocol, host.to_string(), port));
        Ok(())
    }

    fn remove_service(&self, service: &str) {
        self.shared.state.lock().services.remove(service);
    }

    fn close(&self) {
        let shared = &self.shared;
        let (streams, remote) = {
            let mut s = shared.state.lock();
            if s.closed {
                return;
            }
            s.closed = true;
            s.request = None;
            (
                std::mem::take(&mut s.streams),
                std::mem::take(&mut s.remote).upgrade(),
            )
        };
        for stream in streams {
            stream.close();
        }
        if let Some(remote) = remote {
            let remote_streams = {
                let mut r = remote.state.lock();
                r.remote = Weak::new();
                r.streams.clone()
            };
            for stream in remote_streams {
                stream.set_state(StreamState::Deactivated);
            }
        }
        shared
            .node
            .network
            .lock()
            .session_requests
            .retain(|_, w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(shared)));
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct Channel {
    /// The peer asked us to hold off writing.
    held: bool,
}

struct StreamInner {
    state: StreamState,
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
    channels: HashMap<i32, Channel>,
    next_channel: i32,
    forwardings: HashSet<i32>,
    next_forwarding: i32,
}

impl StreamInner {
    fn new() -> Self {
        Self {
            state: StreamState::Raw,
            pending: Vec::new(),
            pending_bytes: 0,
            channels: HashMap::new(),
            next_channel: 1,
            forwardings: HashSet::new(),
            next_forwarding: 1,
        }
    }
}

struct StreamShared {
    id: i32,
    stream_type: StreamType,
    options: StreamOptions,
    node: Arc<Node>,
    session: Weak<SessionShared>,
    callback: Callback<StreamEvent>,
    state: Mutex<StreamInner>,
}

impl StreamShared {
    fn emit(&self, event: StreamEvent) {
        self.node.post(&self.callback, event);
    }

    fn set_state(&self, state: StreamState) {
        self.state.lock().state = state;
        self.emit(StreamEvent::StateChanged { state });
    }

    fn is_connected(&self) -> bool {
        self.state.lock().state == StreamState::Connected
    }

    fn remote_session(&self) -> Option<Arc<SessionShared>> {
        self.session.upgrade()?.remote()
    }

    /// The peer's stream with the same id.
    fn remote(&self) -> Option<Arc<StreamShared>> {
        self.remote_session()?.stream(self.id)
    }

    fn connected_remote(&self) -> NativeResult<Arc<StreamShared>> {
        if !self.is_connected() {
            return Err(NativeError::WRONG_STATE);
        }
        self.remote().ok_or(NativeError::WRONG_STATE)
    }

    fn connect(&self, initiator: bool) {
        self.set_state(StreamState::Connecting);
        let Some(remote) = self.remote() else {
            self.set_state(StreamState::Error);
            return;
        };
        let pending = {
            let mut inner = self.state.lock();
            // Channel ids: the initiating side uses odd numbers, the other side even.
            inner.next_channel = if initiator { 1 } else { 2 };
            inner.pending_bytes = 0;
            std::mem::take(&mut inner.pending)
        };
        self.set_state(StreamState::Connected);
        for data in pending {
            remote.emit(StreamEvent::StreamData { data });
        }
    }

    fn close(&self) {
        let was_closed = {
            let mut inner = self.state.lock();
            inner.channels.clear();
            inner.forwardings.clear();
            inner.pending.clear();
            inner.state == StreamState::Closed
        };
        if !was_closed {
            self.set_state(StreamState::Closed);
        }
        if let Some(remote) = self.remote() {
            remote.set_state(StreamState::Deactivated);
        }
    }

    fn require_multiplexing(&self) -> NativeResult<()> {
        if self.options.contains(StreamOptions::MULTIPLEXING) {
            Ok(())
        } else {
            Err(NativeError::WRONG_STATE)
        }
    }

    fn require_channel(&self, channel: i32) -> NativeResult<()> {
        if self.state.lock().channels.contains_key(&channel) {
            Ok(())
        } else {
            Err(NativeError::NOT_EXIST)
        }
    }

    fn address(&self, node: &Node) -> AddressInfo {
        AddressInfo {
            candidate_type: CandidateType::Host,
            address: "127.0.0.1".to_string(),
            port: fake_port(&node.user_id, self.id),
            related_address: None,
            related_port: None,
        }
    }
}

const PORT_BASE: u32 = 20000;
const PORT_SPAN: u32 = 20000;

/// Stable fake endpoint port per node and stream, always in `20000..40000`.
fn fake_port(user_id: &str, stream_id: i32) -> u16 {
    let seed = user_id.bytes().fold(0u32, |acc, b| acc.wrapping_add(u32::from(b)));
    let offset = seed.wrapping_add(stream_id.unsigned_abs()) % PORT_SPAN;
    // PORT_BASE + PORT_SPAN fits in u16.
    (PORT_BASE + offset) as u16
}

pub struct LoopbackStream {
    shared: Arc<StreamShared>,
}

impl NativeStream for LoopbackStream {
    fn id(&self) -> i32 {
        self.shared.id
    }

    fn transport_info(&self) -> NativeResult<TransportInfo> {
        let s = &self.shared;
        let remote = s.connected_remote()?;
        Ok(TransportInfo {
            topology: NetworkTopology::Lan,
            local_addr: s.address(&s.node),
            remote_addr: remote.address(&remote.node),
        })
    }

    fn write(&self, data: &[u8]) -> NativeResult<usize> {
        let s = &self.shared;
        if data.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        {
            let mut inner = s.state.lock();
            match inner.state {
                StreamState::Connected => {}
                StreamState::Initialized | StreamState::TransportReady | StreamState::Connecting => {
                    // Held until the session connects.
                    if inner.pending_bytes + data.len() > MAX_PENDING_BYTES {
                        return Err(NativeError::LIMIT_EXCEEDED);
                    }
                    inner.pending_bytes += data.len();
                    inner.pending.push(data.to_vec());
                    return Ok(data.len());
                }
                _ => return Err(NativeError::WRONG_STATE),
            }
        }
        let remote = s.remote().ok_or(NativeError::WRONG_STATE)?;
        tracing::trace!(stream = s.id, kind = ?s.stream_type, len = data.len(), "stream write");
        remote.emit(StreamEvent::StreamData {
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn open_channel(&self, cookie: &str) -> NativeResult<i32> {
        let s = &self.shared;
        s.require_multiplexing()?;
        let remote = s.connected_remote()?;
        let channel = {
            let mut inner = s.state.lock();
            let channel = inner.next_channel;
            inner.next_channel += 2;
            inner.channels.insert(channel, Channel::default());
            channel
        };
        remote.state.lock().channels.insert(channel, Channel::default());
        remote.emit(StreamEvent::ChannelOpen {
            channel,
            cookie: cookie.to_string(),
        });
        s.emit(StreamEvent::ChannelOpened { channel });
        Ok(channel)
    }

    fn close_channel(&self, channel: i32) -> NativeResult<()> {
        let s = &self.shared;
        if s.state.lock().channels.remove(&channel).is_none() {
            return Err(NativeError::NOT_EXIST);
        }
        if let Some(remote) = s.remote() {
            if remote.state.lock().channels.remove(&channel).is_some() {
                remote.emit(StreamEvent::ChannelClose {
                    channel,
                    reason: CloseReason::Normal,
                });
            }
        }
        Ok(())
    }

    fn write_channel(&self, channel: i32, data: &[u8]) -> NativeResult<usize> {
        let s = &self.shared;
        if data.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        match s.state.lock().channels.get(&channel) {
            None => return Err(NativeError::NOT_EXIST),
            Some(c) if c.held => return Err(NativeError::BUSY),
            Some(_) => {}
        }
        let remote = s.connected_remote()?;
        remote.emit(StreamEvent::ChannelData {
            channel,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn pend_channel(&self, channel: i32) -> NativeResult<()> {
        self.set_held(channel, true)
    }

    fn resume_channel(&self, channel: i32) -> NativeResult<()> {
        self.set_held(channel, false)
    }

    fn open_port_forwarding(
        &self,
        service: &str,
        _protocol: PortForwardingProtocol,
        host: &str,
        port: &str,
    ) -> NativeResult<i32> {
        let s = &self.shared;
        if !s.options.contains(StreamOptions::PORT_FORWARDING) {
            return Err(NativeError::WRONG_STATE);
        }
        port.parse::<u16>().map_err(|_| NativeError::INVALID_ARGS)?;
        if host.is_empty() {
            return Err(NativeError::INVALID_ARGS);
        }
        s.connected_remote()?;
        let remote_session = s.remote_session().ok_or(NativeError::WRONG_STATE)?;
        if !remote_session.has_service(service) {
            return Err(NativeError::NOT_EXIST);
        }
        let mut inner = s.state.lock();
        let pf_id = inner.next_forwarding;
        inner.next_forwarding += 1;
        inner.forwardings.insert(pf_id);
        Ok(pf_id)
    }

    fn close_port_forwarding(&self, pf_id: i32) -> NativeResult<()> {
        if self.shared.state.lock().forwardings.remove(&pf_id) {
            Ok(())
        } else {
            Err(NativeError::NOT_EXIST)
        }
    }
}

impl LoopbackStream {
    /// Ask the peer to stop (or resume) writing on `channel`.
    fn set_held(&self, channel: i32, held: bool) -> NativeResult<()> {
        let s = &self.shared;
        s.require_channel(channel)?;
        let remote = s.connected_remote()?;
        if let Some(c) = remote.state.lock().channels.get_mut(&channel) {
            c.held = held;
        }
        remote.emit(if held {
            StreamEvent::ChannelPending { channel }
        } else {
            StreamEvent::ChannelResume { channel }
        });
        Ok(())
    }
}
