//! Dispatch behavior against a scripted native library that records every call it sees.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use carrier_core::event::{CarrierEvent, FriendInviteEvent};
use carrier_core::native::{
    CarrierOptions, FileTransferInfo, FriendInfo, GroupPeer, NativeCarrier, NativeFileTransfer,
    NativeGroup, NativeLibrary, NativeSession, NativeStream, PortForwardingProtocol,
    PresenceStatus, StreamOptions, StreamType, UserInfo,
};
use carrier_core::{
    Bridge, BridgeConfig, Callback, FileTransferEvent, GroupEvent, HandleKind, NativeError,
    NativeResult, SessionEvent, StreamEvent, INVALID_ID,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);
const NODE_OPTIONS: &str = r#"{"udpEnabled":true,"persistentLocation":"data"}"#;

/// Parks the next child creation after the native object exists.
struct Hold {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

#[derive(Default)]
struct Calls {
    native: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    groups_opened: AtomicUsize,
    groups_left: AtomicUsize,
    transfers_opened: AtomicUsize,
    transfers_closed: AtomicUsize,
    fail_title: AtomicBool,
    hold: Mutex<Option<Hold>>,
}

impl Calls {
    fn hit(&self) {
        self.native.fetch_add(1, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.native.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        let hold = self.hold.lock().unwrap().take();
        if let Some(hold) = hold {
            hold.entered.send(()).unwrap();
            hold.release.recv_timeout(WAIT).unwrap();
        }
    }

    /// Arm a hold; returns (entered, release) ends for the test thread.
    fn arm(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.hold.lock().unwrap() = Some(Hold {
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

struct ScriptedLibrary {
    calls: Arc<Calls>,
}

impl NativeLibrary for ScriptedLibrary {
    fn version(&self) -> String {
        self.calls.hit();
        "scripted".into()
    }

    fn is_valid_address(&self, _address: &str) -> bool {
        self.calls.hit();
        true
    }

    fn is_valid_id(&self, _id: &str) -> bool {
        self.calls.hit();
        true
    }

    fn id_from_address(&self, address: &str) -> Option<String> {
        self.calls.hit();
        Some(address.to_string())
    }

    fn generate_file_id(&self) -> String {
        self.calls.hit();
        "file".into()
    }

    fn create_carrier(
        &self,
        _options: CarrierOptions,
        _callback: Callback<CarrierEvent>,
    ) -> NativeResult<Box<dyn NativeCarrier>> {
        self.calls.hit();
        Ok(Box::new(ScriptedCarrier {
            calls: self.calls.clone(),
            killed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedCarrier {
    calls: Arc<Calls>,
    killed: AtomicBool,
}

impl ScriptedCarrier {
    fn alive(&self) -> NativeResult<()> {
        self.calls.hit();
        if self.killed.load(Ordering::SeqCst) {
            Err(NativeError::WRONG_STATE)
        } else {
            Ok(())
        }
    }
}

impl NativeCarrier for ScriptedCarrier {
    fn start(&self, _interval_ms: u32) -> NativeResult<()> {
        self.alive()
    }

    fn kill(&self) {
        self.calls.hit();
        self.killed.store(true, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.alive().is_ok()
    }

    fn node_id(&self) -> String {
        self.calls.hit();
        "node".into()
    }

    fn user_id(&self) -> String {
        self.calls.hit();
        "user".into()
    }

    fn address(&self) -> String {
        self.calls.hit();
        "address".into()
    }

    fn self_info(&self) -> NativeResult<UserInfo> {
        self.alive().map(|_| UserInfo::default())
    }

    fn set_self_info(&self, _info: UserInfo) -> NativeResult<()> {
        self.alive()
    }

    fn nospam(&self) -> NativeResult<u32> {
        self.alive().map(|_| 7)
    }

    fn set_nospam(&self, _nospam: u32) -> NativeResult<()> {
        self.alive()
    }

    fn presence(&self) -> NativeResult<PresenceStatus> {
        self.alive().map(|_| PresenceStatus::None)
    }

    fn set_presence(&self, _presence: PresenceStatus) -> NativeResult<()> {
        self.alive()
    }

    fn friends(&self) -> NativeResult<Vec<FriendInfo>> {
        self.alive().map(|_| Vec::new())
    }

    fn friend(&self, _user_id: &str) -> NativeResult<FriendInfo> {
        self.alive()?;
        Err(NativeError::NOT_EXIST)
    }

    fn label_friend(&self, _user_id: &str, _label: &str) -> NativeResult<()> {
        self.alive()
    }

    fn is_friend(&self, _user_id: &str) -> NativeResult<bool> {
        self.alive().map(|_| false)
    }

    fn add_friend(&self, _address: &str, _hello: &str) -> NativeResult<()> {
        self.alive()
    }

    fn accept_friend(&self, _user_id: &str) -> NativeResult<()> {
        self.alive()
    }

    fn remove_friend(&self, _user_id: &str) -> NativeResult<()> {
        self.alive()
    }

    fn send_friend_message(&self, _to: &str, _message: &[u8]) -> NativeResult<bool> {
        self.alive().map(|_| false)
    }

    fn invite_friend(
        &self,
        _to: &str,
        _data: &str,
        _callback: Callback<FriendInviteEvent>,
    ) -> NativeResult<()> {
        self.alive()
    }

    fn reply_friend_invite(
        &self,
        _to: &str,
        _status: i32,
        _reason: Option<&str>,
        _data: Option<&str>,
    ) -> NativeResult<()> {
        self.alive()
    }

    fn new_session(&self, to: &str) -> NativeResult<Box<dyn NativeSession>> {
        self.alive()?;
        self.calls.sessions_opened.fetch_add(1, Ordering::SeqCst);
        let session = ScriptedSession {
            calls: self.calls.clone(),
            peer: to.to_string(),
        };
        self.calls.pause();
        Ok(Box::new(session))
    }

    fn new_group(&self, _callback: Callback<GroupEvent>) -> NativeResult<Box<dyn NativeGroup>> {
        self.alive()?;
        self.calls.groups_opened.fetch_add(1, Ordering::SeqCst);
        let group = ScriptedGroup {
            calls: self.calls.clone(),
        };
        self.calls.pause();
        Ok(Box::new(group))
    }

    fn join_group(
        &self,
        _friend_id: &str,
        _cookie: &[u8],
        _callback: Callback<GroupEvent>,
    ) -> NativeResult<Box<dyn NativeGroup>> {
        self.alive()?;
        self.calls.groups_opened.fetch_add(1, Ordering::SeqCst);
        let group = ScriptedGroup {
            calls: self.calls.clone(),
        };
        self.calls.pause();
        Ok(Box::new(group))
    }

    fn new_file_transfer(
        &self,
        _to: &str,
        _info: Option<FileTransferInfo>,
        _callback: Callback<FileTransferEvent>,
    ) -> NativeResult<Box<dyn NativeFileTransfer>> {
        self.alive()?;
        self.calls.transfers_opened.fetch_add(1, Ordering::SeqCst);
        let transfer = ScriptedTransfer {
            calls: self.calls.clone(),
        };
        self.calls.pause();
        Ok(Box::new(transfer))
    }
}

struct ScriptedSession {
    calls: Arc<Calls>,
    peer: String,
}

impl NativeSession for ScriptedSession {
    fn peer(&self) -> String {
        self.calls.hit();
        self.peer.clone()
    }

    fn request(&self, _callback: Callback<SessionEvent>) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn reply_request(&self, _status: i32, _reason: Option<&str>) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn start(&self, _sdp: &str) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn add_stream(
        &self,
        _stream_type: StreamType,
        _options: StreamOptions,
        _callback: Callback<StreamEvent>,
    ) -> NativeResult<Box<dyn NativeStream>> {
        self.calls.hit();
        Err(NativeError::WRONG_STATE)
    }

    fn remove_stream(&self, _stream_id: i32) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn add_service(
        &self,
        _service: &str,
        _protocol: PortForwardingProtocol,
        _host: &str,
        _port: &str,
    ) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn remove_service(&self, _service: &str) {
        self.calls.hit();
    }

    fn close(&self) {
        self.calls.hit();
        self.calls.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedGroup {
    calls: Arc<Calls>,
}

impl NativeGroup for ScriptedGroup {
    fn invite(&self, _friend_id: &str) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn send_message(&self, _message: &[u8]) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn title(&self) -> NativeResult<String> {
        self.calls.hit();
        Ok("Untitled".into())
    }

    fn set_title(&self, _title: &str) -> NativeResult<()> {
        self.calls.hit();
        if self.calls.fail_title.load(Ordering::SeqCst) {
            Err(NativeError::LIMIT_EXCEEDED)
        } else {
            Ok(())
        }
    }

    fn peers(&self) -> NativeResult<Vec<GroupPeer>> {
        self.calls.hit();
        Ok(Vec::new())
    }

    fn peer(&self, _peer_id: &str) -> NativeResult<GroupPeer> {
        self.calls.hit();
        Err(NativeError::NOT_EXIST)
    }

    fn leave(&self) -> NativeResult<()> {
        self.calls.hit();
        self.calls.groups_left.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedTransfer {
    calls: Arc<Calls>,
}

impl NativeFileTransfer for ScriptedTransfer {
    fn connect(&self) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn accept_connect(&self) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn add_file(&self, _info: FileTransferInfo) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn pull_data(&self, _file_id: &str, _offset: u64) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn write_data(&self, _file_id: &str, data: &[u8]) -> NativeResult<usize> {
        self.calls.hit();
        Ok(data.len())
    }

    fn send_finish(&self, _file_id: &str) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn cancel_transfer(&self, _file_id: &str, _status: i32, _reason: &str) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn pend_transfer(&self, _file_id: &str) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn resume_transfer(&self, _file_id: &str) -> NativeResult<()> {
        self.calls.hit();
        Ok(())
    }

    fn file_id(&self, filename: &str) -> NativeResult<String> {
        self.calls.hit();
        Ok(filename.to_string())
    }

    fn file_name(&self, file_id: &str) -> NativeResult<String> {
        self.calls.hit();
        Ok(file_id.to_string())
    }

    fn close(&self) {
        self.calls.hit();
        self.calls.transfers_closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn scripted(dir: &tempfile::TempDir) -> (Bridge, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let bridge = Bridge::new(
        Arc::new(ScriptedLibrary {
            calls: calls.clone(),
        }),
        BridgeConfig {
            data_dir: dir.path().to_path_buf(),
            bootstraps: Vec::new(),
        },
    );
    (bridge, calls)
}

fn call(bridge: &Bridge, name: &str, args: Value) -> Value {
    let args = args.as_array().cloned().unwrap_or_default();
    bridge
        .dispatch(name, &args)
        .unwrap_or_else(|e| panic!("{name} failed: {e}"))
}

fn fail(bridge: &Bridge, name: &str, args: Value) -> String {
    let args = args.as_array().cloned().unwrap_or_default();
    match bridge.dispatch(name, &args) {
        Ok(v) => panic!("{name} unexpectedly returned {v}"),
        Err(e) => e.to_string(),
    }
}

fn carrier(bridge: &Bridge) -> Value {
    call(bridge, "createObject", json!(["node", NODE_OPTIONS]))["id"].clone()
}

/// Run `name` with its native creation parked, destroy the carrier meanwhile, then let the
/// creation finish. Returns the command's error message.
fn create_during_destroy(
    bridge: &Bridge,
    calls: &Calls,
    id: &Value,
    name: &str,
    args: Value,
) -> String {
    let (entered, release) = calls.arm();
    thread::scope(|s| {
        let creating = s.spawn(|| fail(bridge, name, args));
        entered.recv_timeout(WAIT).unwrap();
        assert_eq!(call(bridge, "destroy", json!([id])), json!({}));
        release.send(()).unwrap();
        creating.join().unwrap()
    })
}

#[test]
fn session_created_during_destroy_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);
    let id = carrier(&bridge);

    let err = create_during_destroy(&bridge, &calls, &id, "newSession", json!([id, "peer"]));
    assert_eq!(err, INVALID_ID);
    assert_eq!(bridge.live(HandleKind::Session), 0);
    assert_eq!(calls.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(calls.sessions_closed.load(Ordering::SeqCst), 1);
}

#[test]
fn group_created_during_destroy_is_left() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);
    let id = carrier(&bridge);

    let err = create_during_destroy(&bridge, &calls, &id, "createGroup", json!([id]));
    assert_eq!(err, INVALID_ID);
    assert_eq!(bridge.live(HandleKind::Group), 0);
    assert_eq!(calls.groups_left.load(Ordering::SeqCst), 1);
}

#[test]
fn joined_group_during_destroy_is_left() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);
    let id = carrier(&bridge);

    let cookie = bs58::encode(b"cookie").into_string();
    let args = json!([id, "friend", cookie]);
    let err = create_during_destroy(&bridge, &calls, &id, "joinGroup", args);
    assert_eq!(err, INVALID_ID);
    assert_eq!(bridge.live(HandleKind::Group), 0);
    assert_eq!(calls.groups_left.load(Ordering::SeqCst), 1);
}

#[test]
fn transfer_created_during_destroy_is_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);
    let id = carrier(&bridge);

    let err = create_during_destroy(&bridge, &calls, &id, "newFileTransfer", json!([id, "peer"]));
    assert_eq!(err, INVALID_ID);
    assert_eq!(bridge.live(HandleKind::FileTransfer), 0);
    assert_eq!(calls.transfers_opened.load(Ordering::SeqCst), 1);
    assert_eq!(calls.transfers_closed.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_group_title_leaves_group() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);
    let id = carrier(&bridge);

    calls.fail_title.store(true, Ordering::SeqCst);
    assert_eq!(
        fail(&bridge, "createGroup", json!([id])),
        "createGroup error (0x81000016)"
    );
    assert_eq!(bridge.live(HandleKind::Group), 0);
    assert_eq!(calls.groups_opened.load(Ordering::SeqCst), 1);
    assert_eq!(calls.groups_left.load(Ordering::SeqCst), 1);

    calls.fail_title.store(false, Ordering::SeqCst);
    assert!(call(&bridge, "createGroup", json!([id]))["groupId"].is_string());
    assert_eq!(bridge.live(HandleKind::Group), 1);
}

#[test]
fn rejected_commands_never_reach_native() {
    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);
    let id = carrier(&bridge);
    let session = call(&bridge, "newSession", json!([id, "peer"]))["id"].clone();
    let before = calls.count();

    // Handles that resolve nowhere.
    assert_eq!(fail(&bridge, "getSelfInfo", json!([99])), INVALID_ID);
    assert_eq!(fail(&bridge, "newSession", json!([99, "peer"])), INVALID_ID);
    assert_eq!(fail(&bridge, "createGroup", json!([99])), INVALID_ID);
    assert_eq!(fail(&bridge, "sessionStart", json!([99, "sdp"])), INVALID_ID);
    assert_eq!(fail(&bridge, "streamWrite", json!([99, "aGk="])), INVALID_ID);
    assert_eq!(fail(&bridge, "sendGroupMessage", json!(["nope", "hi"])), INVALID_ID);
    assert_eq!(fail(&bridge, "fileTransConnect", json!([99])), INVALID_ID);

    // Malformed arguments on live handles.
    fail(&bridge, "carrierStart", json!([id]));
    fail(&bridge, "setNospam", json!([id, "many"]));
    fail(&bridge, "addStream", json!([session, 99, 0]));
    fail(&bridge, "addStream", json!([session, 2, 64]));
    fail(&bridge, "joinGroup", json!([id, "friend", "0OIl"]));

    assert_eq!(calls.count(), before);
}

#[test]
fn concurrent_creation_and_destroy_leave_no_orphans() {
    const ROUNDS: usize = 20;
    const WORKERS: usize = 4;
    const ATTEMPTS: usize = 30;

    let dir = tempfile::tempdir().unwrap();
    let (bridge, calls) = scripted(&dir);

    for _ in 0..ROUNDS {
        let id = carrier(&bridge);
        let go = Barrier::new(WORKERS + 1);
        thread::scope(|s| {
            for w in 0..WORKERS {
                let (bridge, id, go) = (&bridge, &id, &go);
                s.spawn(move || {
                    go.wait();
                    for i in 0..ATTEMPTS {
                        let _ = match (w + i) % 3 {
                            0 => bridge.dispatch("newSession", &[id.clone(), json!("peer")]),
                            1 => bridge.dispatch("createGroup", &[id.clone()]),
                            _ => bridge.dispatch("newFileTransfer", &[id.clone(), json!("peer")]),
                        };
                    }
                });
            }
            go.wait();
            thread::yield_now();
            assert_eq!(call(&bridge, "destroy", json!([id])), json!({}));
        });

        for kind in [
            HandleKind::Carrier,
            HandleKind::Session,
            HandleKind::Stream,
            HandleKind::Group,
            HandleKind::FileTransfer,
        ] {
            assert_eq!(bridge.live(kind), 0, "{kind:?} outlived its carrier");
        }
    }

    assert_eq!(
        calls.sessions_opened.load(Ordering::SeqCst),
        calls.sessions_closed.load(Ordering::SeqCst)
    );
    assert_eq!(
        calls.transfers_opened.load(Ordering::SeqCst),
        calls.transfers_closed.load(Ordering::SeqCst)
    );
}
