use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use carrier_core::{
    Bridge, BridgeConfig, ChannelSink, EventCategory, EventRecord, HandleKind, LoopbackLibrary,
    INVALID_ID, SUCCESS,
};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);
const NODE_OPTIONS: &str = r#"{"udpEnabled":true,"persistentLocation":"data"}"#;

fn bridge(dir: &tempfile::TempDir) -> Bridge {
    Bridge::new(
        Arc::new(LoopbackLibrary::new()),
        BridgeConfig {
            data_dir: dir.path().to_path_buf(),
            bootstraps: Vec::new(),
        },
    )
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

fn listen(bridge: &Bridge, category: EventCategory) -> mpsc::Receiver<EventRecord> {
    let (sink, rx) = ChannelSink::pair();
    bridge.set_listener(category, Arc::new(sink));
    rx
}

fn next(rx: &mpsc::Receiver<EventRecord>, pred: impl Fn(&EventRecord) -> bool) -> EventRecord {
    loop {
        let record = rx.recv_timeout(WAIT).expect("timed out waiting for event");
        if pred(&record) {
            return record;
        }
    }
}

/// Create and start a carrier in `dir`; returns the createObject summary.
fn started(bridge: &Bridge, dir: &str) -> Value {
    let summary = call(bridge, "createObject", json!([dir, NODE_OPTIONS]));
    assert_eq!(call(bridge, "carrierStart", json!([summary["id"], 1000])), "ok");
    summary
}

fn befriend(bridge: &Bridge, a: &Value, b: &Value) {
    call(bridge, "addFriend", json!([a["id"], b["address"], "hello"]));
    call(bridge, "acceptFriend", json!([b["id"], a["userId"]]));
}

#[test]
fn carrier_lifecycle_and_invalid_handle() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let lifecycle = listen(&bridge, EventCategory::Lifecycle);

    let a = started(&bridge, "alice");
    let id = a["id"].clone();
    next(&lifecycle, |r| r.name == "onReady" && r.id.raw() as u64 == id.as_u64().unwrap());

    let info = call(&bridge, "getSelfInfo", json!([id]));
    assert_eq!(info["userId"], a["userId"]);
    assert_eq!(
        call(&bridge, "setSelfInfo", json!([id, "name", "Alice"])),
        json!({"name": "Alice", "value": "Alice"})
    );
    assert_eq!(call(&bridge, "getSelfInfo", json!([id]))["name"], "Alice");
    assert!(fail(&bridge, "setSelfInfo", json!([id, "nickname", "x"])).starts_with("invalid argument"));

    assert_eq!(call(&bridge, "destroy", json!([id])), json!({}));
    assert_eq!(fail(&bridge, "getSelfInfo", json!([id])), INVALID_ID);
    assert_eq!(fail(&bridge, "destroy", json!([id])), INVALID_ID);
    assert_eq!(bridge.live(HandleKind::Carrier), 0);
}

#[test]
fn argument_errors_come_before_handle_errors() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    assert!(fail(&bridge, "carrierStart", json!([999])).starts_with("invalid argument"));
    assert_eq!(fail(&bridge, "carrierStart", json!([999, 1000])), INVALID_ID);
    assert_eq!(fail(&bridge, "noSuchThing", json!([])), "unknown command: noSuchThing");
}

#[test]
fn native_failures_name_the_command() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);
    assert_eq!(
        fail(&bridge, "addFriend", json!([a["id"], b["address"], "again"])),
        "addFriend error (0x8100000b)"
    );
    let friends = call(&bridge, "getFriends", json!([a["id"]]));
    let bob = &friends["friends"][b["userId"].as_str().unwrap()];
    assert_eq!(bob["status"], 0);
}

#[test]
fn closing_a_session_invalidates_its_streams() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    let session = call(&bridge, "newSession", json!([a["id"], b["userId"]]));
    assert_eq!(session["peer"], b["userId"]);
    let stream = call(&bridge, "addStream", json!([session["id"], 1, 0]));
    assert_eq!(stream["id"], 1);
    let written = call(&bridge, "streamWrite", json!([stream["objId"], "aGVsbG8="]));
    assert_eq!(written["written"], 5);

    assert_eq!(call(&bridge, "sessionClose", json!([session["id"]])), Value::Null);
    assert_eq!(
        fail(&bridge, "streamWrite", json!([stream["objId"], "aGVsbG8="])),
        INVALID_ID
    );
    assert_eq!(fail(&bridge, "getPeer", json!([session["id"]])), INVALID_ID);
    assert_eq!(bridge.live(HandleKind::Stream), 0);
}

#[test]
fn session_handshake_carries_stream_data() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let lifecycle = listen(&bridge, EventCategory::Lifecycle);
    let sessions = listen(&bridge, EventCategory::Session);
    let streams = listen(&bridge, EventCategory::Stream);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    let s1 = call(&bridge, "newSession", json!([a["id"], b["userId"]]));
    let t1 = call(&bridge, "addStream", json!([s1["id"], 3, 8]));
    assert_eq!(call(&bridge, "sessionRequest", json!([s1["id"], 7])), Value::Null);

    let request = next(&lifecycle, |r| r.name == "onSessionRequest");
    assert_eq!(request.field("from"), Some(&a["userId"]));
    let remote_sdp = request.field("sdp").cloned().unwrap();

    let s2 = call(&bridge, "newSession", json!([b["id"], a["userId"]]));
    let t2 = call(&bridge, "addStream", json!([s2["id"], 3, 8]));
    call(&bridge, "sessionReplyRequest", json!([s2["id"], 0]));

    let completion = next(&sessions, |r| r.name == "onCompletion");
    assert_eq!(json!(completion.id), s1["id"]);
    assert_eq!(completion.handler_id, Some(7));
    assert_eq!(completion.field("status"), Some(&json!(0)));
    let sdp = completion.field("sdp").cloned().unwrap();

    call(&bridge, "sessionStart", json!([s1["id"], sdp]));
    call(&bridge, "sessionStart", json!([s2["id"], remote_sdp]));
    let info = call(&bridge, "getTransportInfo", json!([t1["objId"]]));
    assert_eq!(info["topology"], 0);

    call(&bridge, "streamWrite", json!([t1["objId"], "cGluZw=="]));
    let data = next(&streams, |r| r.name == "onStreamData");
    assert_eq!(json!(data.id), t2["objId"]);
    assert_eq!(data.field("data"), Some(&json!("cGluZw==")));

    let channel = call(&bridge, "openChannel", json!([t1["objId"], "chat"]));
    let ch = channel["channel"].clone();
    let opened = next(&streams, |r| r.name == "onChannelOpen");
    assert_eq!(json!(opened.id), t2["objId"]);
    assert_eq!(opened.field("cookie"), Some(&json!("chat")));
    let wrote = call(&bridge, "writeChannel", json!([t1["objId"], ch, "aGk="]));
    assert_eq!(wrote, json!({"channel": ch, "written": 2}));
    call(&bridge, "pendChannel", json!([t2["objId"], ch]));
    assert_eq!(
        fail(&bridge, "writeChannel", json!([t1["objId"], ch, "aGk="])),
        "writeChannel error (0x81000010)"
    );

    call(&bridge, "removeStream", json!([s2["id"], t2["objId"]]));
    assert_eq!(fail(&bridge, "streamWrite", json!([t2["objId"], "aGk="])), INVALID_ID);
}

#[test]
fn port_forwarding_needs_remote_service() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    let s1 = call(&bridge, "newSession", json!([a["id"], b["userId"]]));
    let t1 = call(&bridge, "addStream", json!([s1["id"], 3, 24]));
    call(&bridge, "sessionRequest", json!([s1["id"], 1]));
    let s2 = call(&bridge, "newSession", json!([b["id"], a["userId"]]));
    call(&bridge, "addStream", json!([s2["id"], 3, 24]));
    let svc = call(&bridge, "addService", json!([s2["id"], "web", 1, "127.0.0.1", 8080]));
    assert_eq!(svc["port"], "8080");
    call(&bridge, "sessionReplyRequest", json!([s2["id"], 0]));
    call(&bridge, "sessionStart", json!([s1["id"], "sdp"]));
    call(&bridge, "sessionStart", json!([s2["id"], "sdp"]));

    assert_eq!(
        fail(&bridge, "openPortForwarding", json!([t1["objId"], "ssh", 1, "127.0.0.1", "2222"])),
        "openPortForwarding error (0x8100000a)"
    );
    let pf = call(&bridge, "openPortForwarding", json!([t1["objId"], "web", 1, "127.0.0.1", "9090"]));
    assert_eq!(pf["service"], "web");
    call(&bridge, "closePortForwarding", json!([t1["objId"], pf["pfId"]]));
}

#[test]
fn friend_invite_reply_reaches_handler() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let lifecycle = listen(&bridge, EventCategory::Lifecycle);
    let invites = listen(&bridge, EventCategory::FriendInvite);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    call(&bridge, "inviteFriend", json!([a["id"], b["userId"], "play?", 42]));
    let request = next(&lifecycle, |r| r.name == "onFriendInviteRequest");
    assert_eq!(request.field("message"), Some(&json!("play?")));
    call(
        &bridge,
        "replyFriendInvite",
        json!([b["id"], a["userId"], 0, null, "sure"]),
    );
    let reply = next(&invites, |r| r.name == "onReceived");
    assert_eq!(reply.handler_id, Some(42));
    assert_eq!(json!(reply.id), a["id"]);
    assert_eq!(reply.field("data"), Some(&json!("sure")));
}

#[test]
fn group_conversation() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let lifecycle = listen(&bridge, EventCategory::Lifecycle);
    let groups = listen(&bridge, EventCategory::Group);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    let ga = call(&bridge, "createGroup", json!([a["id"]]))["groupId"].clone();
    assert_eq!(ga.as_str().unwrap().len(), 32);
    assert_eq!(call(&bridge, "getGroupTitle", json!([ga])), json!({"groupTitle": "Untitled"}));

    assert_eq!(call(&bridge, "inviteGroup", json!([ga, b["userId"]])), SUCCESS);
    let invite = next(&lifecycle, |r| r.name == "onGroupInvite");
    let cookie = invite.field("cookieCode").cloned().unwrap();
    let gb = call(&bridge, "joinGroup", json!([b["id"], a["userId"], cookie]))["groupId"].clone();
    assert_ne!(ga, gb);

    let peers = call(&bridge, "getGroupPeers", json!([ga]));
    assert_eq!(peers["peers"].as_object().unwrap().len(), 2);

    call(&bridge, "sendGroupMessage", json!([gb, "hey"]));
    let msg = next(&groups, |r| r.name == "onGroupMessage");
    assert_eq!(msg.group_id.as_ref(), ga.as_str().map(str::to_string).as_ref());
    assert_eq!(msg.field("message"), Some(&json!("hey")));

    assert_eq!(call(&bridge, "leaveGroup", json!([b["id"], gb])), SUCCESS);
    assert_eq!(fail(&bridge, "getGroupTitle", json!([gb])), INVALID_ID);
    // A group can only be left through the carrier that owns it.
    assert_eq!(fail(&bridge, "leaveGroup", json!([b["id"], ga])), INVALID_ID);
}

#[test]
fn file_transfer_relays_requests_and_data() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let lifecycle = listen(&bridge, EventCategory::Lifecycle);
    let transfers = listen(&bridge, EventCategory::FileTransfer);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    let file_id = call(&bridge, "generateFileTransFileId", json!([]))["fileId"].clone();
    let info = json!({"filename": "notes.txt", "fileId": file_id, "size": 11});
    let fa = call(&bridge, "newFileTransfer", json!([a["id"], b["userId"], info]))["fileTransferId"].clone();
    assert_eq!(call(&bridge, "fileTransConnect", json!([fa])), SUCCESS);
    let request = next(&lifecycle, |r| r.name == "onConnectRequest");
    assert_eq!(request.field("info").unwrap()["filename"], "notes.txt");

    let fb = call(&bridge, "newFileTransfer", json!([b["id"], a["userId"], null]))["fileTransferId"].clone();
    call(&bridge, "acceptFileTransConnect", json!([fb]));
    let offered = next(&transfers, |r| r.name == "onFileRequest");
    assert_eq!(json!(offered.file_transfer_id), fb);
    assert_eq!(
        call(&bridge, "getFileTransFileName", json!([fb, file_id])),
        json!({"filename": "notes.txt"})
    );

    call(&bridge, "pullFileTransData", json!([fb, file_id, 0]));
    let pull = next(&transfers, |r| r.name == "onPullRequest");
    assert_eq!(json!(pull.id), fa);
    call(&bridge, "writeFileTransData", json!([fa, file_id, "aGVsbG8gd29ybGQ="]));
    let data = next(&transfers, |r| r.name == "onData");
    assert_eq!(data.field("data"), Some(&json!("aGVsbG8gd29ybGQ=")));
    call(&bridge, "sendFileTransFinish", json!([fa, file_id]));
    next(&transfers, |r| r.name == "onDataFinished");

    assert_eq!(call(&bridge, "closeFileTrans", json!([fa])), SUCCESS);
    assert_eq!(fail(&bridge, "fileTransConnect", json!([fa])), INVALID_ID);
}

#[test]
fn destroy_cascades_to_owned_objects() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    let a = started(&bridge, "alice");
    let b = started(&bridge, "bob");
    befriend(&bridge, &a, &b);

    let s = call(&bridge, "newSession", json!([a["id"], b["userId"]]));
    call(&bridge, "addStream", json!([s["id"], 1, 0]));
    let ga = call(&bridge, "createGroup", json!([a["id"]]))["groupId"].clone();
    let gb = call(&bridge, "createGroup", json!([b["id"]]))["groupId"].clone();
    let info = json!({"filename": "f", "fileId": "id1", "size": 1});
    call(&bridge, "newFileTransfer", json!([a["id"], b["userId"], info]));

    call(&bridge, "destroy", json!([a["id"]]));
    assert_eq!(bridge.live(HandleKind::Session), 0);
    assert_eq!(bridge.live(HandleKind::Stream), 0);
    assert_eq!(bridge.live(HandleKind::FileTransfer), 0);
    assert_eq!(bridge.live(HandleKind::Group), 1);
    assert_eq!(fail(&bridge, "getGroupTitle", json!([ga])), INVALID_ID);
    assert_eq!(call(&bridge, "getGroupTitle", json!([gb]))["groupTitle"], "Untitled");

    bridge.shutdown();
    assert_eq!(bridge.live(HandleKind::Carrier), 0);
    assert_eq!(bridge.live(HandleKind::Group), 0);
}

#[test]
fn listener_switch_redirects_queued_events() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);

    // Hold the node's callback thread on its first lifecycle event.
    let (release, gate) = mpsc::channel::<()>();
    let gate = Mutex::new(gate);
    bridge.set_listener(
        EventCategory::Lifecycle,
        Arc::new(move |r: &EventRecord| {
            if r.name == "onConnection" {
                let _ = gate.lock().unwrap().recv_timeout(WAIT);
            }
        }),
    );
    let first = listen(&bridge, EventCategory::Group);
    let a = started(&bridge, "alice");
    let group = call(&bridge, "createGroup", json!([a["id"]]))["groupId"].clone();

    // The connected event is queued behind the held callback; switch before it lands.
    let second = listen(&bridge, EventCategory::Group);
    release.send(()).unwrap();

    let record = next(&second, |r| r.name == "onGroupConnected");
    assert_eq!(record.group_id.as_deref(), group.as_str());
    assert!(first.try_recv().is_err());
}

#[test]
fn set_listener_command_uses_sink_provider() {
    let dir = tempfile::tempdir().unwrap();
    let bridge = bridge(&dir);
    assert!(fail(&bridge, "setListener", json!([1])).starts_with("invalid argument"));

    let (sink, rx) = ChannelSink::pair();
    let sink: Arc<dyn carrier_core::EventSink> = Arc::new(sink);
    bridge.set_sink_provider(Arc::new(move |_category: EventCategory| Arc::clone(&sink)));
    assert_eq!(call(&bridge, "setListener", json!([1])), Value::Null);
    assert!(bridge.listeners().is_registered(EventCategory::Lifecycle));
    assert!(fail(&bridge, "setListener", json!([7])).starts_with("invalid argument"));

    started(&bridge, "alice");
    next(&rx, |r| r.name == "onReady");

    bridge.clear_sink_provider();
    assert!(fail(&bridge, "setListener", json!([2])).starts_with("invalid argument"));
}
