//! In-process stand-in for the native carrier library.
//!
//! Every node lives in one [`LoopbackNetwork`]; friend requests, messages, sessions,
//! groups and file transfers are relayed between nodes in memory. There is no real
//! transport. Each node owns one callback thread and every callback for objects of that
//! node runs there, so callbacks for one object are serial.
//!
//! Lock order: a node or object lock may be held while taking the network lock, never
//! the other way round, and no code holds two node locks at once.

mod group;
pub mod identity;
mod node;
mod session;
pub mod store;
mod transfer;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{mpsc, Arc, Weak};
use std::thread;

use parking_lot::{Mutex, MutexGuard};

use crate::error::NativeResult;
use crate::event::{CarrierEvent, FriendInviteEvent};
use crate::native::{CarrierOptions, NativeCarrier, NativeLibrary};
use crate::router::Callback;

pub use node::LoopbackCarrier;

use node::Node;
use session::SessionShared;
use transfer::TransferShared;

/// Shared medium all loopback nodes talk through.
#[derive(Default)]
pub struct LoopbackNetwork {
    state: Mutex<NetworkState>,
}

/// Pairs below are `(to, from)` unless noted.
#[derive(Default)]
pub(crate) struct NetworkState {
    nodes: HashMap<String, Weak<Node>>,
    offline_messages: HashMap<String, Vec<(String, Vec<u8>)>>,
    friend_requests: HashSet<(String, String)>,
    /// `(invitee, inviter)` to the inviter's reply callbacks, oldest first.
    invites: HashMap<(String, String), VecDeque<Callback<FriendInviteEvent>>>,
    session_requests: HashMap<(String, String), Weak<SessionShared>>,
    rooms: HashMap<Vec<u8>, group::Room>,
    /// `(invitee, cookie)` to inviter.
    group_invites: HashMap<(String, Vec<u8>), String>,
    transfer_requests: HashMap<(String, String), Weak<TransferShared>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock()
    }

    fn node(&self, user_id: &str) -> Option<Arc<Node>> {
        self.lock().nodes.get(user_id).and_then(Weak::upgrade)
    }

    /// Node of `user_id` if it exists and is running.
    fn online(&self, user_id: &str) -> Option<Arc<Node>> {
        self.node(user_id).filter(|n| n.is_online())
    }

    /// Number of nodes created and not yet killed.
    pub fn node_count(&self) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|n| n.strong_count() > 0)
            .count()
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// A node's callback thread. Jobs run in posting order.
struct Dispatcher {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
}

impl Dispatcher {
    fn spawn(name: String) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        thread::Builder::new().name(name).spawn(move || {
            for job in rx {
                job();
            }
        })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    /// Queue a job. False once the dispatcher is stopped.
    fn post(&self, job: Job) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    /// Stop accepting jobs. Queued jobs still run, then the thread exits.
    fn stop(&self) {
        self.tx.lock().take();
    }
}

/// [`NativeLibrary`] over a [`LoopbackNetwork`].
pub struct LoopbackLibrary {
    network: Arc<LoopbackNetwork>,
}

impl LoopbackLibrary {
    pub fn new() -> Self {
        Self::with_network(LoopbackNetwork::new())
    }

    /// Library attached to an existing network, so nodes created by several bridges
    /// can reach each other.
    pub fn with_network(network: Arc<LoopbackNetwork>) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &Arc<LoopbackNetwork> {
        &self.network
    }
}

impl Default for LoopbackLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeLibrary for LoopbackLibrary {
    fn version(&self) -> String {
        format!("carrier-loopback-{}", env!("CARGO_PKG_VERSION"))
    }

    fn is_valid_address(&self, address: &str) -> bool {
        identity::parse_address(address).is_some()
    }

    fn is_valid_id(&self, id: &str) -> bool {
        identity::is_valid_user_id(id)
    }

    fn id_from_address(&self, address: &str) -> Option<String> {
        identity::user_id_from_address(address)
    }

    fn generate_file_id(&self) -> String {
        bs58::encode(rand::random::<[u8; 16]>()).into_string()
    }

    fn create_carrier(
        &self,
        options: CarrierOptions,
        callback: Callback<CarrierEvent>,
    ) -> NativeResult<Box<dyn NativeCarrier>> {
        let node = Node::create(Arc::clone(&self.network), options, callback)?;
        Ok(Box::new(LoopbackCarrier::new(node)))
    }
}
