use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use ed25519_dalek::VerifyingKey;
use fedsync_rs::{networking::Network, sync::messages::Message};

/// A mock network stub which passes messages from and to threads using channels.
///
/// Connectivity can be cut along group lines with [`partition`](NetworkStub::partition) to
/// simulate network partitions: a message is delivered only if sender and receiver are in the
/// same group.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, Message)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, Message)>>>,
    groups: Arc<Mutex<HashMap<VerifyingKey, u32>>>,
}

impl NetworkStub {
    fn connected(&self, peer: &VerifyingKey) -> bool {
        let groups = self.groups.lock().unwrap();
        let mine = groups.get(&self.my_verifying_key).copied().unwrap_or(0);
        let theirs = groups.get(peer).copied().unwrap_or(0);
        mine == theirs
    }
}

impl Network for NetworkStub {
    fn init_peers(&mut self, _: &[VerifyingKey]) {}

    fn add_peer(&mut self, _: VerifyingKey) {}

    fn send(&mut self, peer: VerifyingKey, message: Message) {
        if !self.connected(&peer) {
            return;
        }
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_verifying_key, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for (verifying_key, peer) in &self.all_peers {
            if *verifying_key == self.my_verifying_key || !self.connected(verifying_key) {
                continue;
            }
            let _ = peer.send((self.my_verifying_key, message.clone()));
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Create a fully connected set of network stubs, one per peer.
pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    let groups = Arc::new(Mutex::new(HashMap::new()));

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
            groups: Arc::clone(&groups),
        })
        .collect()
}

/// Assign peers to connectivity groups; messages cross group boundaries only within the same
/// group. Pass an empty map to restore full connectivity.
pub(crate) fn partition(stubs: &[NetworkStub], assignment: HashMap<VerifyingKey, u32>) {
    if let Some(stub) = stubs.first() {
        *stub.groups.lock().unwrap() = assignment;
    }
}
