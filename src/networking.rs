/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the internal
//! types and functions that nodes use to interact with the network.
//!
//! FedSync-rs has modular peer-to-peer networking, with each peer reachable by its announcement
//! [VerifyingKey]. Networking providers interact with FedSync-rs' threads through
//! implementations of the [Network] trait, whose methods collectively allow peers to exchange
//! sync protocol and gossip messages.
//!
//! Internally, a poller thread drains the network and demultiplexes incoming messages into
//! per-subsystem channels: sync requests go to the [sync server](crate::sync::server), sync
//! responses go through a [response router](ResponseRouter) to whichever session is talking to
//! the sending peer, and gossip goes to the [peer directory](crate::peers::directory).

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use ed25519_dalek::VerifyingKey;

use crate::sync::messages::*;
use crate::types::basic::VerifyingKeyBytes;

pub trait Network: Clone + Send {
    /// Informs the network provider of the initially known peers on wake-up.
    fn init_peers(&mut self, peers: &[VerifyingKey]);

    /// Informs the networking provider of a peer discovered after wake-up.
    fn add_peer(&mut self, peer: VerifyingKey);

    /// Send a message to all known peers without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is
    /// available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}

/// Spawn the poller thread, which polls the Network for messages and distributes them into
/// receivers for sync requests, sync responses, and gossip messages.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, SyncRequest)>,
    Receiver<(VerifyingKey, SyncResponse)>,
    Receiver<(VerifyingKey, GossipMessage)>,
) {
    let (to_sync_request_receiver, sync_request_receiver) = mpsc::channel();
    let (to_sync_response_receiver, sync_response_receiver) = mpsc::channel();
    let (to_gossip_receiver, gossip_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::SyncMessage(s_msg) => match s_msg {
                    SyncMessage::SyncRequest(s_req) => {
                        let _ = to_sync_request_receiver.send((origin, s_req));
                    }
                    SyncMessage::SyncResponse(s_res) => {
                        let _ = to_sync_response_receiver.send((origin, s_res));
                    }
                },
                Message::GossipMessage(g_msg) => {
                    let _ = to_gossip_receiver.send((origin, g_msg));
                }
            }
        } else {
            thread::yield_now()
        }
    });
    (
        poller_thread,
        sync_request_receiver,
        sync_response_receiver,
        gossip_receiver,
    )
}

/// A cloneable sending end for any message type convertible into [Message].
pub(crate) struct SenderHandle<N: Network>(N);

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> SenderHandle<N> {
        SenderHandle(network)
    }

    pub(crate) fn send<M: Into<Message>>(&mut self, peer: VerifyingKey, msg: M) {
        self.0.send(peer, msg.into())
    }

    pub(crate) fn broadcast<M: Into<Message>>(&mut self, msg: M) {
        self.0.broadcast(msg.into())
    }

    pub(crate) fn add_peer(&mut self, peer: VerifyingKey) {
        self.0.add_peer(peer)
    }
}

impl<N: Network> Clone for SenderHandle<N> {
    fn clone(&self) -> Self {
        SenderHandle(self.0.clone())
    }
}

/// Routes incoming sync responses to whichever sync session registered for the sending peer.
///
/// Several sync sessions may be in flight at once, each awaiting responses from a different
/// peer. The single response channel out of the poller is demultiplexed here: a session
/// [registers](ResponseRouter::register) its peer and gets a private receiver; responses from
/// peers nobody registered for are dropped.
#[derive(Clone)]
pub(crate) struct ResponseRouter {
    routes: Arc<Mutex<HashMap<VerifyingKeyBytes, Sender<SyncResponse>>>>,
}

impl ResponseRouter {
    pub(crate) fn register(&self, peer: &VerifyingKey) -> Receiver<SyncResponse> {
        let (sender, receiver) = mpsc::channel();
        self.routes
            .lock()
            .unwrap()
            .insert(peer.to_bytes(), sender);
        receiver
    }

    pub(crate) fn deregister(&self, peer: &VerifyingKey) {
        self.routes.lock().unwrap().remove(&peer.to_bytes());
    }
}

/// Spawn the response router thread.
pub(crate) fn start_response_router(
    responses: Receiver<(VerifyingKey, SyncResponse)>,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, ResponseRouter) {
    let router = ResponseRouter {
        routes: Arc::new(Mutex::new(HashMap::new())),
    };
    let routes = Arc::clone(&router.routes);

    let router_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Response router thread disconnected from main thread")
            }
        }

        match responses.try_recv() {
            Ok((origin, response)) => {
                let routes = routes.lock().unwrap();
                if let Some(route) = routes.get(&origin.to_bytes()) {
                    let _ = route.send(response);
                }
            }
            Err(TryRecvError::Empty) => thread::yield_now(),
            // Safety: the router thread shuts down before the poller thread (the sender side
            // of this channel), so we will never be disconnected at this point.
            Err(TryRecvError::Disconnected) => panic!(),
        }
    });
    (router_thread, router)
}

/// Receive a response from a session's private receiver, waiting until `deadline` at the
/// longest.
pub(crate) fn recv_response_until(
    responses: &Receiver<SyncResponse>,
    deadline: Instant,
) -> Option<SyncResponse> {
    while Instant::now() < deadline {
        match responses.recv_timeout(deadline - Instant::now()) {
            Ok(response) => return Some(response),
            Err(RecvTimeoutError::Timeout) => return None,
            // The router dropped our route; treat as a timeout.
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
    None
}

/// The sync server's receiving end for requests.
pub(crate) struct ServerStub {
    requests: Receiver<(VerifyingKey, SyncRequest)>,
}

impl ServerStub {
    pub(crate) fn new(requests: Receiver<(VerifyingKey, SyncRequest)>) -> ServerStub {
        ServerStub { requests }
    }

    pub(crate) fn recv_request(&self) -> Option<(VerifyingKey, SyncRequest)> {
        match self.requests.try_recv() {
            Ok((origin, request)) => Some((origin, request)),
            // Safety: the sync server thread shuts down before the poller thread (the sender
            // side of this channel), so we will never be disconnected at this point.
            Err(TryRecvError::Disconnected) => panic!(),
            Err(TryRecvError::Empty) => None,
        }
    }
}

/// The peer directory's receiving end for gossip messages.
pub(crate) struct GossipStub {
    messages: Receiver<(VerifyingKey, GossipMessage)>,
}

impl GossipStub {
    pub(crate) fn new(messages: Receiver<(VerifyingKey, GossipMessage)>) -> GossipStub {
        GossipStub { messages }
    }

    pub(crate) fn recv(&self) -> Option<(VerifyingKey, GossipMessage)> {
        match self.messages.try_recv() {
            Ok((origin, message)) => Some((origin, message)),
            // Safety: the directory thread shuts down before the poller thread (the sender
            // side of this channel), so we will never be disconnected at this point.
            Err(TryRecvError::Disconnected) => panic!(),
            Err(TryRecvError::Empty) => None,
        }
    }
}
