use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use quorum_smr::{messages::Message, networking::Network, types::basic::ReplicaId, types::view::View};

/// A mock network stub which passes messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    me: ReplicaId,
    all_peers: HashMap<ReplicaId, Sender<(ReplicaId, Message)>>,
    inbox: Arc<Mutex<Receiver<(ReplicaId, Message)>>>,
}

impl Network for NetworkStub {
    fn init_view(&mut self, _: &View) {}

    fn update_view(&mut self, _: &View) {}

    fn send(&mut self, peer: ReplicaId, message: Message) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.me, message));
        }
    }

    fn broadcast(&mut self, message: Message) {
        for (peer, sender) in &self.all_peers {
            // Broadcasts do not loop back to the sender.
            if *peer != self.me {
                let _ = sender.send((self.me, message.clone()));
            }
        }
    }

    fn recv(&mut self) -> Option<(ReplicaId, Message)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

/// Create one connected [NetworkStub] per peer, in the same order as `peers`.
pub(crate) fn mock_network(peers: impl Iterator<Item = ReplicaId>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(ReplicaId, Receiver<(ReplicaId, Message)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(me, inbox)| NetworkStub {
            me,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
