pub mod camera;
pub mod flv;
pub mod hls;

pub use self::{camera::CameraBroadcaster, flv::FlvBroadcaster, hls::HlsBroadcaster};

use {
    crate::transport::ClientId,
    bytes::Bytes,
    std::{collections::HashMap, sync::Mutex},
    tokio::sync::mpsc,
};

/// Scratch-read size for upstream pull loops.
pub(crate) const PULL_CHUNK_SIZE: usize = 4096;

/// Live subscriber queues for one broadcaster.
///
/// Joins enqueue their catch-up packets and register under the same
/// lock, so a subscriber can never observe a broadcast that slipped in
/// between the two. Broadcasts snapshot the table, release the lock and
/// send non-blocking: a full queue drops the packet for that subscriber
/// only.
pub(crate) struct SubscriberTable {
    inner: Mutex<HashMap<ClientId, mpsc::Sender<Bytes>>>,
}

impl SubscriberTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn join(&self, id: &str, tx: mpsc::Sender<Bytes>, catch_up: &[Bytes]) {
        let mut map = self.inner.lock().unwrap();
        for packet in catch_up {
            let _ = tx.try_send(packet.clone());
        }
        map.insert(id.to_owned(), tx);
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        self.inner.lock().unwrap().remove(id).is_some()
    }

    pub(crate) fn broadcast(&self, data: &Bytes) {
        let senders: Vec<mpsc::Sender<Bytes>> = {
            let map = self.inner.lock().unwrap();
            if map.is_empty() {
                return;
            }
            map.values().cloned().collect()
        };
        for tx in senders {
            let _ = tx.try_send(data.clone());
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}
