use {
    super::SubscriberTable,
    crate::errors::{RelayError, Result},
    crate::transport::{
        signal_channels, BroadcasterClosedTx, BroadcasterHandle, ClientClosedRx, ClientClosedTx,
        CloseKind,
    },
    bytes::Bytes,
    hyper::body::HttpBody,
    hyper::Body,
    std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    },
    tokio::sync::mpsc,
};

/// Per-subscriber queue depth for camera viewers.
pub const QUEUE_CAPACITY: usize = 1024;

/// Default cap on the GOP cache, in packets.
pub const DEFAULT_GOP_MAX: usize = 150;

/// One camera channel, fed by a single HTTP POST ingest. The most
/// recent GOP is cached so a new viewer starts on a keyframe.
pub struct CameraBroadcaster {
    key: String,
    gop: Mutex<VecDeque<Bytes>>,
    gop_max: usize,
    subscribers: SubscriberTable,
    closed_tx: BroadcasterClosedTx,
    client_closed_tx: ClientClosedTx,
}

impl CameraBroadcaster {
    pub fn spawn(key: &str, gop_max: usize) -> Arc<Self> {
        let gop_max = if gop_max == 0 { DEFAULT_GOP_MAX } else { gop_max };
        let (client_closed_tx, client_closed_rx, closed_tx) = signal_channels();
        let broadcaster = Arc::new(Self {
            key: key.to_owned(),
            gop: Mutex::new(VecDeque::new()),
            gop_max,
            subscribers: SubscriberTable::new(),
            closed_tx,
            client_closed_tx,
        });

        tokio::spawn(broadcaster.clone().supervise(client_closed_rx));
        log::info!("camera[{}]: ingest attached", key);
        broadcaster
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> BroadcasterHandle {
        BroadcasterHandle::new(self.client_closed_tx.clone(), self.closed_tx.clone())
    }

    pub fn shutdown(&self, kind: CloseKind) {
        let _ = self.closed_tx.send(kind);
    }

    /// Registers a viewer queue, draining the cached GOP into it first.
    ///
    /// The GOP lock is held across snapshot and registration so no
    /// concurrent `push_chunk` can slip a packet between the two: the
    /// viewer sees each packet exactly once, either from the GOP replay
    /// or live.
    pub fn join(&self, client_id: &str, tx: mpsc::Sender<Bytes>) {
        {
            let gop = self.gop.lock().unwrap();
            let catch_up: Vec<Bytes> = gop.iter().cloned().collect();
            self.subscribers.join(client_id, tx, &catch_up);
        }
        log::info!(
            "camera[{}]: client {} joined ({} watching)",
            self.key,
            client_id,
            self.subscribers.len()
        );
    }

    /// Consumes the ingest body until it ends or the broadcaster is
    /// closed. The caller removes this broadcaster from its registry
    /// afterwards; one ingest is the channel's whole lifetime.
    pub async fn ingest_loop(&self, body: &mut Body) -> Result<()> {
        let mut closed = self.closed_tx.subscribe();
        loop {
            tokio::select! {
                maybe_chunk = body.data() => match maybe_chunk {
                    Some(Ok(chunk)) => self.push_chunk(chunk),
                    Some(Err(e)) => {
                        log::info!("camera[{}]: ingest ended: {}", self.key, e);
                        return Err(RelayError::Upstream {
                            message: e.to_string(),
                        });
                    }
                    None => {
                        log::info!("camera[{}]: ingest ended", self.key);
                        return Ok(());
                    }
                },
                _ = closed.recv() => return Ok(()),
            }
        }
    }

    /// Caches and fans out one ingest chunk. A chunk whose first byte
    /// has bit 0x10 set is taken as the start of a keyframe and resets
    /// the GOP.
    ///
    /// Cache update and broadcast happen under the GOP lock, pairing
    /// with `join`: a joiner either sees this chunk in its GOP snapshot
    /// or receives it live, never both and never neither. Delivery is
    /// still non-blocking per subscriber.
    pub fn push_chunk(&self, data: Bytes) {
        let mut gop = self.gop.lock().unwrap();
        let is_keyframe = data.first().map(|b| b & 0x10 != 0).unwrap_or(false);
        if is_keyframe {
            gop.clear();
        }
        if gop.len() == self.gop_max {
            gop.pop_front();
        }
        gop.push_back(data.clone());
        self.subscribers.broadcast(&data);
    }

    async fn supervise(self: Arc<Self>, mut client_closed_rx: ClientClosedRx) {
        let mut closed = self.closed_tx.subscribe();
        loop {
            tokio::select! {
                maybe_id = client_closed_rx.recv() => match maybe_id {
                    Some(id) => {
                        if self.subscribers.remove(&id) {
                            log::info!("camera[{}]: client {} left", self.key, id);
                        }
                    }
                    None => break,
                },
                _ = closed.recv() => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn gop_snapshot(&self) -> Vec<Bytes> {
        self.gop.lock().unwrap().iter().cloned().collect()
    }
}
