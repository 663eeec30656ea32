use {
    super::{SubscriberTable, PULL_CHUNK_SIZE},
    crate::codec::flv::FlvParser,
    crate::transport::{
        signal_channels, BroadcasterClosedRx, BroadcasterClosedTx, BroadcasterHandle,
        ClientClosedRx, ClientClosedTx, CloseKind,
    },
    bytes::Bytes,
    futures_util::TryStreamExt,
    std::{
        io,
        sync::{Arc, RwLock},
        time::Duration,
    },
    tokio::io::AsyncReadExt,
    tokio::sync::mpsc,
    tokio_util::io::StreamReader,
};

/// Per-subscriber queue depth for HTTP-FLV viewers.
pub const QUEUE_CAPACITY: usize = 4096;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const RECONNECT_PAUSE: Duration = Duration::from_millis(500);
const SEAL_DEADLINE: Duration = Duration::from_secs(10);

const USER_AGENT: &str = "xrelay-flv/0.1";

/// One HTTP-FLV channel: a long-lived upstream pull loop feeding every
/// registered viewer queue, plus the prelude a late joiner needs.
pub struct FlvBroadcaster {
    key: String,
    upstream_url: String,
    prelude: RwLock<Option<Bytes>>,
    subscribers: SubscriberTable,
    closed_tx: BroadcasterClosedTx,
    client_closed_tx: ClientClosedTx,
}

impl FlvBroadcaster {
    pub fn spawn(key: &str, upstream_url: &str) -> Arc<Self> {
        let (client_closed_tx, client_closed_rx, closed_tx) = signal_channels();
        let broadcaster = Arc::new(Self {
            key: key.to_owned(),
            upstream_url: upstream_url.to_owned(),
            prelude: RwLock::new(None),
            subscribers: SubscriberTable::new(),
            closed_tx,
            client_closed_tx,
        });

        tokio::spawn(broadcaster.clone().pull_loop());
        tokio::spawn(broadcaster.clone().supervise(client_closed_rx));
        broadcaster
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handle(&self) -> BroadcasterHandle {
        BroadcasterHandle::new(self.client_closed_tx.clone(), self.closed_tx.clone())
    }

    pub fn shutdown(&self) {
        let _ = self.closed_tx.send(CloseKind::Shutdown);
    }

    pub fn prelude_sealed(&self) -> bool {
        self.prelude.read().unwrap().is_some()
    }

    /// Registers a viewer queue. If the prelude is sealed it is enqueued
    /// first, under the table lock, so no live packet can precede it.
    pub fn join(&self, client_id: &str, tx: mpsc::Sender<Bytes>) {
        let prelude = self.prelude.read().unwrap().clone();
        match prelude {
            Some(prelude) => self.subscribers.join(client_id, tx, &[prelude]),
            None => self.subscribers.join(client_id, tx, &[]),
        }
        log::info!(
            "flv[{}]: client {} joined ({} watching)",
            self.key,
            client_id,
            self.subscribers.len()
        );
    }

    async fn supervise(self: Arc<Self>, mut client_closed_rx: ClientClosedRx) {
        let mut closed = self.closed_tx.subscribe();
        loop {
            tokio::select! {
                maybe_id = client_closed_rx.recv() => match maybe_id {
                    Some(id) => {
                        if self.subscribers.remove(&id) {
                            log::info!("flv[{}]: client {} left", self.key, id);
                        }
                    }
                    None => break,
                },
                _ = closed.recv() => break,
            }
        }
    }

    async fn pull_loop(self: Arc<Self>) {
        let client = match reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                log::error!("flv[{}]: http client build failed: {}", self.key, e);
                return;
            }
        };

        let mut closed = self.closed_tx.subscribe();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            log::info!("flv[{}]: dial upstream {}", self.key, self.upstream_url);
            let response = tokio::select! {
                r = client.get(&self.upstream_url).send() => r,
                _ = closed.recv() => return,
            };

            let response = match response {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    log::warn!("flv[{}]: upstream bad status {}", self.key, resp.status());
                    if self.sleep_or_closed(backoff, &mut closed).await {
                        return;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
                Err(e) => {
                    log::warn!("flv[{}]: dial failed: {}", self.key, e);
                    if self.sleep_or_closed(backoff, &mut closed).await {
                        return;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            backoff = INITIAL_BACKOFF;

            let stream = response
                .bytes_stream()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
            let mut reader = StreamReader::new(stream);

            if !self.prelude_sealed() {
                let mut parser = FlvParser::new();
                match parser.parse_initial_tags(&mut reader, SEAL_DEADLINE).await {
                    Ok(()) => match parser.prelude_bytes() {
                        Ok(prelude) => {
                            log::info!(
                                "flv[{}]: prelude sealed, {} tags, {} bytes",
                                self.key,
                                parser.required_tags().len(),
                                prelude.len()
                            );
                            *self.prelude.write().unwrap() = Some(prelude);
                        }
                        Err(e) => {
                            log::warn!("flv[{}]: prelude serialization failed: {}", self.key, e);
                            if self.sleep_or_closed(RECONNECT_PAUSE, &mut closed).await {
                                return;
                            }
                            continue;
                        }
                    },
                    Err(e) => {
                        log::warn!("flv[{}]: initial tag scan failed: {}", self.key, e);
                        if self.sleep_or_closed(RECONNECT_PAUSE, &mut closed).await {
                            return;
                        }
                        continue;
                    }
                }
            }

            let mut buf = [0u8; PULL_CHUNK_SIZE];
            loop {
                tokio::select! {
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            log::info!("flv[{}]: upstream EOF, reconnecting", self.key);
                            break;
                        }
                        Ok(n) => {
                            self.subscribers.broadcast(&Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(e) => {
                            log::warn!("flv[{}]: upstream read error: {}", self.key, e);
                            break;
                        }
                    },
                    _ = closed.recv() => return,
                }
            }

            if self.sleep_or_closed(RECONNECT_PAUSE, &mut closed).await {
                return;
            }
        }
    }

    /// Returns true when the broadcaster closed during the pause.
    async fn sleep_or_closed(&self, dur: Duration, closed: &mut BroadcasterClosedRx) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => false,
            _ = closed.recv() => true,
        }
    }

    #[cfg(test)]
    pub(crate) fn seal_prelude_for_test(&self, prelude: Bytes) {
        *self.prelude.write().unwrap() = Some(prelude);
    }
}
