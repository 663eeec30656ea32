use {
    crate::errors::{RelayError, Result},
    crate::transport::{
        signal_channels, BroadcasterClosedTx, ClientClosedRx, ClientClosedTx, BroadcasterHandle,
        ClientId, CloseKind,
    },
    bytes::Bytes,
    hls_m3u8::{tags::VariantStream, MasterPlaylist, MediaPlaylist},
    std::{
        collections::HashSet,
        convert::TryFrom,
        path::Path,
        sync::{Arc, Mutex, RwLock},
        time::{Duration, Instant},
    },
    url::Url,
};

/// Sliding-window capacity, in segments.
pub const DEFAULT_RING_CAPACITY: usize = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(800);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "xrelay-hls/0.1";

/// One cached media segment, held fully in memory under its local name.
#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: u64,
    pub uri: String,
    pub local_name: String,
    pub data: Bytes,
    pub duration: f64,
    pub discontinuity: bool,
    pub added_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub segments: Vec<Segment>,
    pub seq_start: u64,
    pub target_duration: f64,
    pub discontinuity: bool,
}

/// Per-channel sliding-window cache: a fixed ring of the most recent
/// segments plus the metadata the playlist synthesizer needs.
pub struct StreamState {
    inner: RwLock<StateInner>,
}

struct StateInner {
    ring: Vec<Option<Segment>>,
    next_slot: usize,
    pushed: u64,
    target_duration: f64,
    seq_start: u64,
    last_seq: u64,
    discontinuity: bool,
    last_update: Option<Instant>,
}

impl StreamState {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: RwLock::new(StateInner {
                ring: vec![None; cap],
                next_slot: 0,
                pushed: 0,
                target_duration: 6.0,
                seq_start: 0,
                last_seq: 0,
                discontinuity: false,
                last_update: None,
            }),
        }
    }

    pub fn push_segment(&self, seg: Segment) {
        let seq = seg.seq;
        let discont = seg.discontinuity;

        let mut s = self.inner.write().unwrap();
        let cap = s.ring.len();
        if s.pushed == 0 {
            s.seq_start = seq;
        }
        let slot = s.next_slot;
        s.ring[slot] = Some(seg);
        s.next_slot = (slot + 1) % cap;
        s.pushed += 1;
        s.last_seq = seq;
        if s.pushed >= cap as u64 {
            s.seq_start = (seq + 1).saturating_sub(cap as u64);
        }
        if discont {
            s.discontinuity = true;
        }
        s.last_update = Some(Instant::now());
    }

    pub fn set_target_duration(&self, dur: f64) {
        if dur > 0.0 {
            self.inner.write().unwrap().target_duration = dur;
        }
    }

    /// Ordered (oldest first) copy of the current window.
    pub fn snapshot(&self) -> Snapshot {
        let s = self.inner.read().unwrap();
        let cap = s.ring.len();
        let segments = (0..cap)
            .filter_map(|i| s.ring[(s.next_slot + i) % cap].clone())
            .filter(|seg| !seg.data.is_empty())
            .collect();
        Snapshot {
            segments,
            seq_start: s.seq_start,
            target_duration: s.target_duration,
            discontinuity: s.discontinuity,
        }
    }

    pub fn find_segment(&self, local_name: &str) -> Option<Segment> {
        let s = self.inner.read().unwrap();
        s.ring
            .iter()
            .flatten()
            .find(|seg| seg.local_name == local_name)
            .cloned()
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.inner.read().unwrap().last_update
    }
}

/// Renders the local sliding-window playlist for one viewer. Segment
/// URIs point back at this relay, keyed by channel and client.
pub fn build_media_playlist(key: &str, client_id: &str, snap: &Snapshot) -> String {
    if snap.segments.is_empty() {
        return "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n"
            .to_string();
    }

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    out.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        (snap.target_duration + 0.5) as u64
    ));
    out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", snap.seq_start));
    if snap.discontinuity {
        out.push_str("#EXT-X-DISCONTINUITY-SEQUENCE:1\n");
    }

    let base = format!("/api/live/hls/{}/{}/", key, client_id);
    for seg in &snap.segments {
        if seg.discontinuity {
            out.push_str("#EXT-X-DISCONTINUITY\n");
        }
        out.push_str(&format!("#EXTINF:{:.3},\n", seg.duration));
        out.push_str(&base);
        out.push_str(&seg.local_name);
        out.push('\n');
    }
    out
}

/// Local segment names are `<seq><ext>` with the upstream extension
/// preserved, so players request them in order.
pub(crate) fn local_seg_name(abs_uri: &str, seq: u64) -> String {
    let ext = Url::parse(abs_uri)
        .ok()
        .and_then(|u| {
            Path::new(u.path())
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
        })
        .filter(|e| !e.is_empty());
    match ext {
        Some(ext) => format!("{}.{}", seq, ext),
        None => format!("{}.bin", seq),
    }
}

pub(crate) fn resolve_url(base: &str, reference: &str) -> Result<String> {
    Ok(Url::parse(base)?.join(reference)?.to_string())
}

struct VariantPick {
    uri: String,
    bandwidth: u64,
    label: String,
}

/// Label match first (joined codecs/resolution/bandwidth, lowercased),
/// otherwise the variant with the highest bandwidth.
fn pick_variant(master: &MasterPlaylist<'_>, prefer: &str) -> Result<VariantPick> {
    let mut candidates = Vec::new();
    for vs in &master.variant_streams {
        let (uri, stream_data) = match vs {
            VariantStream::ExtXStreamInf {
                uri, stream_data, ..
            } => (uri, stream_data),
            VariantStream::ExtXIFrame { uri, stream_data } => (uri, stream_data),
        };
        let mut label = Vec::new();
        if let Some(codecs) = stream_data.codecs() {
            label.push(codecs.to_string());
        }
        if let Some(res) = stream_data.resolution() {
            label.push(format!("{}x{}", res.width(), res.height()));
        }
        label.push(stream_data.bandwidth().to_string());
        candidates.push(VariantPick {
            uri: uri.to_string(),
            bandwidth: stream_data.bandwidth(),
            label: label.join(",").to_lowercase(),
        });
    }

    if candidates.is_empty() {
        return Err(RelayError::Playlist {
            message: "no variants in master playlist".to_string(),
        });
    }

    if !prefer.is_empty() {
        let prefer = prefer.to_lowercase();
        if let Some(idx) = candidates.iter().position(|c| c.label.contains(&prefer)) {
            return Ok(candidates.swap_remove(idx));
        }
    }

    candidates
        .into_iter()
        .max_by_key(|c| c.bandwidth)
        .ok_or_else(|| RelayError::Playlist {
            message: "no variants in master playlist".to_string(),
        })
}

struct MediaEntry {
    abs_uri: String,
    duration: f64,
    discontinuity: bool,
}

struct MediaSnapshot {
    target_duration: f64,
    media_sequence: u64,
    entries: Vec<MediaEntry>,
}

fn parse_media_snapshot(text: &str, base_url: &str) -> Result<MediaSnapshot> {
    let media = MediaPlaylist::try_from(text).map_err(|e| RelayError::Playlist {
        message: e.to_string(),
    })?;

    let mut entries = Vec::new();
    for (_, seg) in media.segments.iter() {
        let abs_uri = match resolve_url(base_url, seg.uri()) {
            Ok(u) => u,
            Err(_) => continue,
        };
        entries.push(MediaEntry {
            abs_uri,
            duration: seg.duration.duration().as_secs_f64(),
            discontinuity: seg.has_discontinuity,
        });
    }

    Ok(MediaSnapshot {
        target_duration: media.target_duration.as_secs_f64(),
        media_sequence: media.media_sequence as u64,
        entries,
    })
}

fn is_master_playlist(text: &str) -> bool {
    text.contains("#EXT-X-STREAM-INF")
}

/// One HLS channel: polls the pinned media playlist, downloads fresh
/// segments into the ring and serves viewers a rewritten local window.
pub struct HlsBroadcaster {
    key: String,
    upstream_url: String,
    variant: String,
    state: StreamState,
    clients: Mutex<HashSet<ClientId>>,
    closed_tx: BroadcasterClosedTx,
    client_closed_tx: ClientClosedTx,
}

impl HlsBroadcaster {
    pub fn spawn(key: &str, upstream_url: &str, variant: &str, buffer: usize) -> Arc<Self> {
        let buffer = if buffer == 0 {
            DEFAULT_RING_CAPACITY
        } else {
            buffer
        };
        let (client_closed_tx, client_closed_rx, closed_tx) = signal_channels();
        let broadcaster = Arc::new(Self {
            key: key.to_owned(),
            upstream_url: upstream_url.to_owned(),
            variant: variant.to_owned(),
            state: StreamState::new(buffer),
            clients: Mutex::new(HashSet::new()),
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

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn handle(&self) -> BroadcasterHandle {
        BroadcasterHandle::new(self.client_closed_tx.clone(), self.closed_tx.clone())
    }

    pub fn shutdown(&self) {
        let _ = self.closed_tx.send(CloseKind::Shutdown);
    }

    /// Registers a viewer on its first playlist request.
    pub fn register_client(&self, id: &str) -> bool {
        let inserted = self.clients.lock().unwrap().insert(id.to_owned());
        if inserted {
            log::info!("hls[{}]: client {} joined", self.key, id);
        }
        inserted
    }

    pub fn client_registered(&self, id: &str) -> bool {
        self.clients.lock().unwrap().contains(id)
    }

    async fn supervise(self: Arc<Self>, mut client_closed_rx: ClientClosedRx) {
        let mut closed = self.closed_tx.subscribe();
        loop {
            tokio::select! {
                maybe_id = client_closed_rx.recv() => match maybe_id {
                    Some(id) => {
                        if self.clients.lock().unwrap().remove(&id) {
                            log::info!("hls[{}]: client {} left", self.key, id);
                        }
                    }
                    None => break,
                },
                _ = closed.recv() => break,
            }
        }
    }

    async fn pull_loop(self: Arc<Self>) {
        log::info!("hls[{}]: start pulling {}", self.key, self.upstream_url);
        let client = match reqwest::Client::builder()
            .connect_timeout(DIAL_TIMEOUT)
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                log::error!("hls[{}]: http client build failed: {}", self.key, e);
                return;
            }
        };

        let mut closed = self.closed_tx.subscribe();

        // master/media decided once; the resolved URL is pinned after that
        let media_url = match self.discover_media_url(&client).await {
            Ok(url) => url,
            Err(e) => {
                log::error!("hls[{}]: playlist discovery failed: {}", self.key, e);
                return;
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut last_seq: u64 = 0;
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + POLL_INTERVAL,
            POLL_INTERVAL,
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = closed.recv() => {
                    log::info!("hls[{}]: stop", self.key);
                    return;
                }
            }

            let text = match self.fetch_text(&client, &media_url).await {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("hls[{}]: fetch media: {}", self.key, e);
                    continue;
                }
            };
            let snapshot = match parse_media_snapshot(&text, &media_url) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::warn!("hls[{}]: not a media playlist: {}", self.key, e);
                    continue;
                }
            };

            self.state.set_target_duration(snapshot.target_duration);

            for (idx, entry) in snapshot.entries.iter().enumerate() {
                if seen.contains(&entry.abs_uri) {
                    continue;
                }

                let seq = if snapshot.media_sequence != 0 {
                    snapshot.media_sequence + idx as u64
                } else {
                    last_seq + 1
                };

                let data = match self.download(&client, &entry.abs_uri).await {
                    Ok(data) => data,
                    Err(e) => {
                        log::warn!("hls[{}]: segment download: {}", self.key, e);
                        continue;
                    }
                };

                let local_name = local_seg_name(&entry.abs_uri, seq);
                log::debug!(
                    "hls[{}]: cached segment {} ({} bytes)",
                    self.key,
                    local_name,
                    data.len()
                );
                self.state.push_segment(Segment {
                    seq,
                    uri: entry.abs_uri.clone(),
                    local_name,
                    data,
                    duration: entry.duration,
                    discontinuity: entry.discontinuity,
                    added_at: Instant::now(),
                });

                seen.insert(entry.abs_uri.clone());
                last_seq = seq;
            }
        }
    }

    async fn discover_media_url(&self, client: &reqwest::Client) -> Result<String> {
        let text = self.fetch_text(client, &self.upstream_url).await?;
        if is_master_playlist(&text) {
            let master =
                MasterPlaylist::try_from(text.as_str()).map_err(|e| RelayError::Playlist {
                    message: e.to_string(),
                })?;
            let pick = pick_variant(&master, &self.variant)?;
            let resolved = resolve_url(&self.upstream_url, &pick.uri)?;
            log::info!(
                "hls[{}]: chose variant bw={} uri={}",
                self.key,
                pick.bandwidth,
                resolved
            );
            Ok(resolved)
        } else {
            MediaPlaylist::try_from(text.as_str()).map_err(|e| RelayError::Playlist {
                message: e.to_string(),
            })?;
            Ok(self.upstream_url.clone())
        }
    }

    async fn fetch_text(&self, client: &reqwest::Client, url: &str) -> Result<String> {
        let resp = client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(RelayError::UpstreamStatus {
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.text().await?)
    }

    async fn download(&self, client: &reqwest::Client, url: &str) -> Result<Bytes> {
        let resp = client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(RelayError::UpstreamStatus {
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.bytes().await?)
    }
}
