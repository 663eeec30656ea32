use {
    super::{
        error::FlvError,
        tag::{video::Codec, FlvTag, TagDetail, TagType},
        FlvHeader, HEADER_SIZE, PREV_TAG_SIZE_LEN, TAG_HEADER_SIZE,
    },
    crate::codec::hevc,
    bytes::{Bytes, BytesMut},
    std::{collections::VecDeque, sync::Mutex, time::Duration},
    tokio::io::{AsyncRead, AsyncReadExt},
};

/// Upper bound on the initial-tag scan.
pub const MAX_INITIAL_TAGS: usize = 20;
/// After this many tags, a single-track stream may settle early.
const SINGLE_TRACK_WINDOW: usize = 10;

const DEFAULT_TAG_RING: usize = 16;

/// Scans the head of an FLV byte stream for the tags a late-joining
/// viewer needs to start decoding, and reserializes them as a prelude.
pub struct FlvParser {
    header: Option<FlvHeader>,
    initial_prev_tag_size: u32,
    required: Vec<FlvTag>,
    ring: TagRing,
}

impl Default for FlvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FlvParser {
    pub fn new() -> Self {
        Self {
            header: None,
            initial_prev_tag_size: 0,
            required: Vec::new(),
            ring: TagRing::new(DEFAULT_TAG_RING),
        }
    }

    pub fn header(&self) -> Option<&FlvHeader> {
        self.header.as_ref()
    }

    pub fn required_tags(&self) -> &[FlvTag] {
        &self.required
    }

    pub fn ring(&self) -> &TagRing {
        &self.ring
    }

    /// Reads the stream header and scans up to [`MAX_INITIAL_TAGS`] tags,
    /// stopping early once every required tag has been seen. The whole
    /// scan is bounded by `deadline`.
    pub async fn parse_initial_tags<R>(
        &mut self,
        reader: &mut R,
        deadline: Duration,
    ) -> Result<(), FlvError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(deadline, self.scan_initial(reader)).await {
            Ok(result) => result,
            Err(_) => Err(FlvError::ScanTimeout),
        }
    }

    async fn scan_initial<R>(&mut self, reader: &mut R) -> Result<(), FlvError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; HEADER_SIZE];
        reader.read_exact(&mut head).await?;
        let header = FlvHeader::parse(&head)?;

        let mut prev = [0u8; PREV_TAG_SIZE_LEN];
        reader.read_exact(&mut prev).await?;
        self.initial_prev_tag_size = u32::from_be_bytes(prev);
        self.header = Some(header);

        let mut tags = Vec::new();
        let mut found_video_config = false;
        let mut found_audio_config = false;
        let mut found_keyframe = false;
        let mut found_audio_frame = false;

        while tags.len() < MAX_INITIAL_TAGS {
            let tag = match Self::read_tag(reader).await? {
                Some(tag) => tag,
                None => break,
            };

            match tag.tag_type {
                TagType::Video => {
                    if tag.is_video_config() {
                        found_video_config = true;
                    } else if tag.is_keyframe() {
                        found_keyframe = true;
                    }
                }
                TagType::Audio => {
                    if tag.is_audio_config() {
                        found_audio_config = true;
                    } else if tag.timestamp > 0 {
                        found_audio_frame = true;
                    }
                }
                _ => {}
            }
            tags.push(tag);

            if found_video_config && found_audio_config && found_keyframe && found_audio_frame {
                break;
            }
            if tags.len() >= SINGLE_TRACK_WINDOW {
                if header.has_video() && !header.has_audio() && found_video_config && found_keyframe
                {
                    break;
                }
                if !header.has_video() && header.has_audio() && found_audio_config
                    && found_audio_frame
                {
                    break;
                }
            }
        }

        self.required = Self::extract_required(&header, tags);
        Ok(())
    }

    /// Reads one complete tag. `Ok(None)` means the stream ended cleanly
    /// at a tag boundary; EOF inside a tag is an error.
    pub async fn read_tag<R>(reader: &mut R) -> Result<Option<FlvTag>, FlvError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; TAG_HEADER_SIZE];
        if !read_exact_or_eof(reader, &mut head).await? {
            return Ok(None);
        }
        let (tag_type, data_size, timestamp) = FlvTag::parse_header(&head);

        let mut payload = vec![0u8; data_size as usize];
        reader
            .read_exact(&mut payload)
            .await
            .map_err(|_| FlvError::NotEnoughData("tag payload"))?;

        let mut prev = [0u8; PREV_TAG_SIZE_LEN];
        reader
            .read_exact(&mut prev)
            .await
            .map_err(|_| FlvError::NotEnoughData("previous tag size"))?;

        Ok(Some(FlvTag::new(tag_type, timestamp, Bytes::from(payload))))
    }

    /// Reads one tag and records it in the diagnostics ring.
    pub async fn parse_next_tag<R>(&self, reader: &mut R) -> Result<Option<FlvTag>, FlvError>
    where
        R: AsyncRead + Unpin,
    {
        let tag = Self::read_tag(reader).await?;
        if let Some(ref tag) = tag {
            self.ring.push(tag.clone());
        }
        Ok(tag)
    }

    /// Keeps, in stream order with timestamps normalized to zero: the
    /// first script tag, the video config (when the stream has video),
    /// the audio config (when it has audio), plus the first keyframe for
    /// video-only streams and the first plain audio frame for audio-only
    /// streams.
    fn extract_required(header: &FlvHeader, tags: Vec<FlvTag>) -> Vec<FlvTag> {
        let want_keyframe = header.has_video() && !header.has_audio();
        let want_audio_frame = header.has_audio() && !header.has_video();

        let mut required = Vec::new();
        let mut has_script = false;
        let mut has_video_config = false;
        let mut has_audio_config = false;
        let mut has_keyframe = false;
        let mut has_audio_frame = false;

        for tag in tags {
            let keep = match tag.tag_type {
                TagType::Script if !has_script => {
                    has_script = true;
                    true
                }
                TagType::Video if tag.is_video_config() && !has_video_config => {
                    has_video_config = true;
                    true
                }
                TagType::Video
                    if want_keyframe && tag.is_keyframe() && !tag.is_video_config()
                        && !has_keyframe =>
                {
                    has_keyframe = true;
                    true
                }
                TagType::Audio if tag.is_audio_config() && !has_audio_config => {
                    has_audio_config = true;
                    true
                }
                TagType::Audio
                    if want_audio_frame && !tag.is_audio_config() && !has_audio_frame =>
                {
                    has_audio_frame = true;
                    true
                }
                _ => false,
            };

            if keep {
                required.push(Self::normalize(tag));
            }

            let done = (!header.has_video() || has_video_config)
                && (!header.has_audio() || has_audio_config)
                && (!want_keyframe || has_keyframe)
                && (!want_audio_frame || has_audio_frame)
                && has_script;
            if done {
                break;
            }
        }
        required
    }

    fn normalize(tag: FlvTag) -> FlvTag {
        let is_hevc_config = matches!(
            &tag.detail,
            TagDetail::Video(v) if v.codec == Codec::H265 && v.is_sequence_header()
        );
        let payload = if is_hevc_config {
            hevc::normalize_config(&tag.payload).unwrap_or(tag.payload)
        } else {
            tag.payload
        };
        FlvTag::new(tag.tag_type, 0, payload)
    }

    /// Serializes header, initial PreviousTagSize and the required tags
    /// into the prelude blob handed to late joiners.
    pub fn prelude_bytes(&self) -> Result<Bytes, FlvError> {
        let header = self
            .header
            .ok_or(FlvError::NotEnoughData("stream header not parsed"))?;

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&header.as_bytes());
        buf.extend_from_slice(&self.initial_prev_tag_size.to_be_bytes());
        for tag in &self.required {
            tag.write_to(&mut buf);
        }
        Ok(buf.freeze())
    }
}

/// Fixed-capacity buffer of the most recent tags, for diagnostics.
/// Write-serialized under a mutex; not on the subscriber hot path.
pub struct TagRing {
    cap: usize,
    inner: Mutex<VecDeque<FlvTag>>,
}

impl TagRing {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, tag: FlvTag) {
        let mut ring = self.inner.lock().unwrap();
        if ring.len() == self.cap {
            ring.pop_front();
        }
        ring.push_back(tag);
    }

    pub fn snapshot(&self) -> Vec<FlvTag> {
        self.inner.lock().unwrap().iter().cloned().collect()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for tag in self.inner.lock().unwrap().iter() {
            tag.write_to(&mut buf);
        }
        buf.freeze()
    }
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool, FlvError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(FlvError::NotEnoughData("tag header"));
        }
        filled += n;
    }
    Ok(true)
}
