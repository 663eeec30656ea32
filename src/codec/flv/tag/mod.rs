pub mod audio;
pub mod video;

use {
    super::{amf0::ScriptData, get_u24_be, put_u24_be, TAG_HEADER_SIZE},
    bytes::{Bytes, BytesMut},
    std::convert::TryFrom,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagType {
    Audio,
    Video,
    Script,
    Other(u8),
}

impl From<u8> for TagType {
    fn from(val: u8) -> Self {
        match val {
            8 => Self::Audio,
            9 => Self::Video,
            18 => Self::Script,
            x => Self::Other(x),
        }
    }
}

impl TagType {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Audio => 8,
            Self::Video => 9,
            Self::Script => 18,
            Self::Other(x) => *x,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TagDetail {
    Video(video::VideoTagHeader),
    Audio(audio::AudioTagHeader),
    Script(ScriptData),
    Opaque,
}

/// One FLV tag: the 11-byte header fields plus the raw payload, with
/// type-specific details decoded from the payload's first bytes.
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: TagType,
    pub timestamp: u32,
    pub payload: Bytes,
    pub detail: TagDetail,
}

impl FlvTag {
    pub fn new(tag_type: TagType, timestamp: u32, payload: Bytes) -> Self {
        let detail = match tag_type {
            TagType::Video => video::VideoTagHeader::try_from(payload.as_ref())
                .map(TagDetail::Video)
                .unwrap_or(TagDetail::Opaque),
            TagType::Audio => audio::AudioTagHeader::try_from(payload.as_ref())
                .map(TagDetail::Audio)
                .unwrap_or(TagDetail::Opaque),
            TagType::Script => TagDetail::Script(ScriptData::parse(&payload)),
            TagType::Other(_) => TagDetail::Opaque,
        };
        Self {
            tag_type,
            timestamp,
            payload,
            detail,
        }
    }

    /// Splits the 11-byte tag header into (type, data size, timestamp).
    pub fn parse_header(head: &[u8; TAG_HEADER_SIZE]) -> (TagType, u32, u32) {
        let tag_type = TagType::from(head[0]);
        let data_size = get_u24_be(&head[1..4]);
        let timestamp = get_u24_be(&head[4..7]) | (head[7] as u32) << 24;
        (tag_type, data_size, timestamp)
    }

    pub fn data_size(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(&self.detail, TagDetail::Video(v) if v.is_keyframe())
    }

    pub fn is_video_config(&self) -> bool {
        matches!(&self.detail, TagDetail::Video(v) if v.is_sequence_header())
    }

    pub fn is_audio_config(&self) -> bool {
        matches!(&self.detail, TagDetail::Audio(a) if a.is_sequence_header())
    }

    pub fn metadata(&self) -> Option<&ScriptData> {
        match &self.detail {
            TagDetail::Script(s) => Some(s),
            _ => None,
        }
    }

    /// Serializes header, payload and the trailing PreviousTagSize.
    pub fn write_to(&self, buf: &mut BytesMut) {
        let mut head = [0u8; TAG_HEADER_SIZE];
        head[0] = self.tag_type.as_u8();
        put_u24_be(&mut head[1..4], self.data_size());
        put_u24_be(&mut head[4..7], self.timestamp & 0x00FF_FFFF);
        head[7] = (self.timestamp >> 24) as u8;
        // stream id stays zero
        buf.extend_from_slice(&head);
        buf.extend_from_slice(&self.payload);
        let prev = TAG_HEADER_SIZE as u32 + self.data_size();
        buf.extend_from_slice(&prev.to_be_bytes());
    }
}
