use {
    crate::codec::flv::error::FlvError,
    std::convert::TryFrom,
    std::fmt::{self, Debug},
};

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum FrameType {
    KeyFrame,
    InterFrame,
    DisposableInterFrame,
    GeneratedKeyframe,
    VideoInfoFrame,
}

impl TryFrom<u8> for FrameType {
    type Error = FlvError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Ok(match val {
            1 => Self::KeyFrame,
            2 => Self::InterFrame,
            3 => Self::DisposableInterFrame,
            4 => Self::GeneratedKeyframe,
            5 => Self::VideoInfoFrame,
            x => return Err(FlvError::UnknownFrameType(x)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Codec {
    H264,
    H265,
    Other(u8),
}

impl From<u8> for Codec {
    fn from(val: u8) -> Self {
        match val {
            7 => Self::H264,
            12 => Self::H265,
            x => Self::Other(x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AvcPacketType {
    SequenceHeader,
    NalUnit,
    EndOfSequence,
}

impl TryFrom<u8> for AvcPacketType {
    type Error = FlvError;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Ok(match val {
            0 => Self::SequenceHeader,
            1 => Self::NalUnit,
            2 => Self::EndOfSequence,
            x => return Err(FlvError::UnknownPacketType(x)),
        })
    }
}

// Field            | Type
// ---------------- | ---
// Frame Type       | u4
// Codec ID         | u4
// AVC Packet Type  | u8  (H.264/H.265 only)
// Composition Time | i24 (H.264/H.265 only)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    pub frame_type: FrameType,
    pub codec: Codec,
    pub packet_type: Option<AvcPacketType>,
}

impl VideoTagHeader {
    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::KeyFrame
    }

    /// AVC/HEVC sequence header (decoder configuration record).
    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == Some(AvcPacketType::SequenceHeader)
    }
}

impl Debug for VideoTagHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Video")
            .field("frame_type", &self.frame_type)
            .field("codec", &self.codec)
            .field("packet_type", &self.packet_type)
            .finish()
    }
}

impl TryFrom<&[u8]> for VideoTagHeader {
    type Error = FlvError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Err(FlvError::NotEnoughData("FLV video tag header"));
        }

        let frame_type = FrameType::try_from(bytes[0] >> 4)?;
        let codec = Codec::from(bytes[0] & 0x0F);

        let packet_type = match codec {
            Codec::H264 | Codec::H265 => {
                if bytes.len() < 2 {
                    return Err(FlvError::NotEnoughData("AVC packet type"));
                }
                Some(AvcPacketType::try_from(bytes[1])?)
            }
            Codec::Other(_) => None,
        };

        Ok(Self {
            frame_type,
            codec,
            packet_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframe_sequence_header() {
        let data = [0x17u8, 0x00, 0x00, 0x00, 0x00];
        let header = VideoTagHeader::try_from(&data[..]).unwrap();
        assert!(header.is_keyframe());
        assert!(header.is_sequence_header());
        assert_eq!(header.codec, Codec::H264);
    }

    #[test]
    fn hevc_nal_unit() {
        let data = [0x2Cu8, 0x01, 0x00, 0x00, 0x00];
        let header = VideoTagHeader::try_from(&data[..]).unwrap();
        assert!(!header.is_keyframe());
        assert!(!header.is_sequence_header());
        assert_eq!(header.codec, Codec::H265);
        assert_eq!(header.packet_type, Some(AvcPacketType::NalUnit));
    }

    #[test]
    fn other_codec_has_no_packet_type() {
        // VP6 keyframe, single header byte
        let data = [0x14u8];
        let header = VideoTagHeader::try_from(&data[..]).unwrap();
        assert_eq!(header.codec, Codec::Other(4));
        assert!(header.packet_type.is_none());
        assert!(header.is_keyframe());
        assert!(!header.is_sequence_header());
    }

    #[test]
    fn rejects_empty_payload() {
        assert!(matches!(
            VideoTagHeader::try_from(&[][..]),
            Err(FlvError::NotEnoughData(_))
        ));
    }
}
