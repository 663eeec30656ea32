use {
    crate::codec::flv::error::FlvError,
    std::convert::TryFrom,
    std::fmt::{self, Debug},
};

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum SoundFormat {
    Mp3,
    Ac3,
    Aac,
    Ec3,
    Opus,
    Other(u8),
}

impl From<u8> for SoundFormat {
    fn from(val: u8) -> Self {
        match val {
            2 => Self::Mp3,
            6 => Self::Ac3,
            10 => Self::Aac,
            11 => Self::Ec3,
            13 => Self::Opus,
            x => Self::Other(x),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum AacPacketType {
    SequenceHeader,
    Raw,
}

// Field        | Type
// ------------ | ---
// Sound Format | u4
// Sample Rate  | u2 (5.5k/11k/22k/44.1k)
// Sample Size  | u1 (8/16 bit)
// Channels     | u1 (mono/stereo)
// Packet Type  | u8 (AAC only)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AudioTagHeader {
    pub format: SoundFormat,
    pub sample_rate: u32,
    pub sample_size: u8,
    pub channels: u8,
    pub packet_type: Option<AacPacketType>,
}

impl AudioTagHeader {
    /// AAC sequence header (AudioSpecificConfig).
    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == Some(AacPacketType::SequenceHeader)
    }
}

impl Debug for AudioTagHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Audio")
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("packet_type", &self.packet_type)
            .finish()
    }
}

impl TryFrom<&[u8]> for AudioTagHeader {
    type Error = FlvError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.is_empty() {
            return Err(FlvError::NotEnoughData("FLV audio tag header"));
        }

        let format = SoundFormat::from(bytes[0] >> 4);
        let sample_rate = match (bytes[0] >> 2) & 0x03 {
            0 => 5500,
            1 => 11025,
            2 => 22050,
            _ => 44100,
        };
        let sample_size = (((bytes[0] >> 1) & 0x01) + 1) * 8;
        let channels = (bytes[0] & 0x01) + 1;

        let packet_type = if format == SoundFormat::Aac {
            if bytes.len() < 2 {
                return Err(FlvError::NotEnoughData("AAC packet type"));
            }
            Some(if bytes[1] == 0 {
                AacPacketType::SequenceHeader
            } else {
                AacPacketType::Raw
            })
        } else {
            None
        };

        Ok(Self {
            format,
            sample_rate,
            sample_size,
            channels,
            packet_type,
        })
    }
}
