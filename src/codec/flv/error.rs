use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlvError {
    #[error("Invalid FLV signature")]
    InvalidSignature,

    #[error("Not enough data: {0}")]
    NotEnoughData(&'static str),

    #[error("Unknown frame type {0}")]
    UnknownFrameType(u8),

    #[error("Unknown AVC packet type {0}")]
    UnknownPacketType(u8),

    #[error("Unsupported video codec {0}")]
    UnsupportedVideoCodec(u8),

    #[error("Unknown sound format {0}")]
    UnknownSoundFormat(u8),

    #[error("Initial tag scan timed out")]
    ScanTimeout,

    #[error("Stream ended unexpectedly: {0}")]
    Disconnected(#[from] io::Error),
}
