use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TsError {
    #[error("invalid packet size: {0} (expected 188)")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte: 0x{0:02x}")]
    InvalidSyncByte(u8),

    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("invalid PES start code")]
    InvalidPesStartCode,

    #[error("invalid PTS/DTS flags: {0:#04b}")]
    InvalidPtsDtsFlags(u8),

    #[error("unexpected table id 0x{actual:02x} (expected 0x{expected:02x})")]
    UnexpectedTableId { expected: u8, actual: u8 },

    #[error("section CRC mismatch: computed 0x{computed:08x}, stored 0x{stored:08x}")]
    CrcMismatch { computed: u32, stored: u32 },

    #[error("malformed section: {0}")]
    MalformedSection(&'static str),
}
