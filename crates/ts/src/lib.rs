//! MPEG-2 transport stream demultiplexer.
//!
//! Splits a byte stream of 188-byte TS packets into elementary stream
//! packets (PES payloads with their timestamps), following the PAT and the
//! first program's PMT.

pub mod demux;
pub mod error;
pub mod packet;
pub mod pes;
pub mod psi;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use demux::{Demuxer, ElementaryPacket};
pub use error::TsError;
pub use packet::{PACKET_SIZE, PID_NULL, PID_PAT, SYNC_BYTE, TsPacket};
pub use pes::PesHeader;
pub use psi::{Pat, PatProgram, Pmt, PmtStream, StreamType, mpeg2_crc32};

/// Result type for TS parsing operations
pub type Result<T> = std::result::Result<T, TsError>;
