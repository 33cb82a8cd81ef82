use crate::{Result, TsError};

/// Read a 33-bit PTS/DTS from its 5-byte marker-interleaved encoding.
fn read_timestamp(data: &[u8]) -> u64 {
    ((u64::from(data[0]) >> 1) & 0x07) << 30
        | u64::from(data[1]) << 22
        | ((u64::from(data[2]) >> 1) & 0x7F) << 15
        | u64::from(data[3]) << 7
        | (u64::from(data[4]) >> 1) & 0x7F
}

/// Stream ids that carry no optional PES header (ISO 13818-1 table 2-18).
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF
    )
}

/// Parsed PES header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// Declared packet length; 0 means unbounded (typical for video).
    pub packet_length: u16,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Offset of the elementary stream data from the start of the PES packet.
    pub payload_offset: usize,
}

impl PesHeader {
    /// Parse a PES header from a buffer beginning with the `00 00 01` start code.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(TsError::InsufficientData {
                expected: 6,
                actual: data.len(),
            });
        }
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(TsError::InvalidPesStartCode);
        }

        let stream_id = data[3];
        let packet_length = u16::from_be_bytes([data[4], data[5]]);

        if !has_optional_header(stream_id) {
            return Ok(Self {
                stream_id,
                packet_length,
                pts: None,
                dts: None,
                payload_offset: 6,
            });
        }

        if data.len() < 9 {
            return Err(TsError::InsufficientData {
                expected: 9,
                actual: data.len(),
            });
        }

        let flags = (data[7] >> 6) & 0x03;
        let payload_offset = 9 + data[8] as usize;
        let needed = match flags {
            0b00 => 9,
            0b10 => 14,
            0b11 => 19,
            other => return Err(TsError::InvalidPtsDtsFlags(other)),
        };
        if data.len() < needed.max(payload_offset) {
            return Err(TsError::InsufficientData {
                expected: needed.max(payload_offset),
                actual: data.len(),
            });
        }

        let pts = (flags & 0b10 != 0).then(|| read_timestamp(&data[9..14]));
        let dts = (flags == 0b11).then(|| read_timestamp(&data[14..19]));

        Ok(Self {
            stream_id,
            packet_length,
            pts,
            dts,
            payload_offset,
        })
    }

    /// Total PES size implied by `packet_length`, if bounded.
    pub fn total_len(&self) -> Option<usize> {
        (self.packet_length > 0).then(|| 6 + self.packet_length as usize)
    }
}

/// Encode a 33-bit timestamp with the given 4-bit prefix (`0b0010` PTS only,
/// `0b0011` PTS of a PTS+DTS pair, `0b0001` DTS).
pub fn write_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 1,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 1,
        (ts >> 7) as u8,
        ((ts as u8 & 0x7F) << 1) | 1,
    ]
}
