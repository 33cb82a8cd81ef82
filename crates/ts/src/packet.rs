use crate::{Result, TsError};

/// Size of a transport stream packet in bytes.
pub const PACKET_SIZE: usize = 188;

/// First byte of every transport stream packet.
pub const SYNC_BYTE: u8 = 0x47;

/// PAT PID (always 0x0000)
pub const PID_PAT: u16 = 0x0000;

/// NULL PID (always 0x1FFF)
pub const PID_NULL: u16 = 0x1FFF;

/// A transport stream packet borrowed from the input buffer.
///
/// Only the fields the demuxer acts on are decoded; the adaptation field is
/// reduced to its discontinuity and random access flags.
#[derive(Debug, Clone, Copy)]
pub struct TsPacket<'a> {
    pub pid: u16,
    pub payload_unit_start: bool,
    pub transport_error: bool,
    pub continuity_counter: u8,
    pub discontinuity: bool,
    pub random_access: bool,
    /// Payload bytes after the header and adaptation field (may be empty).
    pub payload: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// Parse a packet from exactly [`PACKET_SIZE`] bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() != PACKET_SIZE {
            return Err(TsError::InvalidPacketSize(data.len()));
        }
        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(data[0]));
        }

        let transport_error = data[1] & 0x80 != 0;
        let payload_unit_start = data[1] & 0x40 != 0;
        let pid = (u16::from(data[1] & 0x1F) << 8) | u16::from(data[2]);
        let adaptation_field_control = (data[3] >> 4) & 0x03;
        let continuity_counter = data[3] & 0x0F;

        let mut offset = 4;
        let mut discontinuity = false;
        let mut random_access = false;

        if adaptation_field_control & 0x02 != 0 {
            let length = data[offset] as usize;
            offset += 1;
            if offset + length > PACKET_SIZE {
                return Err(TsError::InsufficientData {
                    expected: offset + length,
                    actual: PACKET_SIZE,
                });
            }
            if length > 0 {
                let flags = data[offset];
                discontinuity = flags & 0x80 != 0;
                random_access = flags & 0x40 != 0;
            }
            offset += length;
        }

        let payload = if adaptation_field_control & 0x01 != 0 {
            &data[offset..]
        } else {
            &data[PACKET_SIZE..]
        };

        Ok(Self {
            pid,
            payload_unit_start,
            transport_error,
            continuity_counter,
            discontinuity,
            random_access,
            payload,
        })
    }

    /// Section bytes of a PSI packet that starts a new section (pointer field skipped).
    pub fn section_start(&self) -> Option<&'a [u8]> {
        if !self.payload_unit_start {
            return None;
        }
        let (&pointer, rest) = self.payload.split_first()?;
        rest.get(pointer as usize..)
    }
}
