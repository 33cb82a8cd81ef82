//! ADTS framing for AAC elementary streams.

use crate::error::TransmuxError;

/// PCM samples per AAC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Fixed and variable ADTS header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG-4 audio object type (ADTS profile + 1).
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// Whole frame length including the header.
    pub frame_length: usize,
    pub header_length: usize,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self, TransmuxError> {
        if data.len() < 7 {
            return Err(TransmuxError::InvalidAdts("header truncated"));
        }
        // 12-bit syncword followed by layer == 0
        if data[0] != 0xFF || data[1] & 0xF6 != 0xF0 {
            return Err(TransmuxError::InvalidAdts("missing syncword"));
        }
        let protection_absent = data[1] & 0x01 != 0;
        let object_type = ((data[2] >> 6) & 0x03) + 1;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        if usize::from(sampling_frequency_index) >= SAMPLE_RATES.len() {
            return Err(TransmuxError::InvalidAdts("reserved sampling frequency index"));
        }
        let channel_configuration = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let frame_length = (usize::from(data[3] & 0x03) << 11)
            | (usize::from(data[4]) << 3)
            | usize::from(data[5] >> 5);
        let header_length = if protection_absent { 7 } else { 9 };
        if frame_length < header_length {
            return Err(TransmuxError::InvalidAdts("frame shorter than its header"));
        }

        Ok(Self {
            object_type,
            sampling_frequency_index,
            channel_configuration,
            frame_length,
            header_length,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATES[usize::from(self.sampling_frequency_index)]
    }

    /// Two-byte `AudioSpecificConfig` for `esds`.
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let config = (u16::from(self.object_type) << 11)
            | (u16::from(self.sampling_frequency_index) << 7)
            | (u16::from(self.channel_configuration) << 3);
        config.to_be_bytes()
    }

    /// RFC 6381 codec string, e.g. `mp4a.40.2`.
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.object_type)
    }
}

/// A complete ADTS frame located in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsFrame {
    pub header: AdtsHeader,
    /// Byte range of the raw AAC payload (header stripped).
    pub payload: (usize, usize),
}

/// Locate complete ADTS frames in `data`. Returns the frames and the number
/// of bytes consumed; a trailing partial frame is left unconsumed. Bytes that
/// do not start a valid header are skipped.
pub fn scan_frames(data: &[u8]) -> (Vec<AdtsFrame>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset + 7 <= data.len() {
        let header = match AdtsHeader::parse(&data[offset..]) {
            Ok(header) => header,
            Err(_) => {
                offset += 1;
                continue;
            }
        };
        if offset + header.frame_length > data.len() {
            break;
        }
        frames.push(AdtsFrame {
            header,
            payload: (offset + header.header_length, offset + header.frame_length),
        });
        offset += header.frame_length;
    }
    (frames, offset.min(data.len()))
}

#[cfg(test)]
pub(crate) mod test_support {
    /// ADTS frame (no CRC) of AAC-LC with the given payload.
    pub fn adts_frame(sampling_frequency_index: u8, channels: u8, payload: &[u8]) -> Vec<u8> {
        let len = 7 + payload.len();
        let mut frame = vec![
            0xFF,
            0xF1,
            (1 << 6) | (sampling_frequency_index << 2) | (channels >> 2),
            ((channels & 0x03) << 6) | ((len >> 11) as u8 & 0x03),
            (len >> 3) as u8,
            (((len & 0x07) as u8) << 5) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }
}
