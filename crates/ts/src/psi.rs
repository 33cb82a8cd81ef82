use crate::{Result, TsError};

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;

/// MPEG-2 CRC-32 (polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection).
///
/// Running it over a whole section including its stored CRC yields zero.
pub fn mpeg2_crc32(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFFu32, |mut crc, &byte| {
        crc ^= u32::from(byte) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
        crc
    })
}

/// Total byte length of the section starting at `data[0]`, if the header is present.
pub fn section_len(data: &[u8]) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    Some(3 + ((usize::from(data[1] & 0x0F) << 8) | usize::from(data[2])))
}

/// Validate the long-form section header and return `(version, body)` where
/// `body` excludes the 8-byte header and the trailing CRC.
fn section_body(data: &[u8], table_id: u8, check_crc: bool) -> Result<(u8, &[u8])> {
    if data.first() != Some(&table_id) {
        return Err(TsError::UnexpectedTableId {
            expected: table_id,
            actual: data.first().copied().unwrap_or(0xFF),
        });
    }
    let len = section_len(data).ok_or(TsError::InsufficientData {
        expected: 3,
        actual: data.len(),
    })?;
    if len < 12 {
        return Err(TsError::MalformedSection("section shorter than its header"));
    }
    if data.len() < len {
        return Err(TsError::InsufficientData {
            expected: len,
            actual: data.len(),
        });
    }
    let section = &data[..len];
    if check_crc && mpeg2_crc32(section) != 0 {
        let stored = u32::from_be_bytes([
            section[len - 4],
            section[len - 3],
            section[len - 2],
            section[len - 1],
        ]);
        return Err(TsError::CrcMismatch {
            computed: mpeg2_crc32(&section[..len - 4]),
            stored,
        });
    }
    let version = (section[5] >> 1) & 0x1F;
    Ok((version, &section[8..len - 4]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Program Association Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub version: u8,
    /// Programs with a non-zero program number (the network PID entry is dropped).
    pub programs: Vec<PatProgram>,
}

impl Pat {
    pub fn parse(section: &[u8], check_crc: bool) -> Result<Self> {
        let (version, body) = section_body(section, TABLE_ID_PAT, check_crc)?;
        let programs = body
            .chunks_exact(4)
            .map(|entry| PatProgram {
                program_number: u16::from_be_bytes([entry[0], entry[1]]),
                pmt_pid: (u16::from(entry[2] & 0x1F) << 8) | u16::from(entry[3]),
            })
            .filter(|p| p.program_number != 0)
            .collect();
        Ok(Self { version, programs })
    }
}

/// Elementary stream types relevant to HLS transport streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Mpeg1Audio,
    Mpeg2Audio,
    AdtsAac,
    H264,
    H265,
    Ac3,
    Id3Metadata,
    Other(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x03 => Self::Mpeg1Audio,
            0x04 => Self::Mpeg2Audio,
            0x0F => Self::AdtsAac,
            0x15 => Self::Id3Metadata,
            0x1B => Self::H264,
            0x24 => Self::H265,
            0x81 => Self::Ac3,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
}

/// Program Map Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub version: u8,
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    pub fn parse(section: &[u8], check_crc: bool) -> Result<Self> {
        let (version, body) = section_body(section, TABLE_ID_PMT, check_crc)?;
        if body.len() < 4 {
            return Err(TsError::MalformedSection("PMT body too short"));
        }
        let pcr_pid = (u16::from(body[0] & 0x1F) << 8) | u16::from(body[1]);
        let program_info_len = (usize::from(body[2] & 0x0F) << 8) | usize::from(body[3]);
        let mut rest = body
            .get(4 + program_info_len..)
            .ok_or(TsError::MalformedSection("program info overruns PMT"))?;

        let mut streams = Vec::new();
        while rest.len() >= 5 {
            let es_info_len = (usize::from(rest[3] & 0x0F) << 8) | usize::from(rest[4]);
            streams.push(PmtStream {
                stream_type: StreamType::from(rest[0]),
                elementary_pid: (u16::from(rest[1] & 0x1F) << 8) | u16::from(rest[2]),
            });
            rest = rest
                .get(5 + es_info_len..)
                .ok_or(TsError::MalformedSection("ES info overruns PMT"))?;
        }

        Ok(Self {
            version,
            pcr_pid,
            streams,
        })
    }
}

/// Build a complete PSI section (header, body and CRC). Used to synthesize
/// streams in tests and benchmarks.
pub fn build_section(table_id: u8, table_id_extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut section = Vec::with_capacity(3 + section_length);
    section.push(table_id);
    section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
    section.push(section_length as u8);
    section.extend_from_slice(&table_id_extension.to_be_bytes());
    section.push(0xC1 | ((version & 0x1F) << 1));
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(body);
    let crc = mpeg2_crc32(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat_section() -> Vec<u8> {
        // network PID entry + program 1 -> PMT 0x1000
        build_section(0x00, 1, 3, &[0x00, 0x00, 0xE0, 0x10, 0x00, 0x01, 0xF0, 0x00])
    }

    fn pmt_section() -> Vec<u8> {
        let body = [
            0xE1, 0x00, // PCR PID 0x100
            0xF0, 0x00, // no program info
            0x1B, 0xE1, 0x00, 0xF0, 0x00, // H.264 on 0x100
            0x0F, 0xE1, 0x01, 0xF0, 0x02, 0x0A, 0x00, // AAC on 0x101 with 2 bytes ES info
        ];
        build_section(0x02, 1, 0, &body)
    }

    #[test]
    fn test_crc_of_valid_section_is_zero() {
        assert_eq!(mpeg2_crc32(&pat_section()), 0);
    }

    #[test]
    fn test_parse_pat_skips_network_pid() {
        let pat = Pat::parse(&pat_section(), true).unwrap();
        assert_eq!(pat.version, 3);
        assert_eq!(
            pat.programs,
            vec![PatProgram {
                program_number: 1,
                pmt_pid: 0x1000
            }]
        );
    }

    #[test]
    fn test_parse_pmt_streams() {
        let pmt = Pmt::parse(&pmt_section(), true).unwrap();
        assert_eq!(pmt.pcr_pid, 0x100);
        assert_eq!(pmt.streams.len(), 2);
        assert_eq!(pmt.streams[0].stream_type, StreamType::H264);
        assert_eq!(pmt.streams[0].elementary_pid, 0x100);
        assert_eq!(pmt.streams[1].stream_type, StreamType::AdtsAac);
        assert_eq!(pmt.streams[1].elementary_pid, 0x101);
    }

    #[test]
    fn test_crc_mismatch_detected_only_when_checking() {
        let mut section = pat_section();
        let last = section.len() - 1;
        section[last] ^= 0xFF;
        assert!(matches!(
            Pat::parse(&section, true),
            Err(TsError::CrcMismatch { .. })
        ));
        assert!(Pat::parse(&section, false).is_ok());
    }

    #[test]
    fn test_wrong_table_id() {
        assert_eq!(
            Pmt::parse(&pat_section(), false).unwrap_err(),
            TsError::UnexpectedTableId {
                expected: 0x02,
                actual: 0x00
            }
        );
    }
}
