//! H.264 Annex B handling: NAL splitting, SPS dimensions, `avcC` records.

use crate::bits::{BitReader, remove_emulation_prevention};
use crate::error::TransmuxError;

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;
pub const NAL_FILLER: u8 = 12;

/// Profiles whose SPS carries chroma format and bit depth fields.
const HIGH_PROFILES: [u8; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

pub fn nal_type(nal: &[u8]) -> u8 {
    nal.first().map_or(0, |b| b & 0x1F)
}

/// Split an Annex B byte stream into NAL units (start codes removed).
///
/// Trailing zero bytes before a start code belong to the start code, not the
/// preceding NAL unit.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    let mut nals = Vec::new();
    let mut start: Option<usize> = None;
    let mut i = 0;

    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if let Some(s) = start {
                let mut end = i;
                while end > s && data[end - 1] == 0 {
                    end -= 1;
                }
                if end > s {
                    nals.push(&data[s..end]);
                }
            }
            i += 3;
            start = Some(i);
        } else {
            i += 1;
        }
    }

    if let Some(s) = start
        && s < data.len()
    {
        nals.push(&data[s..]);
    }
    nals
}

/// Fields of a sequence parameter set needed for an init segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

fn skip_scaling_list(reader: &mut BitReader<'_>, size: usize) -> Option<()> {
    let mut last = 8i64;
    let mut next = 8i64;
    for _ in 0..size {
        if next != 0 {
            let delta = i64::from(reader.read_se()?);
            next = (last + delta).rem_euclid(256);
        }
        if next != 0 {
            last = next;
        }
    }
    Some(())
}

impl SpsInfo {
    /// Parse an SPS NAL unit (including its one-byte NAL header).
    pub fn parse(nal: &[u8]) -> Result<Self, TransmuxError> {
        if nal_type(nal) != NAL_SPS {
            return Err(TransmuxError::InvalidSps("not an SPS NAL unit"));
        }
        let rbsp = remove_emulation_prevention(&nal[1..]);
        Self::parse_rbsp(&rbsp).ok_or(TransmuxError::InvalidSps("truncated SPS"))
    }

    fn parse_rbsp(rbsp: &[u8]) -> Option<Self> {
        let mut r = BitReader::new(rbsp);
        let profile_idc = r.read_bits(8)? as u8;
        let constraint_flags = r.read_bits(8)? as u8;
        let level_idc = r.read_bits(8)? as u8;
        r.read_ue()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane = false;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane = r.read_bit()?;
            }
            r.read_ue()?; // bit_depth_luma_minus8
            r.read_ue()?; // bit_depth_chroma_minus8
            r.read_bit()?; // qpprime_y_zero_transform_bypass_flag
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        r.read_ue()?; // log2_max_frame_num_minus4
        match r.read_ue()? {
            0 => {
                r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                r.read_bit()?;
                r.read_se()?;
                r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }
        r.read_ue()?; // max_num_ref_frames
        r.read_bit()?; // gaps_in_frame_num_value_allowed_flag

        let width_in_mbs = r.read_ue()?.checked_add(1)?;
        let height_in_map_units = r.read_ue()?.checked_add(1)?;
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            r.read_bit()?; // mb_adaptive_frame_field_flag
        }
        r.read_bit()?; // direct_8x8_inference_flag

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let chroma_array_type = if separate_colour_plane { 0 } else { chroma_format_idc };
        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let (crop_unit_x, crop_unit_y) = match chroma_array_type {
            1 => (2, 2 * field_factor),
            2 => (2, field_factor),
            _ => (1, field_factor),
        };

        let width = width_in_mbs
            .checked_mul(16)?
            .checked_sub(crop_left.checked_add(crop_right)?.checked_mul(crop_unit_x)?)?;
        let height = height_in_map_units
            .checked_mul(16 * field_factor)?
            .checked_sub(crop_top.checked_add(crop_bottom)?.checked_mul(crop_unit_y)?)?;

        Some(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            width,
            height,
        })
    }

    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_idc, self.constraint_flags, self.level_idc
        )
    }
}

/// Build an `AVCDecoderConfigurationRecord` with 4-byte NAL lengths.
pub fn build_avcc(sps: &[u8], pps: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(11 + sps.len() + pps.len());
    record.push(1);
    record.extend_from_slice(sps.get(1..4).unwrap_or(&[0, 0, 0]));
    record.push(0xFF); // lengthSizeMinusOne = 3
    record.push(0xE1); // one SPS
    record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    record.extend_from_slice(sps);
    record.push(1); // one PPS
    record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    record.extend_from_slice(pps);
    record
}

/// Write NAL units as 4-byte length-prefixed samples.
pub fn to_length_prefixed<'a>(nals: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    out
}
