//! Movie fragment (`moof` + `mdat`) writing.
//!
//! Every track fragment uses `default-base-is-moof`, so each `trun` data
//! offset is relative to the start of its `moof`. Track payloads are laid out
//! in `mdat` in the same order as their `traf` boxes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::writer::{write_box, write_full_box};

/// `sample_depends_on = 2`: does not depend on other samples.
pub const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
/// `sample_depends_on = 1` with `sample_is_non_sync_sample` set.
pub const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;
const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_SAMPLE_CTS: u32 = 0x000800;

/// Per-sample entry of a `trun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    /// Presentation minus decode time, in the track timescale.
    pub composition_offset: i32,
}

impl Sample {
    pub fn new(duration: u32, size: u32, is_sync: bool) -> Self {
        Self {
            duration,
            size,
            flags: if is_sync {
                SAMPLE_FLAGS_SYNC
            } else {
                SAMPLE_FLAGS_NON_SYNC
            },
            composition_offset: 0,
        }
    }

    pub fn with_composition_offset(mut self, offset: i32) -> Self {
        self.composition_offset = offset;
        self
    }
}

/// Samples of one track in one fragment, with their concatenated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFragment {
    pub track_id: u32,
    pub base_decode_time: u64,
    pub samples: Vec<Sample>,
    pub data: Bytes,
}

impl TrackFragment {
    /// Total duration of the run in the track timescale.
    pub fn duration(&self) -> u64 {
        self.samples.iter().map(|s| u64::from(s.duration)).sum()
    }
}

/// Write `moof` + `mdat` for the given track fragments.
///
/// Tracks without samples are skipped. Returns the number of bytes written.
pub fn write_media_segment(out: &mut BytesMut, sequence_number: u32, tracks: &[TrackFragment]) -> usize {
    let start = out.len();
    let tracks: Vec<&TrackFragment> = tracks.iter().filter(|t| !t.samples.is_empty()).collect();

    // positions of the trun data_offset fields, patched once moof size is known
    let mut offset_fields = Vec::with_capacity(tracks.len());
    write_box(out, b"moof", |out| {
        write_full_box(out, b"mfhd", 0, 0, |out| out.put_u32(sequence_number));
        for track in &tracks {
            write_box(out, b"traf", |out| {
                write_full_box(out, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF, |out| {
                    out.put_u32(track.track_id);
                });
                write_full_box(out, b"tfdt", 1, 0, |out| out.put_u64(track.base_decode_time));
                let flags = TRUN_DATA_OFFSET
                    | TRUN_SAMPLE_DURATION
                    | TRUN_SAMPLE_SIZE
                    | TRUN_SAMPLE_FLAGS
                    | TRUN_SAMPLE_CTS;
                write_full_box(out, b"trun", 1, flags, |out| {
                    out.put_u32(track.samples.len() as u32);
                    offset_fields.push(out.len());
                    out.put_i32(0);
                    for sample in &track.samples {
                        out.put_u32(sample.duration);
                        out.put_u32(sample.size);
                        out.put_u32(sample.flags);
                        out.put_i32(sample.composition_offset);
                    }
                });
            });
        }
    });

    let moof_size = out.len() - start;
    let mut data_offset = moof_size + 8;
    for (field, track) in offset_fields.into_iter().zip(&tracks) {
        out[field..field + 4].copy_from_slice(&(data_offset as i32).to_be_bytes());
        data_offset += track.data.len();
    }

    write_box(out, b"mdat", |out| {
        for track in &tracks {
            out.put_slice(&track.data);
        }
    });

    out.len() - start
}
