//! Read-side helpers: track timescales from an init segment and decode-time
//! ranges from a media segment.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::trace;

use crate::box_utils::{children, find_first_box, find_path, full_box_header, read_u32, read_u64};

/// Timing-relevant facts about the tracks of an init segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitInfo {
    /// `track_id -> mdhd timescale`
    pub timescales: HashMap<u32, u32>,
    /// `track_id -> trex default_sample_duration`
    pub default_durations: HashMap<u32, u32>,
}

/// Decode-time span of a media segment, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentTiming {
    pub start: f64,
    pub end: f64,
}

/// Whether `data` starts with an init segment (`ftyp` or `moov`).
pub fn is_init_segment(data: &[u8]) -> bool {
    children(data, 0, data.len())
        .next()
        .is_some_and(|b| b.fourcc == *b"ftyp" || b.fourcc == *b"moov")
}

/// Split a buffer into its leading init segment (everything before the first
/// `styp`/`moof`) and the media part.
pub fn split_init_segment(data: &Bytes) -> (Option<Bytes>, Bytes) {
    let media_start = children(data, 0, data.len())
        .find(|b| b.fourcc == *b"moof" || b.fourcc == *b"styp")
        .map_or(data.len(), |b| b.start);
    if media_start == 0 || !is_init_segment(data) {
        return (None, data.clone());
    }
    (Some(data.slice(..media_start)), data.slice(media_start..))
}

/// Parse the `moov` of an init segment. Returns `None` when there is no `moov`.
pub fn parse_init(data: &[u8]) -> Option<InitInfo> {
    let moov = find_first_box(data, 0, data.len(), *b"moov")?;
    let mut info = InitInfo::default();

    for trak in children(data, moov.body_start, moov.end).filter(|b| b.fourcc == *b"trak") {
        let Some(tkhd) = find_first_box(data, trak.body_start, trak.end, *b"tkhd") else {
            continue;
        };
        let Some(mdhd) = find_path(data, trak.body_start, trak.end, &[*b"mdia", *b"mdhd"]) else {
            continue;
        };
        let (tkhd_version, _) = full_box_header(data, tkhd.body_start)?;
        let track_id = read_u32(data, tkhd.body_start + if tkhd_version == 1 { 20 } else { 12 })?;
        let (mdhd_version, _) = full_box_header(data, mdhd.body_start)?;
        let timescale = read_u32(data, mdhd.body_start + if mdhd_version == 1 { 20 } else { 12 })?;
        info.timescales.insert(track_id, timescale);
    }

    if let Some(mvex) = find_first_box(data, moov.body_start, moov.end, *b"mvex") {
        for trex in children(data, mvex.body_start, mvex.end).filter(|b| b.fourcc == *b"trex") {
            if let (Some(track_id), Some(duration)) =
                (read_u32(data, trex.body_start + 4), read_u32(data, trex.body_start + 12))
            {
                info.default_durations.insert(track_id, duration);
            }
        }
    }

    Some(info)
}

struct TrafTiming {
    track_id: u32,
    base_decode_time: u64,
    duration: u64,
}

fn parse_traf(data: &[u8], start: usize, end: usize, init: &InitInfo) -> Option<TrafTiming> {
    let tfhd = find_first_box(data, start, end, *b"tfhd")?;
    let (_, tfhd_flags) = full_box_header(data, tfhd.body_start)?;
    let track_id = read_u32(data, tfhd.body_start + 4)?;

    // optional tfhd fields precede default_sample_duration
    let mut cursor = tfhd.body_start + 8;
    if tfhd_flags & 0x01 != 0 {
        cursor += 8;
    }
    if tfhd_flags & 0x02 != 0 {
        cursor += 4;
    }
    let default_duration = if tfhd_flags & 0x08 != 0 {
        read_u32(data, cursor)?
    } else {
        init.default_durations.get(&track_id).copied().unwrap_or(0)
    };

    let base_decode_time = match find_first_box(data, start, end, *b"tfdt") {
        Some(tfdt) => match full_box_header(data, tfdt.body_start)? {
            (1, _) => read_u64(data, tfdt.body_start + 4)?,
            _ => u64::from(read_u32(data, tfdt.body_start + 4)?),
        },
        None => 0,
    };

    let mut duration = 0u64;
    for trun in children(data, start, end).filter(|b| b.fourcc == *b"trun") {
        let (_, flags) = full_box_header(data, trun.body_start)?;
        let sample_count = read_u32(data, trun.body_start + 4)? as usize;
        let mut cursor = trun.body_start + 8;
        if flags & 0x000001 != 0 {
            cursor += 4;
        }
        if flags & 0x000004 != 0 {
            cursor += 4;
        }
        let stride = [0x000100u32, 0x000200, 0x000400, 0x000800]
            .iter()
            .filter(|f| flags & **f != 0)
            .count()
            * 4;
        if flags & 0x000100 == 0 {
            duration += default_duration as u64 * sample_count as u64;
            continue;
        }
        for i in 0..sample_count {
            duration += u64::from(read_u32(data, cursor + i * stride)?);
        }
    }

    Some(TrafTiming {
        track_id,
        base_decode_time,
        duration,
    })
}

/// Compute the decode-time span of a `moof`-based media segment.
///
/// Spans of multiple tracks are merged (earliest start, latest end). Tracks
/// missing from `init` are ignored. Returns `None` if nothing could be timed.
pub fn fragment_timing(data: &[u8], init: &InitInfo) -> Option<FragmentTiming> {
    let mut span: Option<FragmentTiming> = None;
    for moof in children(data, 0, data.len()).filter(|b| b.fourcc == *b"moof") {
        for traf in children(data, moof.body_start, moof.end).filter(|b| b.fourcc == *b"traf") {
            let Some(timing) = parse_traf(data, traf.body_start, traf.end, init) else {
                trace!("Skipping unparsable traf");
                continue;
            };
            let Some(&timescale) = init.timescales.get(&timing.track_id) else {
                continue;
            };
            if timescale == 0 {
                continue;
            }
            let start = timing.base_decode_time as f64 / f64::from(timescale);
            let end = (timing.base_decode_time + timing.duration) as f64 / f64::from(timescale);
            span = Some(match span {
                Some(s) => FragmentTiming {
                    start: s.start.min(start),
                    end: s.end.max(end),
                },
                None => FragmentTiming { start, end },
            });
        }
    }
    span
}
