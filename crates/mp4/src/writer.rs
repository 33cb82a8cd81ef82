//! ISO BMFF box serialization.
//!
//! Boxes are written straight into a [`BytesMut`]: the size field is
//! reserved up front and patched once the body closure returns, so nested
//! containers never need intermediate buffers.

use bytes::{BufMut, BytesMut};

/// Identity transformation matrix shared by `mvhd` and `tkhd`.
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// Write a box whose body is produced by `body`.
pub fn write_box(out: &mut BytesMut, fourcc: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = out.len();
    out.put_u32(0);
    out.put_slice(fourcc);
    body(out);
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Write a full box (version + 24-bit flags before the body).
pub fn write_full_box(
    out: &mut BytesMut,
    fourcc: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(out, fourcc, |out| {
        out.put_u32((u32::from(version) << 24) | (flags & 0x00FF_FFFF));
        body(out);
    });
}

/// Codec-specific description of one track in an init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackKind {
    /// H.264 video; `avcc` is the `AVCDecoderConfigurationRecord`.
    Avc { width: u16, height: u16, avcc: Vec<u8> },
    /// AAC audio; `audio_specific_config` goes into the `esds` decoder info.
    Aac {
        sample_rate: u32,
        channels: u16,
        audio_specific_config: Vec<u8>,
    },
}

/// One `trak` of an init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfig {
    pub track_id: u32,
    pub timescale: u32,
    pub kind: TrackKind,
}

impl TrackConfig {
    pub fn is_video(&self) -> bool {
        matches!(self.kind, TrackKind::Avc { .. })
    }
}

/// Write a complete init segment (`ftyp` + `moov`) describing `tracks`.
pub fn write_init_segment(out: &mut BytesMut, tracks: &[TrackConfig]) {
    write_ftyp(out);
    write_box(out, b"moov", |out| {
        let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
        write_mvhd(out, next_track_id);
        for track in tracks {
            write_trak(out, track);
        }
        write_box(out, b"mvex", |out| {
            for track in tracks {
                write_trex(out, track.track_id);
            }
        });
    });
}

fn write_ftyp(out: &mut BytesMut) {
    write_box(out, b"ftyp", |out| {
        out.put_slice(b"isom");
        out.put_u32(0x200);
        for brand in [b"isom", b"iso6", b"avc1", b"mp41"] {
            out.put_slice(brand);
        }
    });
}

fn put_matrix(out: &mut BytesMut) {
    for value in UNITY_MATRIX {
        out.put_u32(value);
    }
}

fn write_mvhd(out: &mut BytesMut, next_track_id: u32) {
    write_full_box(out, b"mvhd", 0, 0, |out| {
        out.put_u32(0); // creation_time
        out.put_u32(0); // modification_time
        out.put_u32(1000);
        out.put_u32(0); // duration: unknown for live
        out.put_u32(0x0001_0000); // rate 1.0
        out.put_u16(0x0100); // volume 1.0
        out.put_bytes(0, 10);
        put_matrix(out);
        out.put_bytes(0, 24);
        out.put_u32(next_track_id);
    });
}

fn write_trak(out: &mut BytesMut, track: &TrackConfig) {
    write_box(out, b"trak", |out| {
        write_tkhd(out, track);
        write_box(out, b"mdia", |out| {
            write_full_box(out, b"mdhd", 0, 0, |out| {
                out.put_u32(0);
                out.put_u32(0);
                out.put_u32(track.timescale);
                out.put_u32(0);
                out.put_u16(0x55C4); // "und"
                out.put_u16(0);
            });
            let (handler, name): (&[u8; 4], &[u8]) = if track.is_video() {
                (b"vide", b"VideoHandler")
            } else {
                (b"soun", b"SoundHandler")
            };
            write_full_box(out, b"hdlr", 0, 0, |out| {
                out.put_u32(0);
                out.put_slice(handler);
                out.put_bytes(0, 12);
                out.put_slice(name);
                out.put_u8(0);
            });
            write_box(out, b"minf", |out| {
                if track.is_video() {
                    write_full_box(out, b"vmhd", 0, 1, |out| out.put_bytes(0, 8));
                } else {
                    write_full_box(out, b"smhd", 0, 0, |out| out.put_u32(0));
                }
                write_box(out, b"dinf", |out| {
                    write_full_box(out, b"dref", 0, 0, |out| {
                        out.put_u32(1);
                        write_full_box(out, b"url ", 0, 1, |_| {});
                    });
                });
                write_stbl(out, &track.kind);
            });
        });
    });
}

fn write_tkhd(out: &mut BytesMut, track: &TrackConfig) {
    // enabled | in_movie | in_preview
    write_full_box(out, b"tkhd", 0, 0x7, |out| {
        out.put_u32(0);
        out.put_u32(0);
        out.put_u32(track.track_id);
        out.put_u32(0);
        out.put_u32(0); // duration
        out.put_bytes(0, 8);
        out.put_u16(0); // layer
        out.put_u16(0); // alternate_group
        out.put_u16(if track.is_video() { 0 } else { 0x0100 });
        out.put_u16(0);
        put_matrix(out);
        let (width, height) = match &track.kind {
            TrackKind::Avc { width, height, .. } => (u32::from(*width), u32::from(*height)),
            TrackKind::Aac { .. } => (0, 0),
        };
        out.put_u32(width << 16);
        out.put_u32(height << 16);
    });
}

fn write_stbl(out: &mut BytesMut, kind: &TrackKind) {
    write_box(out, b"stbl", |out| {
        write_full_box(out, b"stsd", 0, 0, |out| {
            out.put_u32(1);
            match kind {
                TrackKind::Avc { width, height, avcc } => write_avc1(out, *width, *height, avcc),
                TrackKind::Aac {
                    sample_rate,
                    channels,
                    audio_specific_config,
                } => write_mp4a(out, *sample_rate, *channels, audio_specific_config),
            }
        });
        // sample tables are empty in fragmented files
        write_full_box(out, b"stts", 0, 0, |out| out.put_u32(0));
        write_full_box(out, b"stsc", 0, 0, |out| out.put_u32(0));
        write_full_box(out, b"stsz", 0, 0, |out| {
            out.put_u32(0);
            out.put_u32(0);
        });
        write_full_box(out, b"stco", 0, 0, |out| out.put_u32(0));
    });
}

fn write_avc1(out: &mut BytesMut, width: u16, height: u16, avcc: &[u8]) {
    write_box(out, b"avc1", |out| {
        out.put_bytes(0, 6);
        out.put_u16(1); // data_reference_index
        out.put_bytes(0, 16);
        out.put_u16(width);
        out.put_u16(height);
        out.put_u32(0x0048_0000); // 72 dpi
        out.put_u32(0x0048_0000);
        out.put_u32(0);
        out.put_u16(1); // frame_count
        out.put_bytes(0, 32); // compressorname
        out.put_u16(0x0018);
        out.put_i16(-1);
        write_box(out, b"avcC", |out| out.put_slice(avcc));
    });
}

fn write_mp4a(out: &mut BytesMut, sample_rate: u32, channels: u16, audio_specific_config: &[u8]) {
    write_box(out, b"mp4a", |out| {
        out.put_bytes(0, 6);
        out.put_u16(1);
        out.put_bytes(0, 8);
        out.put_u16(channels);
        out.put_u16(16);
        out.put_u32(0);
        out.put_u32(sample_rate << 16);
        write_esds(out, audio_specific_config);
    });
}

/// MPEG-4 descriptor: tag followed by a 4-byte expandable length.
fn put_descriptor(out: &mut BytesMut, tag: u8, body: &[u8]) {
    out.put_u8(tag);
    let len = body.len() as u32;
    out.put_u8(0x80 | ((len >> 21) & 0x7F) as u8);
    out.put_u8(0x80 | ((len >> 14) & 0x7F) as u8);
    out.put_u8(0x80 | ((len >> 7) & 0x7F) as u8);
    out.put_u8((len & 0x7F) as u8);
    out.put_slice(body);
}

fn write_esds(out: &mut BytesMut, audio_specific_config: &[u8]) {
    let mut decoder_config = BytesMut::new();
    decoder_config.put_u8(0x40); // MPEG-4 audio
    decoder_config.put_u8(0x15); // audio stream, upstream 0, reserved 1
    decoder_config.put_bytes(0, 3); // bufferSizeDB
    decoder_config.put_u32(0); // maxBitrate
    decoder_config.put_u32(0); // avgBitrate
    put_descriptor(&mut decoder_config, 0x05, audio_specific_config);

    let mut es = BytesMut::new();
    es.put_u16(0); // ES_ID
    es.put_u8(0);
    put_descriptor(&mut es, 0x04, &decoder_config);
    put_descriptor(&mut es, 0x06, &[0x02]);

    write_full_box(out, b"esds", 0, 0, |out| put_descriptor(out, 0x03, &es));
}

fn write_trex(out: &mut BytesMut, track_id: u32) {
    write_full_box(out, b"trex", 0, 0, |out| {
        out.put_u32(track_id);
        out.put_u32(1); // default_sample_description_index
        out.put_u32(0);
        out.put_u32(0);
        out.put_u32(0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::box_utils::{children, find_path, read_u32};

    fn video_track() -> TrackConfig {
        TrackConfig {
            track_id: 1,
            timescale: 90_000,
            kind: TrackKind::Avc {
                width: 1280,
                height: 720,
                avcc: vec![1, 0x64, 0, 0x1F, 0xFF, 0xE0, 0xE0],
            },
        }
    }

    fn audio_track() -> TrackConfig {
        TrackConfig {
            track_id: 2,
            timescale: 48_000,
            kind: TrackKind::Aac {
                sample_rate: 48_000,
                channels: 2,
                audio_specific_config: vec![0x11, 0x90],
            },
        }
    }

    #[test]
    fn test_write_box_patches_size() {
        let mut out = BytesMut::new();
        write_box(&mut out, b"test", |out| out.put_slice(&[1, 2, 3]));
        assert_eq!(out.len(), 11);
        assert_eq!(read_u32(&out, 0), Some(11));
        assert_eq!(&out[4..8], b"test");
    }

    #[test]
    fn test_full_box_header() {
        let mut out = BytesMut::new();
        write_full_box(&mut out, b"tfdt", 1, 0x020000, |_| {});
        assert_eq!(&out[8..12], &[1, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_init_segment_layout() {
        let mut out = BytesMut::new();
        write_init_segment(&mut out, &[video_track(), audio_track()]);

        let top: Vec<_> = children(&out, 0, out.len()).map(|b| b.fourcc).collect();
        assert_eq!(top, vec![*b"ftyp", *b"moov"]);

        let moov = find_path(&out, 0, out.len(), &[*b"moov"]).unwrap();
        let inner: Vec<_> = children(&out, moov.body_start, moov.end).map(|b| b.fourcc).collect();
        assert_eq!(inner, vec![*b"mvhd", *b"trak", *b"trak", *b"mvex"]);

        let mvex = find_path(&out, 0, out.len(), &[*b"moov", *b"mvex"]).unwrap();
        assert_eq!(children(&out, mvex.body_start, mvex.end).count(), 2);

        let stsd = find_path(
            &out,
            0,
            out.len(),
            &[*b"moov", *b"trak", *b"mdia", *b"minf", *b"stbl", *b"stsd"],
        )
        .unwrap();
        let entry = children(&out, stsd.body_start + 8, stsd.end).next().unwrap();
        assert_eq!(entry.fourcc, *b"avc1");
        // width/height sit 24 bytes into the visual sample entry body
        assert_eq!(&out[entry.body_start + 24..entry.body_start + 28], &[0x05, 0x00, 0x02, 0xD0]);
        let avcc = find_first_box_in(&out, entry.body_start + 78, entry.end, *b"avcC");
        assert_eq!(avcc, Some(vec![1, 0x64, 0, 0x1F, 0xFF, 0xE0, 0xE0]));
    }

    fn find_first_box_in(data: &[u8], start: usize, end: usize, fourcc: [u8; 4]) -> Option<Vec<u8>> {
        children(data, start, end)
            .find(|b| b.fourcc == fourcc)
            .map(|b| data[b.body_start..b.end].to_vec())
    }

    #[test]
    fn test_esds_carries_audio_specific_config() {
        let mut out = BytesMut::new();
        write_esds(&mut out, &[0x11, 0x90]);
        assert_eq!(&out[4..8], b"esds");
        // ES_Descriptor tag right after the full box header
        assert_eq!(out[12], 0x03);
        let tail = &out[out.len() - 8..];
        assert_eq!(tail, &[0x11, 0x90, 0x06, 0x80, 0x80, 0x80, 0x01, 0x02]);
    }
}
