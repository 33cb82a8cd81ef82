//! Minimal fragmented MP4 (ISO BMFF) support.
//!
//! Writes init segments (`ftyp` + `moov` with `mvex`) and media segments
//! (`moof` + `mdat`) for H.264 and AAC tracks, and reads back just enough of
//! them to recover track timescales and fragment decode-time ranges.

mod box_utils;
pub mod fragment;
pub mod inspect;
pub mod writer;

pub use fragment::{Sample, TrackFragment, write_media_segment};
pub use inspect::{FragmentTiming, InitInfo, fragment_timing, is_init_segment, parse_init, split_init_segment};
pub use writer::{TrackConfig, TrackKind, write_init_segment};
