use bytes::{Bytes, BytesMut};
use mp4::{Sample, TrackConfig, TrackFragment, TrackKind, write_init_segment, write_media_segment};
use tracing::{debug, trace, warn};
use ts::{Demuxer, ElementaryPacket, StreamType};

use crate::aac::{AdtsHeader, SAMPLES_PER_FRAME, scan_frames};
use crate::error::TransmuxError;
use crate::h264::{
    NAL_AUD, NAL_FILLER, NAL_IDR, NAL_PPS, NAL_SPS, SpsInfo, build_avcc, nal_type, split_annex_b,
    to_length_prefixed,
};

pub const VIDEO_TRACK_ID: u32 = 1;
pub const AUDIO_TRACK_ID: u32 = 2;

/// MPEG-TS clock rate, also used as the video track timescale.
const MPEG_TIMESCALE: u64 = 90_000;
const TIMESTAMP_WRAP: u64 = 1 << 33;
/// Duration given to the last video sample when no later sample is known (30 fps).
const DEFAULT_FRAME_DURATION: u32 = 3_000;

/// Map a 33-bit timestamp onto the unwrapped timeline closest to `reference`.
pub fn unwrap_timestamp(ts: u64, reference: Option<u64>) -> u64 {
    let ts = ts & (TIMESTAMP_WRAP - 1);
    let Some(reference) = reference else {
        return ts;
    };
    let same_epoch = reference - reference % TIMESTAMP_WRAP + ts;
    [Some(same_epoch + TIMESTAMP_WRAP), same_epoch.checked_sub(TIMESTAMP_WRAP)]
        .into_iter()
        .flatten()
        .fold(same_epoch, |best, candidate| {
            if candidate.abs_diff(reference) < best.abs_diff(reference) {
                candidate
            } else {
                best
            }
        })
}

/// One self-contained fMP4 fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFragment {
    /// `ftyp` + `moov` covering every track configured so far.
    pub init: Bytes,
    /// `moof` + `mdat`.
    pub media: Bytes,
    /// Decode time of the earliest sample, in seconds on the rebased timeline.
    pub start: f64,
    pub duration: f64,
}

impl MediaFragment {
    /// Init segment followed by the media segment.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.init.len() + self.media.len());
        out.extend_from_slice(&self.init);
        out.extend_from_slice(&self.media);
        out.freeze()
    }
}

#[derive(Debug)]
struct VideoSample {
    dts: u64,
    pts: u64,
    data: Bytes,
    is_sync: bool,
}

#[derive(Debug, Default)]
struct VideoState {
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    info: Option<SpsInfo>,
    seen_keyframe: bool,
    last_dts: Option<u64>,
    last_duration: Option<u32>,
    samples: Vec<VideoSample>,
}

impl VideoState {
    fn track_config(&self) -> Option<TrackConfig> {
        let (sps, pps, info) = (self.sps.as_ref()?, self.pps.as_ref()?, self.info?);
        Some(TrackConfig {
            track_id: VIDEO_TRACK_ID,
            timescale: MPEG_TIMESCALE as u32,
            kind: TrackKind::Avc {
                width: u16::try_from(info.width).ok()?,
                height: u16::try_from(info.height).ok()?,
                avcc: build_avcc(sps, pps),
            },
        })
    }
}

#[derive(Debug)]
struct AudioSample {
    pts: u64,
    data: Bytes,
}

#[derive(Debug, Default)]
struct AudioState {
    header: Option<AdtsHeader>,
    pending: BytesMut,
    /// Timestamp of the frame that starts `pending`'s timeline, and frames emitted since.
    origin: Option<u64>,
    frames_since_origin: u64,
    last_pts: Option<u64>,
    samples: Vec<AudioSample>,
}

impl AudioState {
    fn track_config(&self) -> Option<TrackConfig> {
        let header = self.header?;
        Some(TrackConfig {
            track_id: AUDIO_TRACK_ID,
            timescale: header.sample_rate(),
            kind: TrackKind::Aac {
                sample_rate: header.sample_rate(),
                channels: u16::from(header.channel_configuration),
                audio_specific_config: header.audio_specific_config().to_vec(),
            },
        })
    }
}

/// Stateful MPEG-TS to fragmented MP4 converter.
///
/// Chunks are fed in arrival order with [`push`](Self::push); each
/// [`flush`](Self::flush) turns everything accumulated so far into at most
/// one [`MediaFragment`]. Codec configuration and the decode timeline carry
/// over between flushes.
#[derive(Debug, Default)]
pub struct Transmuxer {
    demuxer: Demuxer,
    video: VideoState,
    audio: AudioState,
    /// Unwrapped 90 kHz timestamp mapped to decode time 0.
    base_time: Option<u64>,
    sequence_number: u32,
    init_cache: Option<(Vec<TrackConfig>, Bytes)>,
    disposed: bool,
}

impl Transmuxer {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_live(&self) -> Result<(), TransmuxError> {
        if self.disposed {
            Err(TransmuxError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Feed the next chunk of the transport stream.
    ///
    /// On error everything gathered since the previous flush is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), TransmuxError> {
        self.ensure_live()?;
        let packets = self.demuxer.push(chunk);
        let result = packets
            .into_iter()
            .try_for_each(|packet| self.handle_packet(packet));
        if result.is_err() {
            self.discard_pending();
        }
        result
    }

    /// Emit the samples gathered since the previous flush.
    ///
    /// On error the samples are discarded rather than carried into the next fragment.
    pub fn flush(&mut self) -> Result<Vec<MediaFragment>, TransmuxError> {
        self.ensure_live()?;
        let packets = self.demuxer.flush();
        let result = packets
            .into_iter()
            .try_for_each(|packet| self.handle_packet(packet))
            .and_then(|()| self.build_fragment());
        match result {
            Ok(fragment) => Ok(fragment.into_iter().collect()),
            Err(e) => {
                self.discard_pending();
                Err(e)
            }
        }
    }

    /// Drop samples and partial packets gathered since the previous flush.
    ///
    /// The decode timeline still starts at the first timestamp ever seen, so
    /// later fragments keep their position after a dropped one.
    pub fn discard_pending(&mut self) {
        let first_time = [
            self.video.samples.first().map(|s| s.dts),
            self.audio.samples.first().map(|s| s.pts),
        ]
        .into_iter()
        .flatten()
        .min();
        if let Some(first_time) = first_time {
            self.base_time.get_or_insert(first_time);
        }
        let dropped = self.video.samples.len() + self.audio.samples.len();
        if dropped > 0 {
            debug!(dropped, "Discarding samples of a failed segment");
        }
        self.video.samples.clear();
        self.audio.samples.clear();
        self.audio.pending.clear();
        self.audio.origin = None;
        self.demuxer.discard_partial();
    }

    /// Drop all state. Later calls fail with [`TransmuxError::Disposed`].
    pub fn dispose(&mut self) {
        *self = Self {
            disposed: true,
            ..Self::default()
        };
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn handle_packet(&mut self, packet: ElementaryPacket) -> Result<(), TransmuxError> {
        match packet.stream_type {
            StreamType::H264 => self.push_video(packet),
            StreamType::AdtsAac => {
                self.push_audio(packet);
                Ok(())
            }
            other => {
                trace!(pid = packet.pid, stream_type = ?other, "Ignoring unsupported stream");
                Ok(())
            }
        }
    }

    fn push_video(&mut self, packet: ElementaryPacket) -> Result<(), TransmuxError> {
        let Some(pts) = packet.pts else {
            warn!(pid = packet.pid, "Dropping video PES without PTS");
            return Ok(());
        };
        let reference = self.video.last_dts;
        let pts = unwrap_timestamp(pts, reference);
        let dts = unwrap_timestamp(packet.dts.unwrap_or(pts), reference);

        let mut is_sync = false;
        let mut nals = Vec::new();
        for nal in split_annex_b(&packet.data) {
            match nal_type(nal) {
                NAL_SPS => {
                    if self.video.sps.as_deref() != Some(nal) {
                        let info = SpsInfo::parse(nal)?;
                        if u16::try_from(info.width).is_err() || u16::try_from(info.height).is_err() {
                            return Err(TransmuxError::InvalidSps("picture size exceeds 65535"));
                        }
                        debug!(
                            width = info.width,
                            height = info.height,
                            codec = %info.codec_string(),
                            "New H.264 sequence parameters"
                        );
                        self.video.sps = Some(nal.to_vec());
                        self.video.info = Some(info);
                    }
                }
                NAL_PPS => self.video.pps = Some(nal.to_vec()),
                NAL_AUD | NAL_FILLER => {}
                kind => {
                    is_sync |= kind == NAL_IDR;
                    nals.push(nal);
                }
            }
        }

        if nals.is_empty() {
            return Ok(());
        }
        if !is_sync && !self.video.seen_keyframe {
            trace!(dts, "Dropping video access unit before the first keyframe");
            return Ok(());
        }
        if is_sync && (self.video.sps.is_none() || self.video.pps.is_none()) {
            return Err(TransmuxError::MissingParameterSets);
        }

        self.video.seen_keyframe = true;
        self.video.last_dts = Some(dts);
        self.video.samples.push(VideoSample {
            dts,
            pts,
            data: Bytes::from(to_length_prefixed(nals)),
            is_sync,
        });
        Ok(())
    }

    fn push_audio(&mut self, packet: ElementaryPacket) {
        let pts = packet.pts.map(|pts| unwrap_timestamp(pts, self.audio.last_pts));
        if let Some(pts) = pts {
            self.audio.last_pts = Some(pts);
            // a PES that starts on a frame boundary re-anchors the audio clock
            if self.audio.pending.is_empty() || self.audio.origin.is_none() {
                self.audio.origin = Some(pts);
                self.audio.frames_since_origin = 0;
            }
        }
        let Some(origin) = self.audio.origin else {
            warn!(pid = packet.pid, "Dropping audio before the first timestamp");
            return;
        };

        self.audio.pending.extend_from_slice(&packet.data);
        let (frames, consumed) = scan_frames(&self.audio.pending);
        let buffer = self.audio.pending.split_to(consumed).freeze();

        for frame in frames {
            if self.audio.header.is_none_or(|h| {
                h.audio_specific_config() != frame.header.audio_specific_config()
            }) {
                debug!(
                    sample_rate = frame.header.sample_rate(),
                    channels = frame.header.channel_configuration,
                    codec = %frame.header.codec_string(),
                    "New AAC configuration"
                );
                self.audio.header = Some(frame.header);
            }
            let rate = u64::from(frame.header.sample_rate());
            let offset = self.audio.frames_since_origin * u64::from(SAMPLES_PER_FRAME) * MPEG_TIMESCALE / rate;
            self.audio.samples.push(AudioSample {
                pts: origin + offset,
                data: buffer.slice(frame.payload.0..frame.payload.1),
            });
            self.audio.frames_since_origin += 1;
        }
    }

    fn init_segment(&mut self, tracks: Vec<TrackConfig>) -> Bytes {
        if let Some((cached, init)) = &self.init_cache
            && *cached == tracks
        {
            return init.clone();
        }
        let mut out = BytesMut::new();
        write_init_segment(&mut out, &tracks);
        let init = out.freeze();
        self.init_cache = Some((tracks, init.clone()));
        init
    }

    fn build_fragment(&mut self) -> Result<Option<MediaFragment>, TransmuxError> {
        let video = std::mem::take(&mut self.video.samples);
        let audio = std::mem::take(&mut self.audio.samples);

        let first_time = [video.first().map(|s| s.dts), audio.first().map(|s| s.pts)]
            .into_iter()
            .flatten()
            .min();
        let Some(first_time) = first_time else {
            return Ok(None);
        };
        let base = *self.base_time.get_or_insert(first_time);

        let mut configs = Vec::with_capacity(2);
        let mut fragments = Vec::with_capacity(2);
        let mut span: Option<(f64, f64)> = None;
        let mut extend_span = |start: f64, end: f64| {
            span = Some(span.map_or((start, end), |(s, e)| (s.min(start), e.max(end))));
        };

        if let Some(config) = self.video.track_config() {
            configs.push(config);
        }
        if let Some(config) = self.audio.track_config() {
            configs.push(config);
        }

        if !video.is_empty() {
            if self.video.track_config().is_none() {
                return Err(TransmuxError::MissingParameterSets);
            }
            let fragment = self.video_fragment(&video, base);
            let start = fragment.base_decode_time as f64 / MPEG_TIMESCALE as f64;
            extend_span(start, start + fragment.duration() as f64 / MPEG_TIMESCALE as f64);
            fragments.push(fragment);
        }

        if !audio.is_empty()
            && let Some(header) = self.audio.header
        {
            let rate = u64::from(header.sample_rate());
            let mut data = BytesMut::new();
            let samples = audio
                .iter()
                .map(|s| {
                    data.extend_from_slice(&s.data);
                    Sample::new(SAMPLES_PER_FRAME, s.data.len() as u32, true)
                })
                .collect();
            let fragment = TrackFragment {
                track_id: AUDIO_TRACK_ID,
                base_decode_time: audio[0].pts.saturating_sub(base) * rate / MPEG_TIMESCALE,
                samples,
                data: data.freeze(),
            };
            let start = fragment.base_decode_time as f64 / rate as f64;
            extend_span(start, start + fragment.duration() as f64 / rate as f64);
            fragments.push(fragment);
        }

        let Some((start, end)) = span else {
            return Ok(None);
        };

        let init = self.init_segment(configs);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        let mut media = BytesMut::new();
        write_media_segment(&mut media, self.sequence_number, &fragments);
        trace!(
            sequence = self.sequence_number,
            start,
            duration = end - start,
            video_samples = video.len(),
            audio_samples = audio.len(),
            "Built fragment"
        );

        Ok(Some(MediaFragment {
            init,
            media: media.freeze(),
            start,
            duration: end - start,
        }))
    }

    fn video_fragment(&mut self, video: &[VideoSample], base: u64) -> TrackFragment {
        let mut data = BytesMut::new();
        let mut samples = Vec::with_capacity(video.len());
        for (i, sample) in video.iter().enumerate() {
            let fallback = self.video.last_duration.unwrap_or(DEFAULT_FRAME_DURATION);
            let duration = match video.get(i + 1) {
                Some(next) if next.dts > sample.dts => (next.dts - sample.dts) as u32,
                _ => fallback,
            };
            self.video.last_duration = Some(duration);
            data.extend_from_slice(&sample.data);
            samples.push(
                Sample::new(duration, sample.data.len() as u32, sample.is_sync)
                    .with_composition_offset((sample.pts as i64 - sample.dts as i64) as i32),
            );
        }
        TrackFragment {
            track_id: VIDEO_TRACK_ID,
            base_decode_time: video[0].dts.saturating_sub(base),
            samples,
            data: data.freeze(),
        }
    }
}
