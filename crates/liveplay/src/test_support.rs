//! In-memory doubles for controller and session tests.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use transmux::{MediaFragment, TransmuxError};

use crate::error::{PlayError, PlayerError, SinkError};
use crate::repackager::Repackager;
use crate::sink::{MediaSink, Notifier, TimeRange};
use crate::stats::{PlaybackStats, SessionListener};
use crate::surface::PlaybackSurface;

pub const INIT: &[u8] = b"init";

/// Chunk contents that make [`FakeRepackager`] fail.
pub const BAD_CHUNK: &[u8] = b"bad";

#[derive(Default)]
pub struct SinkState {
    pub unsupported: bool,
    /// Number of upcoming appends to fail with an I/O error.
    pub reject_appends: usize,
    pub appending: bool,
    pub appended: Vec<Bytes>,
    pub ranges: Vec<TimeRange>,
    pub aborted: bool,
    pub ended: bool,
    pub detached: bool,
    pub notifier: Option<Notifier>,
}

impl SinkState {
    /// Payloads appended so far, with the fake init prefix removed.
    pub fn payloads(&self) -> Vec<String> {
        self.appended
            .iter()
            .map(|b| String::from_utf8_lossy(&b[INIT.len()..]).into_owned())
            .collect()
    }
}

/// Sink that panics if an append is issued while another is in progress.
#[derive(Clone, Default)]
pub struct FakeSink(pub Arc<Mutex<SinkState>>);

impl FakeSink {
    pub fn state(&self) -> MutexGuard<'_, SinkState> {
        self.0.lock().unwrap()
    }

    /// Complete the in-progress append, extending the buffer by one second.
    pub fn finish_append(&self) {
        let mut state = self.state();
        assert!(state.appending, "no append in progress");
        state.appending = false;
        let start = state.ranges.last().map_or(0.0, |r| r.end);
        match state.ranges.last_mut() {
            Some(range) => range.end += 1.0,
            None => state.ranges.push(TimeRange::new(start, start + 1.0)),
        }
    }
}

impl MediaSink for FakeSink {
    fn is_type_supported(&self, _mime: &str) -> bool {
        !self.state().unsupported
    }

    fn append(&mut self, data: Bytes) -> Result<(), SinkError> {
        let mut state = self.state();
        assert!(!state.appending, "append issued while another append is in progress");
        if state.ended {
            return Err(SinkError::Closed);
        }
        if state.reject_appends > 0 {
            state.reject_appends -= 1;
            return Err(SinkError::Io(std::io::Error::other("write rejected")));
        }
        state.appending = true;
        state.appended.push(data);
        Ok(())
    }

    fn is_appending(&self) -> bool {
        self.state().appending
    }

    fn on_update_end(&mut self, notifier: Notifier) {
        self.state().notifier = Some(notifier);
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.state().ranges.clone()
    }

    fn is_open(&self) -> bool {
        !self.state().ended
    }

    fn abort(&mut self) {
        let mut state = self.state();
        state.aborted = true;
        state.appending = false;
    }

    fn end_of_stream(&mut self) {
        self.state().ended = true;
    }

    fn detach(&mut self) {
        self.state().detached = true;
    }
}

#[derive(Default)]
pub struct SurfaceState {
    pub refuse_plays: usize,
    pub play_calls: usize,
    pub playing: bool,
    pub released: bool,
    pub waiting: Option<Notifier>,
}

#[derive(Clone, Default)]
pub struct FakeSurface(pub Arc<Mutex<SurfaceState>>);

impl FakeSurface {
    pub fn state(&self) -> MutexGuard<'_, SurfaceState> {
        self.0.lock().unwrap()
    }
}

impl PlaybackSurface for FakeSurface {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn on_waiting(&mut self, notifier: Notifier) {
        self.state().waiting = Some(notifier);
    }

    fn play(&mut self) -> Result<(), PlayError> {
        let mut state = self.state();
        state.play_calls += 1;
        if state.refuse_plays > 0 {
            state.refuse_plays -= 1;
            return Err(PlayError::Refused {
                reason: "autoplay blocked".to_string(),
            });
        }
        state.playing = true;
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state();
        state.released = true;
        state.waiting = None;
    }
}

#[derive(Default)]
pub struct RepackagerState {
    pub pushed: Vec<Bytes>,
    pub disposed: bool,
}

/// Emits one fragment per flush: the fake init followed by the pushed bytes.
#[derive(Clone, Default)]
pub struct FakeRepackager(pub Arc<Mutex<RepackagerState>>);

impl FakeRepackager {
    pub fn state(&self) -> MutexGuard<'_, RepackagerState> {
        self.0.lock().unwrap()
    }
}

impl Repackager for FakeRepackager {
    fn push(&mut self, chunk: &[u8]) -> Result<(), TransmuxError> {
        let mut state = self.state();
        if state.disposed {
            return Err(TransmuxError::Disposed);
        }
        if chunk == BAD_CHUNK {
            return Err(TransmuxError::MissingParameterSets);
        }
        state.pushed.push(Bytes::copy_from_slice(chunk));
        Ok(())
    }

    fn flush(&mut self) -> Result<Vec<MediaFragment>, TransmuxError> {
        let state = self.state();
        if state.disposed {
            return Err(TransmuxError::Disposed);
        }
        Ok(state
            .pushed
            .last()
            .map(|media| MediaFragment {
                init: Bytes::from_static(INIT),
                media: media.clone(),
                start: 0.0,
                duration: 1.0,
            })
            .into_iter()
            .collect())
    }

    fn dispose(&mut self) {
        self.state().disposed = true;
    }
}

#[derive(Default)]
pub struct RecordingListener {
    pub stats: Mutex<Vec<PlaybackStats>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn last_stats(&self) -> Option<PlaybackStats> {
        self.stats.lock().unwrap().last().copied()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }
}

impl SessionListener for RecordingListener {
    fn on_stats(&self, stats: PlaybackStats) {
        self.stats.lock().unwrap().push(stats);
    }

    fn on_error(&self, error: &PlayerError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}
