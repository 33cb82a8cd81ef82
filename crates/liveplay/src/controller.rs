// Live Session Controller: the polling / scheduling / feeding state machine.
//
// The controller performs no I/O. Events go in through `handle`, and the
// returned commands tell the driver which fetches to start and when to poll next.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};
use transmux::Transmuxer;

use crate::config::SessionConfig;
use crate::error::{FetchError, PlayerError};
use crate::repackager::Repackager;
use crate::sink::{FMP4_MIME, MediaSink};
use crate::stats::{SessionListener, compute_stats};
use crate::surface::PlaybackSurface;

/// Inputs to the controller.
#[derive(Debug)]
pub enum SessionEvent {
    ManifestLoaded(Result<String, FetchError>),
    SegmentLoaded {
        uri: String,
        result: Result<Bytes, FetchError>,
    },
    PollTimerFired,
    /// The sink finished an append.
    AppendFinished,
    /// The surface stalled waiting for data.
    Waiting,
}

/// Work the driver performs on behalf of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FetchManifest,
    FetchSegment { uri: String },
    /// Arm the poll timer; it fires `PollTimerFired` after the delay.
    SchedulePoll(Duration),
    /// The playlist ended and everything was fed; the session is complete.
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Live,
    Stopped,
}

/// The collaborators a session drives.
pub struct SessionParts {
    pub sink: Box<dyn MediaSink>,
    pub surface: Box<dyn PlaybackSurface>,
    pub repackager: Box<dyn Repackager>,
}

impl SessionParts {
    /// Parts using the built-in TS -> fMP4 transmuxer.
    pub fn new(sink: Box<dyn MediaSink>, surface: Box<dyn PlaybackSurface>) -> Self {
        Self {
            sink,
            surface,
            repackager: Box::new(Transmuxer::new()),
        }
    }

    pub fn with_repackager(mut self, repackager: Box<dyn Repackager>) -> Self {
        self.repackager = repackager;
        self
    }
}

pub struct SessionController {
    phase: Phase,
    running: bool,
    config: SessionConfig,
    listener: Arc<dyn SessionListener>,
    sink: Option<Box<dyn MediaSink>>,
    surface: Option<Box<dyn PlaybackSurface>>,
    repackager: Box<dyn Repackager>,
    /// URIs awaiting download, in manifest order.
    pending: VecDeque<String>,
    /// URIs already fed to the sink.
    downloaded: HashSet<String>,
    /// Repackaged fragments waiting for the sink to become idle.
    fragments: VecDeque<Bytes>,
    manifest_in_flight: bool,
    segment_in_flight: Option<String>,
    poll_scheduled: bool,
    end_list: bool,
    playing: bool,
}

impl SessionController {
    pub fn new(
        parts: SessionParts,
        listener: Arc<dyn SessionListener>,
        config: SessionConfig,
    ) -> Self {
        Self {
            phase: Phase::Idle,
            running: false,
            config,
            listener,
            sink: Some(parts.sink),
            surface: Some(parts.surface),
            repackager: parts.repackager,
            pending: VecDeque::new(),
            downloaded: HashSet::new(),
            fragments: VecDeque::new(),
            manifest_in_flight: false,
            segment_in_flight: None,
            poll_scheduled: false,
            end_list: false,
            playing: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn is_downloaded(&self, uri: &str) -> bool {
        self.downloaded.contains(uri)
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded.len()
    }

    pub fn is_poll_scheduled(&self) -> bool {
        self.poll_scheduled
    }

    /// Check the environment, subscribe to sink and surface signals, and
    /// request the first manifest. Does nothing unless the session is idle.
    pub fn start(
        &mut self,
        events: &UnboundedSender<SessionEvent>,
    ) -> Result<Vec<Command>, PlayerError> {
        if self.phase != Phase::Idle {
            return Ok(Vec::new());
        }

        let supported = self
            .sink
            .as_ref()
            .is_some_and(|sink| sink.is_type_supported(FMP4_MIME));
        if !supported {
            let err = PlayerError::UnsupportedEnvironment {
                mime: FMP4_MIME.to_string(),
            };
            error!(error = %err, "Cannot start live session");
            self.listener.on_error(&err);
            self.stop();
            return Err(err);
        }

        if let Some(sink) = self.sink.as_mut() {
            let tx = events.clone();
            sink.on_update_end(Box::new(move || {
                let _ = tx.send(SessionEvent::AppendFinished);
            }));
        }
        if let Some(surface) = self.surface.as_mut() {
            let tx = events.clone();
            surface.on_waiting(Box::new(move || {
                let _ = tx.send(SessionEvent::Waiting);
            }));
        }

        self.running = true;
        self.phase = Phase::Starting;
        self.manifest_in_flight = true;
        info!("Live session starting");
        Ok(vec![Command::FetchManifest])
    }

    /// Apply one event. A fatal error stops the session, is reported to the
    /// listener once and is returned here.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<Command>, PlayerError> {
        if !self.running {
            trace!(?event, "Discarding event for inactive session");
            return Ok(Vec::new());
        }

        let mut commands = Vec::new();
        match event {
            SessionEvent::ManifestLoaded(Ok(text)) => {
                self.manifest_in_flight = false;
                self.on_manifest(&text, &mut commands);
            }
            SessionEvent::ManifestLoaded(Err(e)) => {
                self.manifest_in_flight = false;
                error!(error = %e, "Manifest refresh failed, stopping session");
                let err = PlayerError::Network(e);
                self.listener.on_error(&err);
                self.stop();
                return Err(err);
            }
            SessionEvent::SegmentLoaded {
                uri,
                result: Ok(bytes),
            } => self.on_segment(uri, bytes, &mut commands),
            SessionEvent::SegmentLoaded {
                uri,
                result: Err(e),
            } => {
                if self.segment_in_flight.as_deref() == Some(uri.as_str()) {
                    self.segment_in_flight = None;
                }
                warn!(uri, error = %e, "Segment fetch failed, will retry");
            }
            SessionEvent::PollTimerFired => {
                self.poll_scheduled = false;
                if !self.manifest_in_flight && !self.end_list {
                    self.manifest_in_flight = true;
                    commands.push(Command::FetchManifest);
                }
            }
            SessionEvent::AppendFinished => self.on_append_finished(&mut commands),
            SessionEvent::Waiting => {
                debug!("Playback waiting for data");
                self.feed(&mut commands);
            }
        }

        self.check_finished(&mut commands);
        Ok(commands)
    }

    /// Tear down the session. Idempotent; later events are discarded.
    pub fn stop(&mut self) {
        if self.phase == Phase::Stopped {
            return;
        }
        self.running = false;
        self.phase = Phase::Stopped;
        self.poll_scheduled = false;
        self.manifest_in_flight = false;
        self.segment_in_flight = None;
        self.fragments.clear();
        self.repackager.dispose();

        if let Some(mut sink) = self.sink.take() {
            if sink.is_open() {
                sink.abort();
                sink.end_of_stream();
            }
            sink.detach();
        }
        if let Some(mut surface) = self.surface.take() {
            surface.release();
        }
        info!(
            downloaded = self.downloaded.len(),
            pending = self.pending.len(),
            "Live session stopped"
        );
    }

    fn on_manifest(&mut self, text: &str, commands: &mut Vec<Command>) {
        let snapshot = hls::parse_manifest(text);
        let mut added = 0usize;
        for uri in snapshot.uris() {
            if self.downloaded.contains(uri) || self.pending.iter().any(|p| p == uri) {
                continue;
            }
            self.pending.push_back(uri.to_string());
            added += 1;
        }
        debug!(
            count = added,
            pending = self.pending.len(),
            target_duration = snapshot.target_duration,
            media_sequence = ?snapshot.media_sequence,
            "Manifest refreshed"
        );

        if self.phase == Phase::Starting {
            self.phase = Phase::Live;
            info!(segments = snapshot.segments.len(), "Live session running");
        }

        self.feed(commands);

        if snapshot.end_list {
            if !self.end_list {
                info!("Playlist ended, draining remaining segments");
            }
            self.end_list = true;
        } else if !self.end_list {
            let delay = self.config.poll_interval(snapshot.target_duration);
            self.poll_scheduled = true;
            commands.push(Command::SchedulePoll(delay));
        }
    }

    fn on_segment(&mut self, uri: String, bytes: Bytes, commands: &mut Vec<Command>) {
        if self.segment_in_flight.as_deref() != Some(uri.as_str()) {
            warn!(uri, "Ignoring segment that was not requested");
            return;
        }
        self.segment_in_flight = None;

        let result = self
            .repackager
            .push(&bytes)
            .and_then(|()| self.repackager.flush());

        if self.pending.front() == Some(&uri) {
            self.pending.pop_front();
        } else {
            self.pending.retain(|p| *p != uri);
        }
        debug!(uri, size = bytes.len(), "Segment downloaded");
        self.downloaded.insert(uri.clone());

        match result {
            Ok(fragments) => self
                .fragments
                .extend(fragments.iter().map(|f| f.to_bytes())),
            Err(e) => warn!(uri, error = %e, "Failed to repackage segment, skipping"),
        }
        self.append_next(commands);
    }

    fn on_append_finished(&mut self, commands: &mut Vec<Command>) {
        if !self.playing
            && let Some(surface) = self.surface.as_mut()
        {
            match surface.play() {
                Ok(()) => {
                    self.playing = true;
                    info!("Playback started");
                }
                Err(e) => warn!(error = %e, "Failed to start playback, retrying after next append"),
            }
        }
        self.publish_stats();
        self.append_next(commands);
    }

    /// Hand the next queued fragment to the sink, or look for more work when
    /// the queue is empty.
    fn append_next(&mut self, commands: &mut Vec<Command>) {
        loop {
            let Some(sink) = self.sink.as_mut() else {
                return;
            };
            if sink.is_appending() {
                return;
            }
            let Some(fragment) = self.fragments.pop_front() else {
                self.feed(commands);
                return;
            };
            match sink.append(fragment) {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "Sink rejected fragment, skipping"),
            }
        }
    }

    /// Request the next pending segment if nothing else is in progress.
    fn feed(&mut self, commands: &mut Vec<Command>) {
        self.publish_stats();
        if !self.running
            || self.sink_busy()
            || !self.fragments.is_empty()
            || self.segment_in_flight.is_some()
        {
            return;
        }
        while let Some(head) = self.pending.front() {
            if self.downloaded.contains(head) {
                self.pending.pop_front();
                continue;
            }
            debug!(uri = %head, "Fetching segment");
            self.segment_in_flight = Some(head.clone());
            commands.push(Command::FetchSegment { uri: head.clone() });
            return;
        }
    }

    fn check_finished(&mut self, commands: &mut Vec<Command>) {
        if !self.running
            || !self.end_list
            || self.manifest_in_flight
            || self.segment_in_flight.is_some()
            || !self.pending.is_empty()
            || !self.fragments.is_empty()
            || self.sink_busy()
        {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.end_of_stream();
        }
        info!(downloaded = self.downloaded.len(), "Stream ended");
        self.running = false;
        commands.push(Command::Finish);
    }

    fn sink_busy(&self) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.is_appending())
    }

    fn publish_stats(&self) {
        let ranges = self
            .sink
            .as_ref()
            .map(|sink| sink.buffered())
            .unwrap_or_default();
        self.listener
            .on_stats(compute_stats(&ranges, self.downloaded.len()));
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::test_support::{FakeRepackager, FakeSink, FakeSurface, RecordingListener};

    const EXAMPLE: &str = "#EXT-X-TARGETDURATION:4\n#EXTINF:4.0\na.ts\n#EXTINF:4.0\nb.ts\n";

    struct Harness {
        controller: SessionController,
        sink: FakeSink,
        surface: FakeSurface,
        repackager: FakeRepackager,
        listener: Arc<RecordingListener>,
        tx: UnboundedSender<SessionEvent>,
        rx: UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let sink = FakeSink::default();
            let surface = FakeSurface::default();
            let repackager = FakeRepackager::default();
            let listener = Arc::new(RecordingListener::default());
            let parts = SessionParts::new(Box::new(sink.clone()), Box::new(surface.clone()))
                .with_repackager(Box::new(repackager.clone()));
            let controller = SessionController::new(parts, listener.clone(), SessionConfig::default());
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                controller,
                sink,
                surface,
                repackager,
                listener,
                tx,
                rx,
            }
        }

        fn started() -> Self {
            let mut harness = Self::new();
            assert_eq!(harness.start(), vec![Command::FetchManifest]);
            harness
        }

        fn start(&mut self) -> Vec<Command> {
            self.controller.start(&self.tx).unwrap()
        }

        fn handle(&mut self, event: SessionEvent) -> Vec<Command> {
            self.controller.handle(event).unwrap()
        }

        fn manifest(&mut self, text: &str) -> Vec<Command> {
            self.handle(SessionEvent::ManifestLoaded(Ok(text.to_string())))
        }

        fn segment_ok(&mut self, uri: &str) -> Vec<Command> {
            self.handle(SessionEvent::SegmentLoaded {
                uri: uri.to_string(),
                result: Ok(Bytes::from(uri.to_string())),
            })
        }

        fn segment_err(&mut self, uri: &str) -> Vec<Command> {
            self.handle(SessionEvent::SegmentLoaded {
                uri: uri.to_string(),
                result: Err(FetchError::http_status(StatusCode::SERVICE_UNAVAILABLE, uri)),
            })
        }

        fn append_finished(&mut self) -> Vec<Command> {
            self.sink.finish_append();
            self.handle(SessionEvent::AppendFinished)
        }

        fn pending(&self) -> Vec<String> {
            self.controller.pending().map(str::to_string).collect()
        }
    }

    fn fetch(uri: &str) -> Command {
        Command::FetchSegment {
            uri: uri.to_string(),
        }
    }

    fn window<S: AsRef<str>>(uris: &[S]) -> String {
        let mut text = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:2\n");
        for uri in uris {
            text.push_str("#EXTINF:2.0,\n");
            text.push_str(uri.as_ref());
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_example_manifest_feeds_each_segment_once() {
        let mut h = Harness::started();
        assert_eq!(h.controller.phase(), Phase::Starting);

        assert_eq!(
            h.manifest(EXAMPLE),
            vec![fetch("a.ts"), Command::SchedulePoll(Duration::from_secs(2))]
        );
        assert_eq!(h.controller.phase(), Phase::Live);
        assert!(h.controller.is_poll_scheduled());

        assert!(h.segment_ok("a.ts").is_empty());
        assert_eq!(h.sink.state().payloads(), vec!["a.ts"]);
        assert_eq!(h.append_finished(), vec![fetch("b.ts")]);
        assert!(h.surface.state().playing);

        assert!(h.segment_ok("b.ts").is_empty());
        assert!(h.append_finished().is_empty());
        assert_eq!(h.sink.state().payloads(), vec!["a.ts", "b.ts"]);
        assert_eq!(h.controller.downloaded_count(), 2);
        assert_eq!(h.surface.state().play_calls, 1);

        assert_eq!(h.handle(SessionEvent::PollTimerFired), vec![Command::FetchManifest]);
        assert_eq!(
            h.manifest(EXAMPLE),
            vec![Command::SchedulePoll(Duration::from_secs(2))]
        );
        assert_eq!(h.sink.state().payloads(), vec!["a.ts", "b.ts"]);

        let last = *h.listener.stats.lock().unwrap().last().unwrap();
        assert_eq!(last.downloaded_count, 2);
        assert!((last.buffered_seconds - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_wires_sink_and_surface_signals() {
        let mut h = Harness::started();
        if let Some(notify) = h.sink.state().notifier.as_ref() {
            notify();
        }
        if let Some(notify) = h.surface.state().waiting.as_ref() {
            notify();
        }
        assert!(matches!(h.rx.try_recv(), Ok(SessionEvent::AppendFinished)));
        assert!(matches!(h.rx.try_recv(), Ok(SessionEvent::Waiting)));
        assert!(h.start().is_empty(), "second start is a no-op");
    }

    #[test]
    fn test_unsupported_environment_fails_before_any_fetch() {
        let mut h = Harness::new();
        h.sink.state().unsupported = true;
        let err = h.controller.start(&h.tx).unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedEnvironment { .. }));
        assert_eq!(h.controller.phase(), Phase::Stopped);
        assert_eq!(h.listener.errors.lock().unwrap().len(), 1);
        assert!(h.manifest(EXAMPLE).is_empty());
    }

    #[test]
    fn test_no_append_while_sink_busy() {
        let mut h = Harness::started();
        h.manifest(&window(&["a.ts", "b.ts"]));
        h.segment_ok("a.ts");
        assert!(h.sink.state().appending);

        // feed triggers while the append is in progress must not start more work
        assert!(h.handle(SessionEvent::Waiting).is_empty());
        assert_eq!(h.handle(SessionEvent::PollTimerFired), vec![Command::FetchManifest]);
        assert_eq!(
            h.manifest(&window(&["a.ts", "b.ts", "c.ts"])),
            vec![Command::SchedulePoll(Duration::from_secs(1))]
        );
        assert_eq!(h.sink.state().appended.len(), 1);

        assert_eq!(h.append_finished(), vec![fetch("b.ts")]);
    }

    #[test]
    fn test_failed_segment_is_retried_without_duplication() {
        let mut h = Harness::started();
        assert_eq!(h.manifest(&window(&["a.ts", "b.ts"]))[0], fetch("a.ts"));

        assert!(h.segment_err("a.ts").is_empty());
        assert_eq!(h.pending(), vec!["a.ts", "b.ts"]);
        assert!(!h.controller.is_downloaded("a.ts"));

        assert_eq!(h.handle(SessionEvent::Waiting), vec![fetch("a.ts")]);
        h.segment_ok("a.ts");
        assert_eq!(h.append_finished(), vec![fetch("b.ts")]);
        assert_eq!(h.sink.state().payloads(), vec!["a.ts"]);
        assert_eq!(h.pending(), vec!["b.ts"]);
    }

    #[test]
    fn test_new_segments_append_in_manifest_order() {
        let mut h = Harness::started();
        h.manifest(&window(&["s1.ts", "s2.ts", "s3.ts"]));
        h.segment_ok("s1.ts");
        h.append_finished();

        h.handle(SessionEvent::PollTimerFired);
        h.manifest(&window(&["s2.ts", "s3.ts", "s4.ts", "s5.ts"]));
        assert_eq!(h.pending(), vec!["s2.ts", "s3.ts", "s4.ts", "s5.ts"]);
    }

    #[test]
    fn test_poll_never_overlaps_outstanding_manifest_fetch() {
        let mut h = Harness::started();
        h.manifest(&window(&["a.ts"]));
        assert_eq!(h.handle(SessionEvent::PollTimerFired), vec![Command::FetchManifest]);
        assert!(h.handle(SessionEvent::PollTimerFired).is_empty());
    }

    #[test]
    fn test_manifest_failure_is_fatal_and_reported_once() {
        let mut h = Harness::started();
        let err = h
            .controller
            .handle(SessionEvent::ManifestLoaded(Err(FetchError::http_status(
                StatusCode::NOT_FOUND,
                "http://h/live.m3u8",
            ))))
            .unwrap_err();
        assert!(matches!(err, PlayerError::Network(_)));
        assert!(!h.controller.is_running());
        assert_eq!(h.listener.errors.lock().unwrap().len(), 1);
        assert!(h.sink.state().detached);
        assert!(h.surface.state().released);

        h.controller.stop();
        assert!(h.manifest(EXAMPLE).is_empty());
        assert_eq!(h.listener.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_repackaging_failure_consumes_segment() {
        let mut h = Harness::started();
        h.manifest(&window(&["bad", "b.ts"]));
        assert_eq!(h.segment_ok("bad"), vec![fetch("b.ts")]);
        assert!(h.controller.is_downloaded("bad"));
        assert!(h.sink.state().appended.is_empty());
    }

    #[test]
    fn test_play_failure_is_retried_after_next_append() {
        let mut h = Harness::started();
        h.surface.state().refuse_plays = 1;
        h.manifest(&window(&["a.ts", "b.ts"]));
        h.segment_ok("a.ts");
        h.append_finished();
        assert!(!h.surface.state().playing);
        h.segment_ok("b.ts");
        h.append_finished();
        assert!(h.surface.state().playing);
        assert_eq!(h.surface.state().play_calls, 2);
    }

    #[test]
    fn test_rejected_append_moves_on_to_next_segment() {
        let mut h = Harness::started();
        assert_eq!(h.manifest(EXAMPLE)[0], fetch("a.ts"));
        h.sink.state().reject_appends = 1;

        assert_eq!(h.segment_ok("a.ts"), vec![fetch("b.ts")]);
        assert!(h.controller.is_downloaded("a.ts"));
        assert_eq!(h.pending(), vec!["b.ts"]);
        assert!(!h.sink.state().appending);
        assert!(h.sink.state().appended.is_empty());

        assert!(h.segment_ok("b.ts").is_empty());
        assert_eq!(h.sink.state().payloads(), vec!["b.ts"]);
        assert!(h.append_finished().is_empty());
        assert!(h.surface.state().playing);
        assert!(h.pending().is_empty());
        assert_eq!(h.controller.downloaded_count(), 2);
    }

    #[test]
    fn test_end_list_drains_then_finishes() {
        let mut h = Harness::started();
        let text = "#EXT-X-TARGETDURATION:2\n#EXTINF:2,\na.ts\n#EXT-X-ENDLIST\n";
        assert_eq!(h.manifest(text), vec![fetch("a.ts")]);
        assert!(!h.controller.is_poll_scheduled());
        assert!(h.segment_ok("a.ts").is_empty());
        assert_eq!(h.append_finished(), vec![Command::Finish]);
        assert!(h.sink.state().ended);
        assert!(h.handle(SessionEvent::PollTimerFired).is_empty());
    }

    #[test]
    fn test_stop_discards_late_results() {
        let mut h = Harness::started();
        h.manifest(EXAMPLE);
        h.controller.stop();
        assert_eq!(h.controller.phase(), Phase::Stopped);
        assert!(h.repackager.state().disposed);
        {
            let sink = h.sink.state();
            assert!(sink.aborted && sink.ended && sink.detached);
        }
        assert!(h.surface.state().released);

        assert!(h.segment_ok("a.ts").is_empty());
        assert!(h.sink.state().appended.is_empty());
        assert!(!h.controller.is_poll_scheduled());
        h.controller.stop();
    }

    #[test]
    fn test_stop_before_start() {
        let mut h = Harness::new();
        h.controller.stop();
        assert!(h.start().is_empty());
        assert!(h.surface.state().released);
    }

    mod prop {
        use std::collections::VecDeque;

        use proptest::prelude::*;

        use super::*;

        /// Run fetch commands to completion, failing fetches as `failures`
        /// dictates and retrying through the stall signal.
        fn drain<'a>(
            h: &mut Harness,
            commands: Vec<Command>,
            failures: &mut impl Iterator<Item = &'a bool>,
        ) {
            let mut queue = VecDeque::from(commands);
            loop {
                while let Some(command) = queue.pop_front() {
                    if let Command::FetchSegment { uri } = command {
                        let commands = match failures.next() {
                            Some(true) => h.segment_err(&uri),
                            _ => h.segment_ok(&uri),
                        };
                        queue.extend(commands);
                    }
                }
                if h.sink.is_appending() {
                    queue.extend(h.append_finished());
                    continue;
                }
                if h.pending().is_empty() {
                    return;
                }
                queue.extend(h.handle(SessionEvent::Waiting));
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn test_overlapping_polls_feed_each_segment_once(
                mut windows in prop::collection::vec((0usize..20, 1usize..6), 1..12),
                mut failures in prop::collection::vec(any::<bool>(), 0..32),
            ) {
                windows.sort_by_key(|w| w.0);
                failures.push(false);
                let mut failures = failures.iter().cycle();

                let mut h = Harness::started();
                for (start, len) in windows {
                    let uris: Vec<String> = (start..start + len).map(|i| format!("seg{i:03}.ts")).collect();
                    let commands = h.manifest(&window(&uris));
                    drain(&mut h, commands, &mut failures);

                    for uri in h.pending() {
                        prop_assert!(!h.controller.is_downloaded(&uri));
                    }
                    for uri in &uris {
                        prop_assert!(h.controller.is_downloaded(uri));
                    }
                }

                let payloads = h.sink.state().payloads();
                prop_assert_eq!(payloads.len(), h.controller.downloaded_count());
                prop_assert!(payloads.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
