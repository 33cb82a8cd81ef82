// Fixtures for the integration tests. Doubles that need no runtime live in
// `liveplay_engine::test_support`.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use liveplay_engine::test_support::INIT;
use liveplay_engine::{
    FetchError, MediaSink, Notifier, Repackager, SegmentSource, SinkError, TimeRange,
};
use reqwest::StatusCode;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Instant;
use transmux::{MediaFragment, TransmuxError};

pub const EXAMPLE: &str = "#EXT-X-TARGETDURATION:4\n#EXTINF:4.0\na.ts\n#EXTINF:4.0\nb.ts\n";

// ============================================================================
// HTTP server
// ============================================================================

pub struct TestServer {
    pub base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Bind a local port and serve the router built for its base URL.
    pub async fn start(build: impl FnOnce(&str) -> Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let router = build(&base_url);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });
        tokio::spawn(async move {
            server.await.unwrap();
        });

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

// ============================================================================
// Synthetic media
// ============================================================================

/// ADTS frame (AAC-LC, 48 kHz, stereo, no CRC).
pub fn adts_frame(payload: &[u8]) -> Vec<u8> {
    let len = 7 + payload.len();
    let mut frame = vec![
        0xFF,
        0xF1,
        (1 << 6) | (3 << 2),
        (2 << 6) | ((len >> 11) as u8 & 0x03),
        (len >> 3) as u8,
        (((len & 0x07) as u8) << 5) | 0x1F,
        0xFC,
    ];
    frame.extend_from_slice(payload);
    frame
}

/// An audio-only transport stream segment holding `frames` AAC frames.
pub fn aac_segment(first_pts: u64, frames: usize) -> Vec<u8> {
    const PMT_PID: u16 = 0x1000;
    const AUDIO_PID: u16 = 0x101;

    let mut data = ts::test_support::pat(PMT_PID);
    data.extend(ts::test_support::pmt(PMT_PID, &[(0x0F, AUDIO_PID)]));
    let es: Vec<u8> = (0..frames).flat_map(|_| adts_frame(&[0x21; 16])).collect();
    let mut cc = 0;
    data.extend(ts::test_support::packetize(
        AUDIO_PID,
        &ts::test_support::pes(0xC0, first_pts, None, &es, true),
        true,
        &mut cc,
        false,
    ));
    data
}

// ============================================================================
// Segment source
// ============================================================================

#[derive(Default)]
struct SourceState {
    manifest: String,
    manifest_error: Option<StatusCode>,
    failures: HashMap<String, usize>,
    manifest_fetches: Vec<Instant>,
    segment_fetches: Vec<String>,
}

/// In-memory manifest and segments; a segment's bytes are its URI.
#[derive(Default)]
pub struct MemorySource(Mutex<SourceState>);

impl MemorySource {
    pub fn new(manifest: &str) -> Arc<Self> {
        let source = Self::default();
        source.0.lock().unwrap().manifest = manifest.to_string();
        Arc::new(source)
    }

    pub fn set_manifest(&self, manifest: &str) {
        self.0.lock().unwrap().manifest = manifest.to_string();
    }

    pub fn fail_manifest(&self, status: StatusCode) {
        self.0.lock().unwrap().manifest_error = Some(status);
    }

    /// Fail the next `times` fetches of `uri`.
    pub fn fail_segment(&self, uri: &str, times: usize) {
        self.0.lock().unwrap().failures.insert(uri.to_string(), times);
    }

    pub fn manifest_fetches(&self) -> Vec<Instant> {
        self.0.lock().unwrap().manifest_fetches.clone()
    }

    pub fn segment_fetches(&self) -> Vec<String> {
        self.0.lock().unwrap().segment_fetches.clone()
    }
}

#[async_trait]
impl SegmentSource for MemorySource {
    async fn fetch_manifest(&self, url: &str) -> Result<String, FetchError> {
        let mut state = self.0.lock().unwrap();
        state.manifest_fetches.push(Instant::now());
        match state.manifest_error {
            Some(status) => Err(FetchError::http_status(status, url)),
            None => Ok(state.manifest.clone()),
        }
    }

    async fn fetch_segment(&self, uri: &str, base_url: &str) -> Result<Bytes, FetchError> {
        let mut state = self.0.lock().unwrap();
        state.segment_fetches.push(uri.to_string());
        if let Some(remaining) = state.failures.get_mut(uri)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(FetchError::http_status(
                StatusCode::SERVICE_UNAVAILABLE,
                hls::resolve_segment_url(uri, base_url),
            ));
        }
        Ok(Bytes::from(uri.to_string()))
    }
}

// ============================================================================
// Sink and repackager
// ============================================================================

#[derive(Default)]
pub struct SinkLog {
    pub unsupported: bool,
    pub appending: bool,
    pub appended: Vec<Bytes>,
    pub aborted: bool,
    pub ended: bool,
    pub detached: bool,
}

/// Sink whose appends complete on a timer, asserting they never overlap.
#[derive(Clone, Default)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    notifier: Arc<Mutex<Option<Arc<Notifier>>>>,
}

impl RecordingSink {
    pub const APPEND_TIME: Duration = Duration::from_millis(10);

    pub fn unsupported() -> Self {
        let sink = Self::default();
        sink.log.lock().unwrap().unsupported = true;
        sink
    }

    pub fn log(&self) -> std::sync::MutexGuard<'_, SinkLog> {
        self.log.lock().unwrap()
    }

    pub fn appended(&self) -> Vec<Bytes> {
        self.log().appended.clone()
    }

    /// Appended payloads with the passthrough init prefix removed.
    pub fn payloads(&self) -> Vec<String> {
        self.log()
            .appended
            .iter()
            .map(|b| String::from_utf8_lossy(b.strip_prefix(INIT).unwrap_or(&b[..])).into_owned())
            .collect()
    }
}

impl MediaSink for RecordingSink {
    fn is_type_supported(&self, _mime: &str) -> bool {
        !self.log().unsupported
    }

    fn append(&mut self, data: Bytes) -> Result<(), SinkError> {
        {
            let mut log = self.log();
            assert!(!log.appending, "append issued while another append is in progress");
            if log.ended {
                return Err(SinkError::Closed);
            }
            log.appending = true;
            log.appended.push(data);
        }
        let log = self.log.clone();
        let notifier = self.notifier.lock().unwrap().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Self::APPEND_TIME).await;
            log.lock().unwrap().appending = false;
            if let Some(notify) = notifier {
                notify();
            }
        });
        Ok(())
    }

    fn is_appending(&self) -> bool {
        self.log().appending
    }

    fn on_update_end(&mut self, notifier: Notifier) {
        *self.notifier.lock().unwrap() = Some(Arc::new(notifier));
    }

    fn buffered(&self) -> Vec<TimeRange> {
        match self.log().appended.len() {
            0 => Vec::new(),
            n => vec![TimeRange::new(0.0, n as f64)],
        }
    }

    fn is_open(&self) -> bool {
        !self.log().ended
    }

    fn abort(&mut self) {
        self.log().aborted = true;
    }

    fn end_of_stream(&mut self) {
        self.log().ended = true;
    }

    fn detach(&mut self) {
        self.log().detached = true;
        self.notifier.lock().unwrap().take();
    }
}

/// Turns every pushed chunk into one fragment: the fake init then the chunk.
#[derive(Default)]
pub struct PassthroughRepackager {
    pending: Vec<u8>,
}

impl Repackager for PassthroughRepackager {
    fn push(&mut self, chunk: &[u8]) -> Result<(), TransmuxError> {
        self.pending.extend_from_slice(chunk);
        Ok(())
    }

    fn flush(&mut self) -> Result<Vec<MediaFragment>, TransmuxError> {
        let media = Bytes::from(std::mem::take(&mut self.pending));
        Ok(vec![MediaFragment {
            init: Bytes::from_static(INIT),
            media,
            start: 0.0,
            duration: 1.0,
        }])
    }

    fn dispose(&mut self) {
        self.pending.clear();
    }
}
