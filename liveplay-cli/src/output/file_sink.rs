//! Media sink that writes fragmented MP4 to a file or a pipe.
//!
//! Appends are handed to a writer task and complete asynchronously, like a
//! browser source buffer. Each distinct init segment is written once; the
//! buffered timeline is rebuilt from the `tfdt`/`trun` timing of the media
//! that actually reached the output.

use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use liveplay_engine::{FMP4_MIME, MediaSink, Notifier, SinkError, TimeRange};
use mp4::InitInfo;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Gap below which adjacent fragments count as one buffered range, in seconds.
const MERGE_TOLERANCE: f64 = 0.1;

#[derive(Default)]
struct SharedState {
    appending: bool,
    ended: bool,
    failed: bool,
    generation: u64,
    ranges: Vec<TimeRange>,
    notifier: Option<Arc<Notifier>>,
}

type Shared = Arc<Mutex<SharedState>>;

fn lock(shared: &Shared) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum WriteOp {
    Append { data: Bytes, generation: u64 },
    End,
}

/// Read-only view of what the sink has buffered.
#[derive(Clone)]
pub struct BufferedView(Shared);

impl BufferedView {
    /// End of the last buffered range, in seconds.
    pub fn end(&self) -> Option<f64> {
        lock(&self.0).ranges.last().map(|r| r.end)
    }
}

/// Owner-side handle of a [`FileSink`]'s writer task.
pub struct OutputHandle {
    closed: CancellationToken,
    view: BufferedView,
    task: JoinHandle<io::Result<()>>,
}

impl OutputHandle {
    /// Cancelled once the output can no longer be written.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn buffered(&self) -> BufferedView {
        self.view.clone()
    }

    /// Wait for the writer to flush everything it accepted.
    pub async fn finish(self) -> io::Result<()> {
        self.task
            .await
            .map_err(|e| io::Error::other(format!("output writer task failed: {e}")))?
    }
}

pub struct FileSink {
    shared: Shared,
    tx: Option<UnboundedSender<WriteOp>>,
}

impl FileSink {
    /// Spawn a writer task over `writer`. Must be called inside a runtime.
    pub fn new<W>(writer: W) -> (Self, OutputHandle)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Shared::default();
        let closed = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(writer, rx, shared.clone(), closed.clone()));
        let handle = OutputHandle {
            closed,
            view: BufferedView(shared.clone()),
            task,
        };
        (
            Self {
                shared,
                tx: Some(tx),
            },
            handle,
        )
    }

    pub fn stdout() -> (Self, OutputHandle) {
        Self::new(tokio::io::stdout())
    }

    pub async fn create(path: &Path) -> io::Result<(Self, OutputHandle)> {
        let file = tokio::fs::File::create(path).await?;
        info!(path = %path.display(), "Writing output to file");
        Ok(Self::new(file))
    }

    fn send(&mut self, op: WriteOp) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(op).is_ok())
    }
}

impl MediaSink for FileSink {
    fn is_type_supported(&self, mime: &str) -> bool {
        mime == FMP4_MIME || mime.starts_with("video/mp4") || mime.starts_with("audio/mp4")
    }

    fn append(&mut self, data: Bytes) -> Result<(), SinkError> {
        let generation = {
            let mut state = lock(&self.shared);
            if state.ended || state.failed {
                return Err(SinkError::Closed);
            }
            if state.appending {
                return Err(SinkError::Busy);
            }
            state.appending = true;
            state.generation
        };
        if self.send(WriteOp::Append { data, generation }) {
            return Ok(());
        }
        lock(&self.shared).appending = false;
        Err(SinkError::Closed)
    }

    fn is_appending(&self) -> bool {
        lock(&self.shared).appending
    }

    fn on_update_end(&mut self, notifier: Notifier) {
        lock(&self.shared).notifier = Some(Arc::new(notifier));
    }

    fn buffered(&self) -> Vec<TimeRange> {
        lock(&self.shared).ranges.clone()
    }

    fn is_open(&self) -> bool {
        let state = lock(&self.shared);
        !state.ended && !state.failed
    }

    fn abort(&mut self) {
        let mut state = lock(&self.shared);
        if state.appending {
            debug!("Aborting pending append");
        }
        state.generation += 1;
        state.appending = false;
    }

    fn end_of_stream(&mut self) {
        let was_open = {
            let mut state = lock(&self.shared);
            !std::mem::replace(&mut state.ended, true)
        };
        if was_open {
            self.send(WriteOp::End);
        }
    }

    fn detach(&mut self) {
        lock(&self.shared).notifier = None;
        self.tx = None;
    }
}

/// Tracks the init segment currently in effect on the output.
#[derive(Default)]
struct InitTracker {
    current: Option<Bytes>,
    info: Option<InitInfo>,
}

async fn write_fragment<W>(
    writer: &mut W,
    tracker: &mut InitTracker,
    data: Bytes,
) -> io::Result<Option<TimeRange>>
where
    W: AsyncWrite + Unpin,
{
    let (init, media) = mp4::split_init_segment(&data);
    if let Some(init) = init
        && tracker.current.as_ref() != Some(&init)
    {
        writer.write_all(&init).await?;
        tracker.info = mp4::parse_init(&init);
        if tracker.info.is_none() {
            warn!("Init segment without moov, buffered ranges will not advance");
        }
        debug!(len = init.len(), "Wrote init segment");
        tracker.current = Some(init);
    }
    writer.write_all(&media).await?;
    Ok(tracker
        .info
        .as_ref()
        .and_then(|info| mp4::fragment_timing(&media, info))
        .map(|timing| TimeRange::new(timing.start, timing.end)))
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: UnboundedReceiver<WriteOp>,
    shared: Shared,
    closed: CancellationToken,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut tracker = InitTracker::default();
    while let Some(op) = rx.recv().await {
        let (data, generation) = match op {
            WriteOp::Append { data, generation } => (data, generation),
            WriteOp::End => break,
        };
        if lock(&shared).generation != generation {
            continue;
        }

        let result = write_fragment(&mut writer, &mut tracker, data).await;
        let notifier = {
            let mut state = lock(&shared);
            match &result {
                Ok(Some(range)) => insert_range(&mut state.ranges, *range),
                Ok(None) => {}
                Err(_) => state.failed = true,
            }
            if state.generation == generation {
                state.appending = false;
                state.notifier.clone()
            } else {
                None
            }
        };
        if let Some(notify) = notifier {
            notify();
        }

        if let Err(e) = result {
            closed.cancel();
            if e.kind() == io::ErrorKind::BrokenPipe {
                info!("Output consumer closed the pipe");
                return Ok(());
            }
            return Err(e);
        }
    }

    writer.flush().await?;
    writer.shutdown().await?;
    debug!("Output writer finished");
    Ok(())
}

/// Insert `range` keeping `ranges` sorted, merging anything it touches.
fn insert_range(ranges: &mut Vec<TimeRange>, range: TimeRange) {
    let at = ranges.partition_point(|r| r.start < range.start);
    ranges.insert(at, range);

    let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for r in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if r.start <= last.end + MERGE_TOLERANCE => last.end = last.end.max(r.end),
            _ => merged.push(r),
        }
    }
    *ranges = merged;
}
