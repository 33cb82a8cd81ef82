// Live session driver: runs the controller on a single tokio task.

use std::sync::Arc;

use futures::future::OptionFuture;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::controller::{Command, SessionController, SessionEvent, SessionParts};
use crate::error::PlayerError;
use crate::fetcher::{HttpFetcher, SegmentSource};
use crate::stats::SessionListener;

/// A live playback session bound to one manifest URL.
///
/// `start` must be called from within a tokio runtime.
pub struct LiveSession {
    manifest_url: String,
    base_url: String,
    source: Arc<dyn SegmentSource>,
    controller: Option<SessionController>,
    token: CancellationToken,
    task: Option<JoinHandle<Result<(), PlayerError>>>,
    outcome: Option<Result<(), PlayerError>>,
}

impl LiveSession {
    /// Create a session fetching over HTTP with `config.fetcher`.
    pub fn new(
        manifest_url: &str,
        parts: SessionParts,
        listener: Arc<dyn SessionListener>,
        config: SessionConfig,
    ) -> Result<Self, PlayerError> {
        let source = Arc::new(HttpFetcher::new(&config.fetcher)?);
        Self::with_source(manifest_url, parts, listener, config, source)
    }

    pub fn with_source(
        manifest_url: &str,
        parts: SessionParts,
        listener: Arc<dyn SessionListener>,
        config: SessionConfig,
        source: Arc<dyn SegmentSource>,
    ) -> Result<Self, PlayerError> {
        let url = validate_url(manifest_url)?;
        let manifest_url = url.to_string();
        let base_url = hls::base_url(&manifest_url);
        let controller = SessionController::new(parts, listener, config);
        Ok(Self {
            manifest_url,
            base_url,
            source,
            controller: Some(controller),
            token: CancellationToken::new(),
            task: None,
            outcome: None,
        })
    }

    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    /// Start polling and feeding. The environment check runs here, before
    /// any request is made. Calling it again is a no-op.
    pub fn start(&mut self) -> Result<(), PlayerError> {
        let Some(mut controller) = self.controller.take() else {
            return Ok(());
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let commands = controller.start(&tx)?;

        let driver = Driver {
            controller,
            source: self.source.clone(),
            manifest_url: self.manifest_url.clone(),
            base_url: self.base_url.clone(),
            tx,
            rx,
            token: self.token.clone(),
            poll_deadline: None,
        };
        let span = info_span!("live_session", url = %self.manifest_url);
        self.task = Some(tokio::spawn(driver.run(commands).instrument(span)));
        Ok(())
    }

    /// Stop the session and wait for its task to wind down. Safe to call
    /// before `start` and more than once.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(mut controller) = self.controller.take() {
            controller.stop();
        }
        if let Some(task) = self.task.as_mut() {
            self.outcome = Some(join(task).await);
            self.task = None;
        }
    }

    /// Resolve once the session ends: `Ok` after the playlist ended or a
    /// stop, the fatal error otherwise.
    ///
    /// Cancel safe: dropping the future keeps the task for a later `stop` or `wait`.
    pub async fn wait(&mut self) -> Result<(), PlayerError> {
        if let Some(task) = self.task.as_mut() {
            let outcome = join(task).await;
            self.task = None;
            return outcome;
        }
        self.outcome.take().unwrap_or(Ok(()))
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.as_ref().is_none_or(|task| task.is_finished())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn validate_url(input: &str) -> Result<Url, PlayerError> {
    let url = Url::parse(input).map_err(|e| PlayerError::invalid_url(input, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(PlayerError::invalid_url(
            input,
            format!("unsupported scheme `{scheme}`"),
        )),
    }
}

async fn join(task: &mut JoinHandle<Result<(), PlayerError>>) -> Result<(), PlayerError> {
    task.await
        .map_err(|e| PlayerError::internal(format!("session task failed: {e}")))?
}

/// Owns the controller and executes its commands.
struct Driver {
    controller: SessionController,
    source: Arc<dyn SegmentSource>,
    manifest_url: String,
    base_url: String,
    tx: UnboundedSender<SessionEvent>,
    rx: UnboundedReceiver<SessionEvent>,
    token: CancellationToken,
    poll_deadline: Option<Instant>,
}

impl Driver {
    async fn run(mut self, initial: Vec<Command>) -> Result<(), PlayerError> {
        let mut result = Ok(());
        let mut finished = self.execute(initial);

        while !finished {
            let poll: OptionFuture<_> = self.poll_deadline.map(sleep_until).into();
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!("Stop requested");
                    break;
                }
                Some(event) = self.rx.recv() => {
                    match self.controller.handle(event) {
                        Ok(commands) => finished = self.execute(commands),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                Some(()) = poll => {
                    self.poll_deadline = None;
                    match self.controller.handle(SessionEvent::PollTimerFired) {
                        Ok(commands) => finished = self.execute(commands),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
            }
        }

        self.poll_deadline = None;
        self.controller.stop();
        result
    }

    /// Run commands; returns true once the session has finished.
    fn execute(&mut self, commands: Vec<Command>) -> bool {
        let mut finished = false;
        for command in commands {
            match command {
                Command::FetchManifest => self.spawn_manifest_fetch(),
                Command::FetchSegment { uri } => self.spawn_segment_fetch(uri),
                Command::SchedulePoll(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Next manifest poll scheduled");
                    self.poll_deadline = Some(Instant::now() + delay);
                }
                Command::Finish => finished = true,
            }
        }
        finished
    }

    fn spawn_manifest_fetch(&self) {
        let source = self.source.clone();
        let url = self.manifest_url.clone();
        let tx = self.tx.clone();
        let token = self.token.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = source.fetch_manifest(&url) => {
                        if tx.send(SessionEvent::ManifestLoaded(result)).is_err() {
                            debug!("Session gone, dropping manifest");
                        }
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn spawn_segment_fetch(&self, uri: String) {
        let source = self.source.clone();
        let base_url = self.base_url.clone();
        let tx = self.tx.clone();
        let token = self.token.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    result = source.fetch_segment(&uri, &base_url) => {
                        if tx.send(SessionEvent::SegmentLoaded { uri, result }).is_err() {
                            warn!("Session gone, dropping segment");
                        }
                    }
                }
            }
            .in_current_span(),
        );
    }
}
