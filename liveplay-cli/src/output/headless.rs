use std::sync::{Arc, Mutex};
use std::time::Duration;

use liveplay_engine::{Notifier, PlayError, PlaybackSurface};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::output::BufferedView;

const TICK: Duration = Duration::from_millis(250);

/// Surface without a display: the clock is wall time since `play()`.
///
/// A ticker reports `waiting` once each time the clock catches up with the
/// end of the sink's buffer.
pub struct HeadlessSurface {
    buffered: BufferedView,
    started: Option<Instant>,
    waiting: Arc<Mutex<Option<Notifier>>>,
    token: CancellationToken,
}

impl HeadlessSurface {
    pub fn new(buffered: BufferedView) -> Self {
        Self {
            buffered,
            started: None,
            waiting: Arc::new(Mutex::new(None)),
            token: CancellationToken::new(),
        }
    }

    fn spawn_ticker(&self, started: Instant) {
        let buffered = self.buffered.clone();
        let waiting = self.waiting.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut stalled = false;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let position = started.elapsed().as_secs_f64();
                let starved = buffered.end().is_none_or(|end| position >= end);
                if starved && !stalled {
                    debug!(position, "Playback caught up with the buffer");
                    if let Ok(guard) = waiting.lock()
                        && let Some(notify) = guard.as_ref()
                    {
                        notify();
                    }
                }
                stalled = starved;
            }
        });
    }
}

impl PlaybackSurface for HeadlessSurface {
    fn current_time(&self) -> f64 {
        self.started
            .map_or(0.0, |started| started.elapsed().as_secs_f64())
    }

    fn on_waiting(&mut self, notifier: Notifier) {
        if let Ok(mut waiting) = self.waiting.lock() {
            *waiting = Some(notifier);
        }
    }

    fn play(&mut self) -> Result<(), PlayError> {
        if self.token.is_cancelled() {
            return Err(PlayError::Released);
        }
        if self.started.is_none() {
            let started = Instant::now();
            self.started = Some(started);
            self.spawn_ticker(started);
            info!("Playback started");
        }
        Ok(())
    }

    fn release(&mut self) {
        self.token.cancel();
        if let Ok(mut waiting) = self.waiting.lock() {
            waiting.take();
        }
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
