//! Echo confirmation: publish a camera update, then wait until the capture
//! service reports the same model back.
//!
//! Every arm of the [`EchoTracker`] starts a new generation. A telemetry
//! message confirms the current generation only when its intrinsics and
//! distortion equal the published values exactly. Waiting is a future with
//! a deadline; dropping it is the only way to cancel.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::time::{interval, timeout, MissedTickBehavior};

use scenecal_core::CameraModel;

use crate::messages::{CameraCommand, CameraTelemetry, PublishError, Publisher, UpdateCamera};

#[derive(thiserror::Error, Debug)]
pub enum FeedbackError {
    #[error("no confirmation within {0:?}")]
    TimedOut(Duration),
    #[error("superseded by a newer camera update")]
    Superseded,
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Deadline reached before the condition held.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("condition not met within {0:?}")]
pub struct WaitTimeout(pub Duration);

/// Check `probe` every `check_interval` (first check immediately) until it
/// yields a value, or give up after `max_wait`.
pub async fn poll_until<T, F>(
    mut probe: F,
    check_interval: Duration,
    max_wait: Duration,
) -> Result<T, WaitTimeout>
where
    F: FnMut() -> Option<T>,
{
    let polling = async {
        let mut ticker = interval(check_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(v) = probe() {
                return v;
            }
        }
    };
    timeout(max_wait, polling)
        .await
        .map_err(|_| WaitTimeout(max_wait))
}

pub async fn wait_until<F>(
    mut condition: F,
    check_interval: Duration,
    max_wait: Duration,
) -> Result<(), WaitTimeout>
where
    F: FnMut() -> bool,
{
    poll_until(|| condition().then_some(()), check_interval, max_wait).await
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmationState {
    Idle,
    Publishing,
    AwaitingConfirmation,
    Confirmed,
    TimedOut,
    Superseded,
}

#[derive(Debug)]
struct EchoState {
    generation: u64,
    expected: Option<CameraModel>,
    updated: bool,
    phase: ConfirmationState,
}

/// Per-camera confirmation flag. Clones share state, so the telemetry
/// handler and a waiting save can each hold one.
#[derive(Clone, Debug)]
pub struct EchoTracker {
    state: Arc<Mutex<EchoState>>,
}

impl Default for EchoTracker {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(EchoState {
                generation: 0,
                expected: None,
                updated: false,
                phase: ConfirmationState::Idle,
            })),
        }
    }
}

impl EchoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut EchoState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Expect `model` next. Resets the flag and returns the new generation.
    pub fn arm(&self, model: CameraModel) -> u64 {
        self.with(|s| {
            if s.phase == ConfirmationState::AwaitingConfirmation {
                log::info!("echo: generation {} superseded", s.generation);
            }
            s.generation += 1;
            s.expected = Some(model);
            s.updated = false;
            s.phase = ConfirmationState::Publishing;
            s.generation
        })
    }

    pub fn generation(&self) -> u64 {
        self.with(|s| s.generation)
    }

    pub fn phase(&self) -> ConfirmationState {
        self.with(|s| s.phase)
    }

    pub fn is_updated(&self) -> bool {
        self.with(|s| s.updated)
    }

    /// Feed one telemetry message. Returns `true` when it confirmed the
    /// current generation.
    pub fn observe(&self, telemetry: &CameraTelemetry) -> bool {
        self.with(|s| match s.expected {
            Some(expected) if !s.updated && telemetry.echoes(&expected) => {
                s.updated = true;
                log::info!("echo: generation {} confirmed", s.generation);
                true
            }
            _ => false,
        })
    }

    fn set_phase(&self, generation: u64, phase: ConfirmationState) {
        self.with(|s| {
            if s.generation == generation {
                s.phase = phase;
            }
        })
    }

    fn settle(&self, generation: u64) -> Option<Result<(), FeedbackError>> {
        self.with(|s| {
            if s.generation != generation {
                Some(Err(FeedbackError::Superseded))
            } else if s.updated {
                s.phase = ConfirmationState::Confirmed;
                Some(Ok(()))
            } else {
                None
            }
        })
    }

    /// Wait for `generation` to be confirmed.
    pub async fn confirmation(
        &self,
        generation: u64,
        check_interval: Duration,
        max_wait: Duration,
    ) -> Result<(), FeedbackError> {
        self.set_phase(generation, ConfirmationState::AwaitingConfirmation);
        match poll_until(|| self.settle(generation), check_interval, max_wait).await {
            Ok(outcome) => outcome,
            Err(WaitTimeout(budget)) => {
                log::warn!("echo: generation {generation} not confirmed within {budget:?}");
                self.set_phase(generation, ConfirmationState::TimedOut);
                Err(FeedbackError::TimedOut(budget))
            }
        }
    }
}

/// Publish `update` on `topic` and wait for the capture service to echo it.
pub async fn publish_and_confirm<P: Publisher + ?Sized>(
    publisher: &P,
    topic: &str,
    update: UpdateCamera,
    tracker: &EchoTracker,
    check_interval: Duration,
    max_wait: Duration,
) -> Result<(), FeedbackError> {
    let generation = tracker.arm(update.model());
    let command = CameraCommand::UpdateCamera(update);
    let sent = command
        .payload()
        .map_err(FeedbackError::from)
        .and_then(|payload| Ok(publisher.publish(topic, &payload, command.qos())?));
    if let Err(e) = sent {
        log::warn!("echo: publish to {topic} failed: {e}");
        tracker.set_phase(generation, ConfirmationState::Idle);
        return Err(e);
    }
    log::debug!("echo: published generation {generation} to {topic}");
    tracker.confirmation(generation, check_interval, max_wait).await
}

/// Single-slot inbox shared between a network handler and a waiting task.
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any unread value.
    pub fn put(&self, value: T) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub async fn receive(
        &self,
        check_interval: Duration,
        max_wait: Duration,
    ) -> Result<T, WaitTimeout> {
        poll_until(|| self.take(), check_interval, max_wait).await
    }
}
